//! Plain HTML pages served by the gateway.
use super::request::{ApprovableRequest, RequestState};
use super::utils::escape_html;

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><h1>{title}</h1>{body}</body></html>",
        title = escape_html(title),
    )
}

fn summary(request: &ApprovableRequest) -> String {
    format!(
        "<p><strong>{}</strong> from {}</p><p>{}</p>",
        escape_html(&request.reference),
        escape_html(&request.requester),
        escape_html(&request.subject.summary()),
    )
}

fn error_line(error: Option<&str>) -> String {
    error
        .map(|e| format!("<p class=\"error\">{}</p>", escape_html(e)))
        .unwrap_or_default()
}

/// Result page after an action has been applied.
pub fn outcome(request: &ApprovableRequest, message: &str) -> String {
    let state = match request.state {
        RequestState::Approved => "Fully approved",
        RequestState::Rejected => "Rejected",
        RequestState::Reverted => "Reverted",
        RequestState::Submitted => "Awaiting other approvers",
        RequestState::Draft => "Draft",
    };
    layout(
        state,
        &format!("{}<p>{}</p>", summary(request), escape_html(message)),
    )
}

pub fn invalid_link() -> String {
    layout(
        "Invalid link",
        "<p>This link is no longer valid. The request may already have been acted on.</p>",
    )
}

/// Generic failure page; never echoes internals.
pub fn failure(message: &str) -> String {
    layout("Something went wrong", &format!("<p>{}</p>", escape_html(message)))
}

pub fn refuse_form(request: &ApprovableRequest, token: &str, error: Option<&str>) -> String {
    layout(
        "Reject request",
        &format!(
            "{}{}<form method=\"post\" action=\"/refuse/{}\">\
             <label>Reason <textarea name=\"reason\" required></textarea></label>\
             <button type=\"submit\">Reject</button></form>",
            summary(request),
            error_line(error),
            escape_html(token),
        ),
    )
}

pub fn revert_form(request: &ApprovableRequest, token: &str, error: Option<&str>) -> String {
    layout(
        "Revert request",
        &format!(
            "{}{}<form method=\"post\" action=\"/revert/{}\">\
             <label>Remark <textarea name=\"remark\"></textarea></label>\
             <button type=\"submit\">Revert</button></form>",
            summary(request),
            error_line(error),
            escape_html(token),
        ),
    )
}

pub fn transfer_form(
    request: &ApprovableRequest,
    token: &str,
    candidates: &[String],
    error: Option<&str>,
) -> String {
    let options: String = candidates
        .iter()
        .map(|c| format!("<option value=\"{0}\">{0}</option>", escape_html(c)))
        .collect();
    layout(
        "Transfer approval",
        &format!(
            "{}{}<form method=\"post\" action=\"/transfer/{}\">\
             <label>New approver <select name=\"new_approver\">\
             <option value=\"\"></option>{options}</select></label>\
             <label>Reason <textarea name=\"reason\"></textarea></label>\
             <button type=\"submit\">Transfer</button></form>",
            summary(request),
            error_line(error),
            escape_html(token),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Subject;

    fn request() -> ApprovableRequest {
        ApprovableRequest::new(
            "req_1".into(),
            "APR/00001".into(),
            "<script>".into(),
            Subject::General {
                title: "Laptop & bag".into(),
            },
        )
    }

    #[test]
    fn pages_escape_user_text() {
        let page = refuse_form(&request(), "tok", Some("Please provide a reason."));

        assert!(page.contains("&lt;script&gt;"));
        assert!(page.contains("Laptop &amp; bag"));
        assert!(page.contains("Please provide a reason."));
        assert!(!page.contains("<script>"));
    }

    #[test]
    fn transfer_form_lists_candidates() {
        let page = transfer_form(&request(), "tok", &["dave".into(), "erin".into()], None);
        assert!(page.contains("<option value=\"dave\">dave</option>"));
        assert!(page.contains("action=\"/transfer/tok\""));
    }
}
