//! HTTP surface for the emailed action links.
//!
//! Every route is addressed by token alone; the token is the credential.
//! Service calls touch sled and run on the blocking pool.
use super::error::{ApprovalError, ValidationError};
use super::pages;
use super::request::RequestState;
use super::service::{ApprovalService, TokenUse};
use axum::extract::{Form, Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ApprovalService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/approve/:token", get(approve).post(approve))
        .route("/refuse/:token", get(refuse_page).post(refuse))
        .route("/revert/:token", get(revert_page).post(revert))
        .route("/transfer/:token", get(transfer_page).post(transfer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Maps service errors to pages. Nothing about why a token failed leaks out.
#[derive(Debug)]
pub struct PageError(ApprovalError);

impl From<ApprovalError> for PageError {
    fn from(value: ApprovalError) -> Self {
        PageError(value)
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            ApprovalError::InvalidToken | ApprovalError::NotFound(_) => {
                (StatusCode::NOT_FOUND, pages::invalid_link())
            }
            ApprovalError::Validation(e) => {
                (StatusCode::UNPROCESSABLE_ENTITY, pages::failure(&e.to_string()))
            }
            ApprovalError::Forbidden(_) => {
                (StatusCode::FORBIDDEN, pages::failure(&self.0.to_string()))
            }
            ApprovalError::InvalidState(_) => {
                (StatusCode::CONFLICT, pages::failure(&self.0.to_string()))
            }
            other => {
                error!(error = %other, "action failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    pages::failure("The request could not be processed. Please try again later."),
                )
            }
        };
        (status, Html(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct RefuseForm {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RevertForm {
    #[serde(default)]
    pub remark: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferForm {
    #[serde(default)]
    pub new_approver: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum FormKind {
    Refuse,
    Revert,
    Transfer,
}

async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApprovalError>
where
    F: FnOnce(&ApprovalService) -> Result<T, ApprovalError> + Send + 'static,
    T: Send + 'static,
{
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| ApprovalError::Internal(anyhow::anyhow!("worker task failed: {e}")))?
}

async fn render_form(
    state: &AppState,
    token: String,
    kind: FormKind,
    problem: Option<ValidationError>,
) -> Result<Response, PageError> {
    let use_ = match kind {
        FormKind::Revert => TokenUse::Revert,
        FormKind::Refuse | FormKind::Transfer => TokenUse::Decide,
    };
    let lookup = token.clone();
    let (view, candidates) = blocking(state, move |s| {
        let view = s.inspect(&lookup, use_)?;
        let candidates = match kind {
            FormKind::Transfer => s.transfer_candidates(&lookup)?,
            _ => vec![],
        };
        Ok((view, candidates))
    })
    .await?;

    let message = problem.as_ref().map(ToString::to_string);
    let error = message.as_deref();
    let body = match kind {
        FormKind::Refuse => pages::refuse_form(&view.request, &token, error),
        FormKind::Revert => pages::revert_form(&view.request, &token, error),
        FormKind::Transfer => pages::transfer_form(&view.request, &token, &candidates, error),
    };
    let status = if problem.is_some() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::OK
    };
    Ok((status, Html(body)).into_response())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn approve(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Html<String>, PageError> {
    let outcome = blocking(&state, move |s| s.approve(&token)).await?;
    let message = match outcome.transition {
        Some(RequestState::Approved) => "All approvals received. The request is approved.",
        _ => "Your approval has been recorded.",
    };
    Ok(Html(pages::outcome(&outcome.request, message)))
}

async fn refuse_page(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, PageError> {
    render_form(&state, token, FormKind::Refuse, None).await
}

async fn refuse(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Form(form): Form<RefuseForm>,
) -> Result<Response, PageError> {
    let t = token.clone();
    match blocking(&state, move |s| s.refuse(&t, &form.reason)).await {
        Ok(outcome) => Ok(Html(pages::outcome(
            &outcome.request,
            "The request has been rejected.",
        ))
        .into_response()),
        Err(ApprovalError::Validation(e)) => {
            render_form(&state, token, FormKind::Refuse, Some(e)).await
        }
        Err(e) => Err(e.into()),
    }
}

async fn revert_page(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, PageError> {
    render_form(&state, token, FormKind::Revert, None).await
}

async fn revert(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Form(form): Form<RevertForm>,
) -> Result<Html<String>, PageError> {
    let outcome = blocking(&state, move |s| s.revert(&token, form.remark.as_deref())).await?;
    Ok(Html(pages::outcome(
        &outcome.request,
        "The request has been sent back to the requester.",
    )))
}

async fn transfer_page(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, PageError> {
    render_form(&state, token, FormKind::Transfer, None).await
}

async fn transfer(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Form(form): Form<TransferForm>,
) -> Result<Response, PageError> {
    let t = token.clone();
    let result = blocking(&state, move |s| {
        s.transfer(&t, &form.new_approver, form.reason.as_deref())
    })
    .await;
    match result {
        Ok(outcome) => Ok(Html(pages::outcome(
            &outcome.request,
            "The approval has been transferred.",
        ))
        .into_response()),
        Err(ApprovalError::Validation(e)) => {
            render_form(&state, token, FormKind::Transfer, Some(e)).await
        }
        Err(e) => Err(e.into()),
    }
}
