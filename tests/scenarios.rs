use anyhow::Context;
use approval_chain::directory::StaticDirectory;
use approval_chain::error::{ApprovalError, ValidationError};
use approval_chain::leave::leave_guards;
use approval_chain::notify::{EventKind, MemorySink, Notification, NotificationSink};
use approval_chain::policy::ApprovalPolicy;
use approval_chain::request::{
    AdjustmentDirection, ApprovableRequest, LineDraft, RequestState, Role, Subject, TimeStamp,
};
use approval_chain::service::{ApprovalService, TokenUse};
use approval_chain::witness_set::{WitnessType, verify};
use chrono::{Duration, Utc};
use sled::open;
use std::sync::Arc;
use std::thread;

use tempfile::tempdir; // Use for test db cleanup.

// Sled locks its files, so every test opens its own database in a temp dir.
fn open_db(dir: &tempfile::TempDir, name: &str) -> anyhow::Result<Arc<sled::Db>> {
    let db = open(dir.path().join(name))?;
    db.clear()?;
    Ok(Arc::new(db))
}

fn service_with(db: Arc<sled::Db>, policy: ApprovalPolicy) -> (ApprovalService, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let service = ApprovalService::new(db, policy).with_sink(sink.clone());
    (service, sink)
}

fn laptop() -> Subject {
    Subject::General {
        title: "New laptop".into(),
    }
}

fn token_of(request: &ApprovableRequest, approver: &str) -> String {
    request
        .line_for(approver)
        .map(|l| l.token.clone())
        .unwrap_or_default()
}

fn submitted_to(
    service: &ApprovalService,
    approvers: &[&str],
) -> anyhow::Result<ApprovableRequest> {
    let lines = approvers.iter().map(|a| LineDraft::new(a)).collect();
    let request = service.create_request("alice", laptop(), lines, "alice")?;
    Ok(service.submit(&request.id, "alice")?)
}

struct Unreachable;

impl NotificationSink for Unreachable {
    fn notify(&self, _: &Notification) -> anyhow::Result<()> {
        anyhow::bail!("mail relay unreachable")
    }
}

#[test]
fn two_approvers_complete_request() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "two_approvers.db")?;
    let (service, sink) = service_with(db, ApprovalPolicy::default());

    let request = submitted_to(&service, &["bob", "carol"])?;
    assert_eq!(request.state, RequestState::Submitted);
    assert!(request.reference.starts_with("APR/"));

    // one approval request per line, each with its own links
    let submitted = sink.of_kind(EventKind::Submitted);
    assert_eq!(submitted.len(), 2);
    assert!(submitted.iter().all(|n| n.payload.links.is_some()));

    let bob = token_of(&request, "bob");
    let carol = token_of(&request, "carol");

    let outcome = service.approve(&bob).context("bob approves")?;
    assert_eq!(outcome.transition, None);
    assert_eq!(outcome.request.state, RequestState::Submitted);

    // carol is told bob has approved and she is still pending
    let awaiting = sink.of_kind(EventKind::AwaitingApproval);
    assert_eq!(awaiting.len(), 1);
    assert_eq!(awaiting[0].recipients, vec!["carol".to_string()]);
    assert_eq!(awaiting[0].payload.progress, Some((1, 2)));

    // a consumed token cannot be replayed
    assert!(matches!(
        service.approve(&bob),
        Err(ApprovalError::InvalidToken)
    ));

    let outcome = service.approve(&carol).context("carol approves")?;
    assert_eq!(outcome.transition, Some(RequestState::Approved));
    assert_eq!(service.get(&request.id)?.state, RequestState::Approved);

    let approved = sink.of_kind(EventKind::Approved);
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].recipients, vec!["alice".to_string()]);

    // terminal: nothing acts any more
    assert!(matches!(
        service.revert(&carol, None),
        Err(ApprovalError::InvalidToken)
    ));
    Ok(())
}

#[test]
fn refusal_rejects_and_kills_remaining_tokens() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "refusal.db")?;
    let (service, sink) = service_with(db, ApprovalPolicy::default());

    let request = submitted_to(&service, &["bob", "carol"])?;
    let bob = token_of(&request, "bob");
    let carol = token_of(&request, "carol");

    // blank reasons are refused without touching state
    let err = service.refuse(&bob, "   ").unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::Validation(ValidationError::BlankReason)
    ));
    assert_eq!(service.get(&request.id)?.state, RequestState::Submitted);

    let outcome = service.refuse(&bob, "Budget frozen")?;
    assert_eq!(outcome.transition, Some(RequestState::Rejected));
    assert_eq!(
        outcome.request.rejection_reason.as_deref(),
        Some("Budget frozen")
    );

    let rejected = sink.of_kind(EventKind::Rejected);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].payload.reason.as_deref(), Some("Budget frozen"));

    assert!(matches!(
        service.approve(&carol),
        Err(ApprovalError::InvalidToken)
    ));
    assert!(matches!(
        service.inspect(&carol, TokenUse::Decide),
        Err(ApprovalError::InvalidToken)
    ));
    Ok(())
}

#[test]
fn unknown_token_is_invalid() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "unknown.db")?;
    let (service, _) = service_with(db, ApprovalPolicy::default());

    assert!(matches!(
        service.approve("not-a-token"),
        Err(ApprovalError::InvalidToken)
    ));
    // the token check runs before the reason check
    assert!(matches!(
        service.refuse("not-a-token", ""),
        Err(ApprovalError::InvalidToken)
    ));
    Ok(())
}

#[test]
fn directory_defaults_are_deduplicated() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "dedup.db")?;
    let directory = StaticDirectory::new()
        .manager("alice", "bob")
        .partner("alice", "bob");
    let (service, sink) = service_with(db, ApprovalPolicy::default());
    let service = service.with_directory(Arc::new(directory));

    // bob is named explicitly and is also manager and partner
    let request = service.create_request("alice", laptop(), vec![LineDraft::new("bob")], "alice")?;
    assert_eq!(request.lines.len(), 1);
    let line = &request.lines[0];
    assert!(line.has_role(Role::Manager));
    assert!(line.has_role(Role::Partner));

    let request = service.submit(&request.id, "alice")?;
    assert_eq!(request.lines.len(), 1);
    assert_eq!(sink.of_kind(EventKind::Submitted).len(), 1);

    // one approval is enough
    let outcome = service.approve(&token_of(&request, "bob"))?;
    assert_eq!(outcome.transition, Some(RequestState::Approved));
    Ok(())
}

#[test]
fn submit_adds_missing_manager_and_partner() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "defaults.db")?;
    let directory = StaticDirectory::new()
        .manager("alice", "bob")
        .partner("alice", "carol");
    let (service, _) = service_with(db, ApprovalPolicy::default());
    let service = service.with_directory(Arc::new(directory));

    let request = submitted_to(&service, &["dave"])?;

    assert_eq!(request.approvers(), vec!["dave", "bob", "carol"]);
    assert!(request.line_for("bob").is_some_and(|l| l.has_role(Role::Manager)));
    assert!(request.line_for("carol").is_some_and(|l| l.has_role(Role::Partner)));
    Ok(())
}

#[test]
fn submit_without_approvers_fails() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "empty.db")?;
    let (service, _) = service_with(db, ApprovalPolicy::default());

    let request = service.create_request("alice", laptop(), vec![], "alice")?;
    let err = service.submit(&request.id, "alice").unwrap_err();

    assert!(matches!(
        err,
        ApprovalError::Validation(ValidationError::NoApprovers)
    ));
    assert_eq!(service.get(&request.id)?.state, RequestState::Draft);
    Ok(())
}

#[test]
fn lines_cannot_be_added_once_submitted() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "add_lines.db")?;
    let (service, _) = service_with(db, ApprovalPolicy::default());

    let request = service.create_request("alice", laptop(), vec![LineDraft::new("bob")], "alice")?;
    let request = service.add_lines(
        &request.id,
        vec![LineDraft::new("carol"), LineDraft::new("bob")],
        "alice",
    )?;
    assert_eq!(request.approvers(), vec!["bob", "carol"]);

    service.submit(&request.id, "alice")?;
    assert!(matches!(
        service.add_lines(&request.id, vec![LineDraft::new("dave")], "alice"),
        Err(ApprovalError::InvalidState(RequestState::Submitted))
    ));
    Ok(())
}

#[test]
fn revert_resets_every_line_and_allows_resubmit() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "revert.db")?;
    let (service, sink) = service_with(db, ApprovalPolicy::default());

    let request = submitted_to(&service, &["bob", "carol", "dave"])?;
    let bob = token_of(&request, "bob");
    let carol = token_of(&request, "carol");
    let dave = token_of(&request, "dave");

    service.approve(&bob)?;
    // bob has already approved but can still send it back
    let outcome = service.revert(&bob, Some("  wrong dates  "))?;
    assert_eq!(outcome.transition, Some(RequestState::Reverted));
    assert_eq!(outcome.request.revert_remark.as_deref(), Some("wrong dates"));
    assert!(outcome.request.lines.iter().all(|l| !l.validated));

    // requester plus the approvers who had not acted yet
    let reverted = sink.of_kind(EventKind::Reverted);
    assert_eq!(reverted.len(), 2);
    assert_eq!(reverted[0].recipients, vec!["alice".to_string()]);
    assert_eq!(
        reverted[1].recipients,
        vec!["carol".to_string(), "dave".to_string()]
    );

    // every old token is dead, including the one used to revert
    for old in [&bob, &carol, &dave] {
        assert!(matches!(
            service.approve(old),
            Err(ApprovalError::InvalidToken)
        ));
    }

    let resubmitted = service.submit(&request.id, "alice")?;
    assert_eq!(resubmitted.state, RequestState::Submitted);
    for approver in ["bob", "carol", "dave"] {
        service.approve(&token_of(&resubmitted, approver))?;
    }
    let done = service.get(&request.id)?;
    assert_eq!(done.state, RequestState::Approved);
    assert!(verify(done.history()));
    Ok(())
}

#[test]
fn transfer_moves_line_and_keeps_token_by_default() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "transfer.db")?;
    let directory = StaticDirectory::new()
        .candidate("carol")
        .candidate("dave")
        .candidate("erin");
    let (service, sink) = service_with(db, ApprovalPolicy::default());
    let service = service.with_directory(Arc::new(directory));

    let request = submitted_to(&service, &["bob", "carol"])?;
    let bob = token_of(&request, "bob");

    // carol already holds a line, so she is not offered
    assert_eq!(service.transfer_candidates(&bob)?, vec!["dave", "erin"]);

    assert!(matches!(
        service.transfer(&bob, "  ", None),
        Err(ApprovalError::Validation(ValidationError::MissingApprover))
    ));
    assert!(matches!(
        service.transfer(&bob, "carol", None),
        Err(ApprovalError::Validation(ValidationError::ApproverConflict(_)))
    ));
    // the refused transfers left every line as it was
    assert_eq!(service.get(&request.id)?.lines, request.lines);

    let outcome = service.transfer(&bob, "dave", Some("on leave"))?;
    let line = outcome.request.line_for("dave").context("dave has the line")?;
    assert_eq!(line.token, bob);
    assert!(outcome.request.line_for("bob").is_none());

    let transferred = sink.of_kind(EventKind::Transferred);
    assert_eq!(transferred.len(), 1);
    assert_eq!(transferred[0].recipients, vec!["dave".to_string()]);
    assert!(transferred[0].payload.links.is_some());
    let notice = sink.of_kind(EventKind::TransferNotice);
    assert_eq!(
        notice[0].recipients,
        vec!["bob".to_string(), "carol".to_string()]
    );

    // the old link now acts for dave
    service.approve(&bob)?;
    let after = service.get(&request.id)?;
    assert!(after.line_for("dave").is_some_and(|l| l.validated));
    assert!(after.history().iter().any(|w| matches!(
        &w.witness_type,
        WitnessType::Transfer { from, to, .. } if from == "bob" && to == "dave"
    )));
    Ok(())
}

#[test]
fn transfer_onto_an_approved_holder_changes_nothing() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "transfer_conflict.db")?;
    let (service, sink) = service_with(db, ApprovalPolicy::default());

    let request = submitted_to(&service, &["bob", "carol"])?;
    let bob = token_of(&request, "bob");
    let before = service.approve(&token_of(&request, "carol"))?.request;

    assert!(matches!(
        service.transfer(&bob, "carol", Some("she knows the budget")),
        Err(ApprovalError::Validation(ValidationError::ApproverConflict(name))) if name == "carol"
    ));

    let after = service.get(&request.id)?;
    assert_eq!(after.lines, before.lines);
    assert!(after.line_for("carol").is_some_and(|l| l.validated));
    assert!(after.line_for("bob").is_some_and(|l| !l.validated && l.token == bob));
    assert_eq!(after.history().len(), before.history().len());
    assert!(sink.of_kind(EventKind::TransferNotice).is_empty());

    // bob's link still works
    service.approve(&bob)?;
    assert_eq!(service.get(&request.id)?.state, RequestState::Approved);
    Ok(())
}

#[test]
fn only_the_requester_or_an_admin_creates_and_submits() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "self_service.db")?;
    let policy = ApprovalPolicy::default().with_admins(vec!["root".to_string()]);
    let (service, sink) = service_with(db, policy);

    assert!(matches!(
        service.create_request("alice", laptop(), vec![LineDraft::new("bob")], "mallory"),
        Err(ApprovalError::Forbidden(actor)) if actor == "mallory"
    ));
    assert!(service.requests()?.is_empty());

    let request = service.create_request("alice", laptop(), vec![LineDraft::new("bob")], "alice")?;
    assert!(matches!(
        service.add_lines(&request.id, vec![LineDraft::new("mallory")], "mallory"),
        Err(ApprovalError::Forbidden(_))
    ));
    assert!(matches!(
        service.submit(&request.id, "mallory"),
        Err(ApprovalError::Forbidden(_))
    ));
    let untouched = service.get(&request.id)?;
    assert_eq!(untouched.state, RequestState::Draft);
    assert_eq!(untouched.approvers(), vec!["bob"]);
    assert!(sink.sent().is_empty());

    // an administrator may act for the requester
    let on_behalf = service.create_request("alice", laptop(), vec![LineDraft::new("bob")], "root")?;
    let submitted = service.submit(&on_behalf.id, "root")?;
    assert_eq!(submitted.state, RequestState::Submitted);
    assert_eq!(submitted.requester, "alice");
    Ok(())
}

#[test]
fn condonation_goes_to_the_sole_condonation_approver() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "condonation.db")?;
    let directory = StaticDirectory::new()
        .manager("alice", "bob")
        .partner("alice", "carol")
        .condonation_approver("qasim");
    let (service, sink) = service_with(db, ApprovalPolicy::default());
    let service = service.with_directory(Arc::new(directory));

    let condonation = Subject::LeaveCondonation {
        year: 2026,
        month: 9,
        days: 2.0,
        reason: "payroll deducted twice".into(),
    };
    // authored approvers and the directory's manager and partner are all replaced
    let request = service.create_request("alice", condonation, vec![LineDraft::new("dave")], "alice")?;
    assert_eq!(request.approvers(), vec!["qasim"]);
    assert!(request.lines[0].has_role(Role::Partner));

    let request = service.add_lines(&request.id, vec![LineDraft::new("erin")], "alice")?;
    assert_eq!(request.approvers(), vec!["qasim"]);

    let request = service.submit(&request.id, "alice")?;
    assert_eq!(request.approvers(), vec!["qasim"]);
    let submitted = sink.of_kind(EventKind::Submitted);
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].recipients, vec!["qasim".to_string()]);

    let outcome = service.approve(&token_of(&request, "qasim"))?;
    assert_eq!(outcome.transition, Some(RequestState::Approved));

    // other subjects still get the manager and partner
    let laptop_request = submitted_to(&service, &[])?;
    assert_eq!(laptop_request.approvers(), vec!["bob", "carol"]);
    Ok(())
}

#[test]
fn transfer_can_reissue_token() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "transfer_reissue.db")?;
    let policy = ApprovalPolicy {
        transfer_keeps_token: false,
        ..ApprovalPolicy::default()
    };
    let (service, _) = service_with(db, policy);

    let request = submitted_to(&service, &["bob", "carol"])?;
    let bob = token_of(&request, "bob");

    let outcome = service.transfer(&bob, "dave", None)?;
    let fresh = token_of(&outcome.request, "dave");

    assert_ne!(fresh, bob);
    assert!(matches!(
        service.approve(&bob),
        Err(ApprovalError::InvalidToken)
    ));
    service.approve(&fresh)?;
    Ok(())
}

#[test]
fn concurrent_final_approvals_notify_once() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "concurrent.db")?;
    let (service, sink) = service_with(db, ApprovalPolicy::default());
    let service = Arc::new(service);

    let request = submitted_to(&service, &["bob", "carol"])?;
    let tokens = vec![token_of(&request, "bob"), token_of(&request, "carol")];

    let handles: Vec<_> = tokens
        .into_iter()
        .map(|token| {
            let service = service.clone();
            thread::spawn(move || service.approve(&token).is_ok())
        })
        .collect();
    for handle in handles {
        assert!(handle.join().map_err(|_| anyhow::anyhow!("thread panicked"))?);
    }

    assert_eq!(service.get(&request.id)?.state, RequestState::Approved);
    assert_eq!(sink.of_kind(EventKind::Approved).len(), 1);
    Ok(())
}

#[test]
fn racing_the_same_token_succeeds_once() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "same_token.db")?;
    let (service, _) = service_with(db, ApprovalPolicy::default());
    let service = Arc::new(service);

    let request = submitted_to(&service, &["bob", "carol"])?;
    let bob = token_of(&request, "bob");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            let token = bob.clone();
            thread::spawn(move || service.approve(&token).is_ok())
        })
        .collect();
    let mut wins = 0;
    for handle in handles {
        if handle.join().map_err(|_| anyhow::anyhow!("thread panicked"))? {
            wins += 1;
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(service.get(&request.id)?.approved_count(), 1);
    Ok(())
}

#[test]
fn expired_tokens_are_invalid() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "ttl.db")?;
    let policy = ApprovalPolicy {
        token_ttl: Some(Duration::zero()),
        ..ApprovalPolicy::default()
    };
    let (service, _) = service_with(db, policy);

    let request = submitted_to(&service, &["bob"])?;
    thread::sleep(std::time::Duration::from_millis(5));

    assert!(matches!(
        service.approve(&token_of(&request, "bob")),
        Err(ApprovalError::InvalidToken)
    ));
    assert_eq!(service.get(&request.id)?.state, RequestState::Submitted);
    Ok(())
}

#[test]
fn admin_override_and_session_actions() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "override.db")?;
    let policy = ApprovalPolicy::default().with_admins(vec!["root".to_string()]);
    let (service, sink) = service_with(db, policy);

    let request = submitted_to(&service, &["bob", "carol"])?;

    // strangers can do nothing
    assert!(matches!(
        service.approve_as(&request.id, "mallory"),
        Err(ApprovalError::Forbidden(_))
    ));
    assert!(matches!(
        service.refuse_as(&request.id, "mallory", "no"),
        Err(ApprovalError::Forbidden(_))
    ));

    // bob approves as himself
    let outcome = service.approve_as(&request.id, "bob")?;
    assert_eq!(outcome.transition, None);
    assert!(matches!(
        service.approve_as(&request.id, "bob"),
        Err(ApprovalError::Forbidden(_))
    ));

    // root approves everything at once
    let outcome = service.approve_as(&request.id, "root")?;
    assert_eq!(outcome.transition, Some(RequestState::Approved));
    assert_eq!(outcome.request.approved_count(), 2);
    assert_eq!(sink.of_kind(EventKind::Approved).len(), 1);
    assert!(
        outcome
            .request
            .history()
            .iter()
            .any(|w| w.witness_type == WitnessType::OverrideApprove)
    );

    assert!(matches!(
        service.revert_as(&request.id, "root", None),
        Err(ApprovalError::InvalidState(RequestState::Approved))
    ));
    Ok(())
}

#[test]
fn leave_guards_block_bad_adjustments() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "guards.db")?;
    let (service, _) = service_with(db, ApprovalPolicy::default());
    let service = service.with_guards(leave_guards());

    let adjustment = |days: f64, offset: i64| Subject::LeaveAdjustment {
        direction: AdjustmentDirection::Add,
        days,
        date: TimeStamp::from(Utc::now() + Duration::days(offset)),
        reason: "overtime".into(),
    };
    let bob = || vec![LineDraft::new("bob")];

    let past = service.create_request("alice", adjustment(1.0, -3), bob(), "alice")?;
    assert!(matches!(
        service.submit(&past.id, "alice"),
        Err(ApprovalError::Validation(ValidationError::DateInPast))
    ));

    let negative = service.create_request("alice", adjustment(-1.0, 3), bob(), "alice")?;
    assert!(matches!(
        service.submit(&negative.id, "alice"),
        Err(ApprovalError::Validation(ValidationError::AdjustmentSign))
    ));
    service.delete(&negative.id)?;

    let first = service.create_request("alice", adjustment(1.0, 3), bob(), "alice")?;
    service.submit(&first.id, "alice")?;

    let second = service.create_request("alice", adjustment(2.0, 3), bob(), "alice")?;
    assert!(matches!(
        service.submit(&second.id, "alice"),
        Err(ApprovalError::Validation(ValidationError::DuplicateDate))
    ));
    Ok(())
}

#[test]
fn failing_sink_does_not_roll_back() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "failing_sink.db")?;
    let service =
        ApprovalService::new(db, ApprovalPolicy::default()).with_sink(Arc::new(Unreachable));

    let request = submitted_to(&service, &["bob"])?;
    let outcome = service.approve(&token_of(&request, "bob"))?;

    assert_eq!(outcome.transition, Some(RequestState::Approved));
    assert_eq!(service.get(&request.id)?.state, RequestState::Approved);
    // one submitted, one approved
    assert_eq!(service.dispatch_failures(), 2);
    Ok(())
}

#[test]
fn deleting_a_request_kills_its_tokens() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "delete.db")?;
    let (service, _) = service_with(db, ApprovalPolicy::default());

    let request = submitted_to(&service, &["bob"])?;
    let bob = token_of(&request, "bob");
    service.delete(&request.id)?;

    assert!(matches!(
        service.get(&request.id),
        Err(ApprovalError::NotFound(_))
    ));
    assert!(matches!(
        service.approve(&bob),
        Err(ApprovalError::InvalidToken)
    ));
    assert!(service.requests()?.is_empty());
    Ok(())
}

#[test]
fn history_records_every_step() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = open_db(&temp_dir, "history.db")?;
    let (service, _) = service_with(db, ApprovalPolicy::default());

    let request = submitted_to(&service, &["bob"])?;
    service.approve(&token_of(&request, "bob"))?;

    let done = service.get(&request.id)?;
    let kinds: Vec<_> = done
        .history()
        .iter()
        .map(|w| std::mem::discriminant(&w.witness_type))
        .collect();
    assert_eq!(kinds.len(), 4);
    assert_eq!(kinds[0], std::mem::discriminant(&WitnessType::Create));
    assert_eq!(kinds[3], std::mem::discriminant(&WitnessType::FullyApproved));
    assert!(done.verify_history());
    assert!(done.history()[2].describe().contains("1 of 1"));
    Ok(())
}
