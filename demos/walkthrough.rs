//! End-to-end walk through the approval service on a throwaway sled db.
//!
//! cargo run --example walkthrough

use approval_chain::directory::StaticDirectory;
use approval_chain::notify::MemorySink;
use approval_chain::policy::ApprovalPolicy;
use approval_chain::request::{AdjustmentDirection, LineDraft, Subject, TimeStamp};
use approval_chain::service::ApprovalService;
use chrono::{Duration, Utc};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("walkthrough.db"))?);

    let directory = StaticDirectory::new()
        .manager("alice", "bob")
        .partner("alice", "carol")
        .condonation_approver("qasim")
        .candidate("dave");
    let sink = Arc::new(MemorySink::new());
    let policy = ApprovalPolicy::default().with_admins(vec!["root".to_string()]);
    let service = ApprovalService::new(db, policy)
        .with_sink(sink.clone())
        .with_directory(Arc::new(directory));

    // alice asks for two extra days; bob and carol come from the directory
    let adjustment = Subject::LeaveAdjustment {
        direction: AdjustmentDirection::Add,
        days: 2.0,
        date: TimeStamp::from(Utc::now() + Duration::days(7)),
        reason: "worked the release weekend".into(),
    };
    let request = service.create_request("alice", adjustment, vec![], "alice")?;
    let request = service.add_lines(&request.id, vec![LineDraft::new("erin")], "alice")?;
    let request = service.submit(&request.id, "alice")?;
    println!("{} submitted to {:?}", request.reference, request.approvers());

    // bob clicks the link in his email, carol and erin approve in the app
    let bob = request.line_for("bob").map(|l| l.token.clone()).unwrap_or_default();
    service.approve(&bob)?;
    service.approve_as(&request.id, "carol")?;
    let outcome = service.approve_as(&request.id, "erin")?;
    println!("{} is now {}", outcome.request.reference, outcome.request.state);

    // a second request goes back to alice, then an admin settles it
    let laptop = Subject::General {
        title: "Replacement laptop".into(),
    };
    let second = service.create_request("alice", laptop, vec![], "alice")?;
    service.submit(&second.id, "alice")?;
    service.revert_as(&second.id, "carol", Some("attach the quote"))?;
    service.submit(&second.id, "alice")?;
    let outcome = service.approve_as(&second.id, "root")?;
    println!("{} is now {}", outcome.request.reference, outcome.request.state);

    // condonations go to the condonation approver alone, who refuses this one
    let condonation = Subject::LeaveCondonation {
        year: 2026,
        month: 9,
        days: 1.0,
        reason: "late arrival during the strike".into(),
    };
    let third = service.create_request("alice", condonation, vec![], "alice")?;
    service.submit(&third.id, "alice")?;
    let outcome = service.refuse_as(&third.id, "qasim", "strike days are already excused")?;
    println!(
        "{} is now {}: {}",
        outcome.request.reference,
        outcome.request.state,
        outcome.request.rejection_reason.as_deref().unwrap_or_default()
    );

    for witness in service.get(&request.id)?.history() {
        println!("  {}", witness.describe());
    }
    println!("{} notifications sent", sink.sent().len());

    Ok(())
}
