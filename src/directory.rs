//! Where default approvers come from.
use super::request::{LineDraft, Role, Subject};
use std::collections::{BTreeMap, BTreeSet};

pub trait ApproverDirectory: Send + Sync {
    fn manager_of(&self, requester: &str) -> Option<String>;
    fn partner_of(&self, requester: &str) -> Option<String>;
    /// People a pending line may be handed to.
    fn transfer_candidates(&self) -> Vec<String>;
    /// Sole approver of every leave condonation, when one is configured.
    fn condonation_approver(&self) -> Option<String> {
        None
    }
}

/// How the directory shapes a request's approvers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApproverRule {
    /// Authored lines stay; these are added alongside them.
    Supplement(Vec<LineDraft>),
    /// This is the only line the request may carry. Authored lines are dropped.
    Sole(LineDraft),
}

/// The rule for a request from `requester` about `subject`. Condonations go
/// to the configured condonation approver alone; everything else gets the
/// requester's manager and partner.
pub fn approver_rule(
    directory: &dyn ApproverDirectory,
    requester: &str,
    subject: &Subject,
) -> ApproverRule {
    match subject {
        Subject::LeaveCondonation { .. } => match directory.condonation_approver() {
            Some(approver) => ApproverRule::Sole(LineDraft::new(&approver).with_role(Role::Partner)),
            None => ApproverRule::Supplement(vec![]),
        },
        _ => ApproverRule::Supplement(default_lines(directory, requester)),
    }
}

/// Lines every request from `requester` must carry: the manager tagged
/// manager and the partner tagged partner. A person who is both yields a
/// single line with both tags.
pub fn default_lines(directory: &dyn ApproverDirectory, requester: &str) -> Vec<LineDraft> {
    let manager = directory.manager_of(requester);
    let partner = directory.partner_of(requester);
    let mut lines = vec![];

    if let Some(manager) = &manager {
        let mut line = LineDraft::new(manager).with_role(Role::Manager);
        if partner.as_ref() == Some(manager) {
            line = line.with_role(Role::Partner);
        }
        lines.push(line);
    }
    if let Some(partner) = partner.filter(|p| Some(p) != manager.as_ref()) {
        lines.push(LineDraft::new(&partner).with_role(Role::Partner));
    }
    lines
}

/// In-memory org chart.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    managers: BTreeMap<String, String>,
    partners: BTreeMap<String, String>,
    candidates: BTreeSet<String>,
    condonation: Option<String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn manager(mut self, requester: &str, manager: &str) -> Self {
        self.managers.insert(requester.to_string(), manager.to_string());
        self.candidates.insert(manager.to_string());
        self
    }
    pub fn partner(mut self, requester: &str, partner: &str) -> Self {
        self.partners.insert(requester.to_string(), partner.to_string());
        self.candidates.insert(partner.to_string());
        self
    }
    pub fn candidate(mut self, person: &str) -> Self {
        self.candidates.insert(person.to_string());
        self
    }
    pub fn condonation_approver(mut self, person: &str) -> Self {
        self.condonation = Some(person.to_string());
        self
    }
}

impl ApproverDirectory for StaticDirectory {
    fn manager_of(&self, requester: &str) -> Option<String> {
        self.managers.get(requester).cloned()
    }
    fn partner_of(&self, requester: &str) -> Option<String> {
        self.partners.get(requester).cloned()
    }
    fn transfer_candidates(&self) -> Vec<String> {
        self.candidates.iter().cloned().collect()
    }
    fn condonation_approver(&self) -> Option<String> {
        self.condonation.clone()
    }
}
