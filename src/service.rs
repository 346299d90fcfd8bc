//! Service layer API for approval workflow operations
//!
//! Every operation is one storage transaction. Notifications are collected
//! while the transaction runs and dispatched only after it commits, so a
//! retried attempt never double-fires and a failing sink never rolls back a
//! committed state change.
use super::dedup::deduplicate;
use super::directory::{ApproverDirectory, ApproverRule, StaticDirectory, approver_rule};
use super::error::{ApprovalError, ValidationError};
use super::evaluator::{Mutation, evaluate};
use super::notify::{ActionLinks, EventKind, Notification, NotificationSink, Payload, TracingSink};
use super::policy::{ApprovalPolicy, SubmitGuard};
use super::request::{
    ApprovableRequest, ApprovalLine, LineDraft, RequestState, Subject, TimeStamp,
};
use super::store::RequestStore;
use super::utils::{new_token, new_uuid_to_bech32};
use super::witness_set::{WitnessType, append};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// The committed request and the state it moved to, if it moved.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub request: ApprovableRequest,
    pub transition: Option<RequestState>,
}

/// A live token resolved to its request and line, for rendering forms.
#[derive(Debug, Clone)]
pub struct TokenView {
    pub request: ApprovableRequest,
    pub line: ApprovalLine,
}

/// What a token is about to be used for. Revert is allowed on a line that
/// has already approved; every other action needs a pending line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenUse {
    Decide,
    Revert,
}

type Committed = (ActionOutcome, Vec<Notification>);

// lines the directory adds or imposes, with ids allocated outside any transaction
struct DerivedLines {
    lines: Vec<(String, LineDraft)>,
    sole: bool,
}

impl DerivedLines {
    fn apply(&self, req: &mut ApprovableRequest) {
        if self.sole {
            req.lines
                .retain(|l| self.lines.iter().any(|(_, d)| d.approver == l.approver));
        }
        for (line_id, draft) in &self.lines {
            req.push_line(line_id.clone(), draft.clone());
        }
        req.lines = deduplicate(std::mem::take(&mut req.lines));
    }
}

fn normalise(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

pub struct ApprovalService {
    store: RequestStore,
    policy: ApprovalPolicy,
    sink: Arc<dyn NotificationSink>,
    directory: Arc<dyn ApproverDirectory>,
    guards: Vec<Arc<dyn SubmitGuard>>,
    dispatch_failures: AtomicU64,
}

impl ApprovalService {
    pub fn new(instance: Arc<sled::Db>, policy: ApprovalPolicy) -> Self {
        Self {
            store: RequestStore::new(instance),
            policy,
            sink: Arc::new(TracingSink),
            directory: Arc::new(StaticDirectory::new()),
            guards: vec![],
            dispatch_failures: AtomicU64::new(0),
        }
    }
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }
    pub fn with_directory(mut self, directory: Arc<dyn ApproverDirectory>) -> Self {
        self.directory = directory;
        self
    }
    pub fn with_guard(mut self, guard: Arc<dyn SubmitGuard>) -> Self {
        self.guards.push(guard);
        self
    }
    pub fn with_guards(mut self, guards: Vec<Arc<dyn SubmitGuard>>) -> Self {
        self.guards.extend(guards);
        self
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }
    pub fn store(&self) -> &RequestStore {
        &self.store
    }
    /// Notifications the sink failed to accept since start-up.
    pub fn dispatch_failures(&self) -> u64 {
        self.dispatch_failures.load(Ordering::Relaxed)
    }

    pub fn get(&self, request_id: &str) -> Result<ApprovableRequest, ApprovalError> {
        self.store.load(request_id)
    }

    pub fn requests(&self) -> Result<Vec<ApprovableRequest>, ApprovalError> {
        self.store.list()
    }

    /// Create a draft request. `lines` are explicit approvers; the directory
    /// then adds the requester's manager and partner, or for a condonation
    /// replaces everything with the condonation approver. The result is
    /// deduplicated.
    ///
    /// Only the requester, or an actor with the override capability, may
    /// create a request on the requester's behalf.
    pub fn create_request(
        &self,
        requester: &str,
        subject: Subject,
        lines: Vec<LineDraft>,
        actor: &str,
    ) -> Result<ApprovableRequest, ApprovalError> {
        self.check_requester(requester, actor)?;
        let derived = self.derive_lines(requester, &subject)?;

        let id = new_uuid_to_bech32("req_")?;
        let reference = self.store.next_reference(&self.policy.reference_prefix)?;
        let mut request = ApprovableRequest::new(id, reference, requester.to_string(), subject);

        for (line_id, draft) in self.with_line_ids(lines)? {
            request.push_line(line_id, draft);
        }
        derived.apply(&mut request);
        append(&mut request.history, &request.id, actor, WitnessType::Create)?;

        self.store.insert(&request)?;
        info!(
            request_id = %request.id,
            reference = %request.reference,
            lines = request.lines.len(),
            "request created"
        );
        Ok(request)
    }

    /// Add approvers to a request that is still editable.
    pub fn add_lines(
        &self,
        request_id: &str,
        lines: Vec<LineDraft>,
        actor: &str,
    ) -> Result<ApprovableRequest, ApprovalError> {
        let current = self.store.load(request_id)?;
        self.check_requester(&current.requester, actor)?;
        let derived = self.derive_lines(&current.requester, &current.subject)?;
        let drafts = self.with_line_ids(lines)?;

        self.store.update(request_id, |req| {
            if !req.state.is_editable() {
                return Err(ApprovalError::InvalidState(req.state));
            }
            for (line_id, draft) in &drafts {
                req.push_line(line_id.clone(), draft.clone());
            }
            derived.apply(req);
            let approvers = drafts.iter().map(|(_, d)| d.approver.clone()).collect();
            append(
                &mut req.history,
                &req.id,
                actor,
                WitnessType::LinesAdded { approvers },
            )?;
            Ok(req.clone())
        })
    }

    /// Move a draft or reverted request to `submitted` and send one
    /// approval request per line.
    pub fn submit(&self, request_id: &str, actor: &str) -> Result<ApprovableRequest, ApprovalError> {
        let current = self.store.load(request_id)?;
        self.check_requester(&current.requester, actor)?;
        if !current.state.is_editable() {
            return Err(ApprovalError::InvalidState(current.state));
        }
        for guard in &self.guards {
            guard.check(&current, &self.store)?;
        }
        let derived = self.derive_lines(&current.requester, &current.subject)?;

        let (request, notes) = self.store.update(request_id, |req| {
            if !req.state.is_editable() {
                return Err(ApprovalError::InvalidState(req.state));
            }
            derived.apply(req);
            if req.lines.is_empty() {
                return Err(ValidationError::NoApprovers.into());
            }
            for line in req.lines.iter_mut() {
                line.validated = false;
            }
            req.state = RequestState::Submitted;
            req.rejection_reason = None;
            let approvers = req.approvers();
            append(&mut req.history, &req.id, actor, WitnessType::Submit { approvers })?;

            let notes = req
                .lines
                .iter()
                .map(|line| {
                    self.note(
                        EventKind::Submitted,
                        req,
                        vec![line.approver.clone()],
                        Payload {
                            links: Some(self.links(&line.token)),
                            ..self.payload(req, Some(actor))
                        },
                    )
                })
                .collect::<Vec<_>>();
            Ok((req.clone(), notes))
        })?;

        info!(
            request_id = %request.id,
            reference = %request.reference,
            approvers = request.lines.len(),
            "request submitted"
        );
        self.dispatch(notes);
        Ok(request)
    }

    /// Read-only token lookup for rendering the action forms.
    pub fn inspect(&self, token: &str, use_: TokenUse) -> Result<TokenView, ApprovalError> {
        let entry = self.store.find_token(token)?.ok_or(ApprovalError::InvalidToken)?;
        let request = match self.store.load(&entry.request_id) {
            Ok(request) => request,
            Err(ApprovalError::NotFound(_)) => return Err(ApprovalError::InvalidToken),
            Err(e) => return Err(e),
        };
        let line = match request.line(&entry.line_id) {
            Some(line) if line.token == token => line.clone(),
            _ => return Err(ApprovalError::InvalidToken),
        };
        self.check_token(&request, &line.id, use_, &TimeStamp::new())?;
        Ok(TokenView { request, line })
    }

    /// People the holder of `token` may hand the line to: the directory's
    /// candidates minus everyone already on the request.
    pub fn transfer_candidates(&self, token: &str) -> Result<Vec<String>, ApprovalError> {
        let view = self.inspect(token, TokenUse::Decide)?;
        Ok(self
            .directory
            .transfer_candidates()
            .into_iter()
            .filter(|c| view.request.line_for(c).is_none())
            .collect())
    }

    pub fn approve(&self, token: &str) -> Result<ActionOutcome, ApprovalError> {
        let now = TimeStamp::new();
        let (outcome, notes) = self.store.update_by_token(token, |req, line_id| {
            let actor = self.check_token(req, line_id, TokenUse::Decide, &now)?;
            self.approve_line(req, line_id, &actor)
        })?;
        self.dispatch(notes);
        Ok(outcome)
    }

    pub fn refuse(&self, token: &str, reason: &str) -> Result<ActionOutcome, ApprovalError> {
        let now = TimeStamp::new();
        let reason = reason.trim();
        let (outcome, notes) = self.store.update_by_token(token, |req, line_id| {
            let actor = self.check_token(req, line_id, TokenUse::Decide, &now)?;
            if reason.is_empty() {
                return Err(ValidationError::BlankReason.into());
            }
            self.refuse_request(req, &actor, reason)
        })?;
        self.dispatch(notes);
        Ok(outcome)
    }

    /// Revert through a line's link. Every token on the request is reissued,
    /// including the one used here.
    pub fn revert(&self, token: &str, remark: Option<&str>) -> Result<ActionOutcome, ApprovalError> {
        let now = TimeStamp::new();
        let remark = normalise(remark);
        let (outcome, notes) = self.store.update_by_token(token, |req, line_id| {
            let actor = self.check_token(req, line_id, TokenUse::Revert, &now)?;
            self.revert_request(req, &actor, remark.clone())
        })?;
        self.dispatch(notes);
        Ok(outcome)
    }

    /// Hand a pending line to another approver.
    ///
    /// Whether the line keeps its token is governed by
    /// [`ApprovalPolicy::transfer_keeps_token`]: when kept, links already in
    /// the old approver's inbox now act for the new approver.
    pub fn transfer(
        &self,
        token: &str,
        new_approver: &str,
        reason: Option<&str>,
    ) -> Result<ActionOutcome, ApprovalError> {
        let now = TimeStamp::new();
        let new_approver = new_approver.trim();
        let reason = normalise(reason);

        let (outcome, notes) = self.store.update_by_token(token, |req, line_id| {
            let from = self.check_token(req, line_id, TokenUse::Decide, &now)?;
            if new_approver.is_empty() {
                return Err(ValidationError::MissingApprover.into());
            }
            if req.line_for(new_approver).is_some() {
                return Err(ValidationError::ApproverConflict(new_approver.to_string()).into());
            }

            let keep_token = self.policy.transfer_keeps_token;
            let line_token = {
                let line = req.line_mut(line_id).ok_or(ApprovalError::InvalidToken)?;
                line.approver = new_approver.to_string();
                line.validated = false;
                if !keep_token {
                    line.token = new_token();
                    line.token_issued_at = TimeStamp::new();
                }
                line.token.clone()
            };
            append(
                &mut req.history,
                &req.id,
                &from,
                WitnessType::Transfer {
                    line_id: line_id.to_string(),
                    from: from.clone(),
                    to: new_approver.to_string(),
                    reason: reason.clone(),
                },
            )?;
            let transition = evaluate(req.state, &req.lines, Mutation::Transferred).next_state();
            if let Some(state) = transition {
                req.state = state;
            }

            let mut notes = vec![self.note(
                EventKind::Transferred,
                req,
                vec![new_approver.to_string()],
                Payload {
                    reason: reason.clone(),
                    links: Some(self.links(&line_token)),
                    ..self.payload(req, Some(&from))
                },
            )];
            let mut informed = vec![from.clone()];
            informed.extend(
                req.pending_lines()
                    .filter(|l| l.approver != new_approver)
                    .map(|l| l.approver.clone()),
            );
            notes.push(self.note(
                EventKind::TransferNotice,
                req,
                informed,
                Payload {
                    reason: reason.clone(),
                    ..self.payload(req, Some(&from))
                },
            ));

            Ok((
                ActionOutcome {
                    request: req.clone(),
                    transition,
                },
                notes,
            ))
        })?;

        info!(
            request_id = %outcome.request.id,
            to = %new_approver,
            "approval transferred"
        );
        self.dispatch(notes);
        Ok(outcome)
    }

    /// Approve as a signed-in user. An actor with the override capability
    /// approves every line at once; anyone else needs a pending line.
    pub fn approve_as(&self, request_id: &str, actor: &str) -> Result<ActionOutcome, ApprovalError> {
        let (outcome, notes) = self.store.update(request_id, |req| {
            if req.state != RequestState::Submitted {
                return Err(ApprovalError::InvalidState(req.state));
            }
            if self.policy.can_override(actor) {
                return self.override_approve(req, actor);
            }
            let line_id = match req.line_for(actor) {
                Some(line) if !line.validated => line.id.clone(),
                _ => return Err(ApprovalError::Forbidden(actor.to_string())),
            };
            self.approve_line(req, &line_id, actor)
        })?;
        self.dispatch(notes);
        Ok(outcome)
    }

    pub fn refuse_as(
        &self,
        request_id: &str,
        actor: &str,
        reason: &str,
    ) -> Result<ActionOutcome, ApprovalError> {
        let reason = reason.trim();
        let (outcome, notes) = self.store.update(request_id, |req| {
            if req.state != RequestState::Submitted {
                return Err(ApprovalError::InvalidState(req.state));
            }
            let pending = req.line_for(actor).is_some_and(|l| !l.validated);
            if !pending && !self.policy.can_override(actor) {
                return Err(ApprovalError::Forbidden(actor.to_string()));
            }
            if reason.is_empty() {
                return Err(ValidationError::BlankReason.into());
            }
            self.refuse_request(req, actor, reason)
        })?;
        self.dispatch(notes);
        Ok(outcome)
    }

    /// Revert as a signed-in user: any approver on the request, or an
    /// actor with the override capability.
    pub fn revert_as(
        &self,
        request_id: &str,
        actor: &str,
        remark: Option<&str>,
    ) -> Result<ActionOutcome, ApprovalError> {
        let remark = normalise(remark);
        let (outcome, notes) = self.store.update(request_id, |req| {
            if req.state != RequestState::Submitted {
                return Err(ApprovalError::InvalidState(req.state));
            }
            if req.line_for(actor).is_none() && !self.policy.can_override(actor) {
                return Err(ApprovalError::Forbidden(actor.to_string()));
            }
            self.revert_request(req, actor, remark.clone())
        })?;
        self.dispatch(notes);
        Ok(outcome)
    }

    pub fn delete(&self, request_id: &str) -> Result<(), ApprovalError> {
        self.store.delete(request_id)?;
        info!(request_id, "request deleted");
        Ok(())
    }

    fn check_requester(&self, requester: &str, actor: &str) -> Result<(), ApprovalError> {
        if actor == requester || self.policy.can_override(actor) {
            return Ok(());
        }
        debug!(requester, actor, "acting for another requester refused");
        Err(ApprovalError::Forbidden(actor.to_string()))
    }

    fn derive_lines(&self, requester: &str, subject: &Subject) -> Result<DerivedLines, ApprovalError> {
        let (drafts, sole) = match approver_rule(self.directory.as_ref(), requester, subject) {
            ApproverRule::Supplement(drafts) => (drafts, false),
            ApproverRule::Sole(draft) => (vec![draft], true),
        };
        Ok(DerivedLines {
            lines: self.with_line_ids(drafts)?,
            sole,
        })
    }

    fn with_line_ids(&self, drafts: Vec<LineDraft>) -> Result<Vec<(String, LineDraft)>, ApprovalError> {
        drafts
            .into_iter()
            .map(|d| -> Result<_, ApprovalError> { Ok((new_uuid_to_bech32("line_")?, d)) })
            .collect()
    }

    // returns the approver the token acts for
    fn check_token(
        &self,
        req: &ApprovableRequest,
        line_id: &str,
        use_: TokenUse,
        now: &TimeStamp<Utc>,
    ) -> Result<String, ApprovalError> {
        let line = req.line(line_id).ok_or(ApprovalError::InvalidToken)?;
        if self.policy.token_expired(line, now) {
            debug!(request_id = %req.id, line_id, "token expired");
            return Err(ApprovalError::InvalidToken);
        }
        if use_ == TokenUse::Decide && line.validated {
            debug!(request_id = %req.id, line_id, "token already consumed");
            return Err(ApprovalError::InvalidToken);
        }
        if req.state != RequestState::Submitted {
            debug!(request_id = %req.id, line_id, state = %req.state, "token used outside submitted");
            return Err(ApprovalError::InvalidToken);
        }
        Ok(line.approver.clone())
    }

    fn approve_line(
        &self,
        req: &mut ApprovableRequest,
        line_id: &str,
        actor: &str,
    ) -> Result<Committed, ApprovalError> {
        req.line_mut(line_id)
            .ok_or(ApprovalError::InvalidToken)?
            .validated = true;
        let approved = req.approved_count() as u32;
        let total = req.lines.len() as u32;
        append(
            &mut req.history,
            &req.id,
            actor,
            WitnessType::Approve {
                line_id: line_id.to_string(),
                approved,
                total,
            },
        )?;

        let transition = evaluate(req.state, &req.lines, Mutation::Approved).next_state();
        if let Some(state) = transition {
            req.state = state;
            append(&mut req.history, &req.id, actor, WitnessType::FullyApproved)?;
            info!(request_id = %req.id, reference = %req.reference, "request approved");
        }

        let notes = if transition == Some(RequestState::Approved) {
            vec![self.note(
                EventKind::Approved,
                req,
                vec![req.requester.clone()],
                self.payload(req, Some(actor)),
            )]
        } else {
            req.pending_lines()
                .map(|line| {
                    self.note(
                        EventKind::AwaitingApproval,
                        req,
                        vec![line.approver.clone()],
                        Payload {
                            links: Some(self.links(&line.token)),
                            progress: Some((approved, total)),
                            ..self.payload(req, Some(actor))
                        },
                    )
                })
                .collect()
        };

        Ok((
            ActionOutcome {
                request: req.clone(),
                transition,
            },
            notes,
        ))
    }

    fn override_approve(&self, req: &mut ApprovableRequest, actor: &str) -> Result<Committed, ApprovalError> {
        for line in req.lines.iter_mut() {
            line.validated = true;
        }
        append(&mut req.history, &req.id, actor, WitnessType::OverrideApprove)?;
        let transition = evaluate(req.state, &req.lines, Mutation::Approved).next_state();
        if let Some(state) = transition {
            req.state = state;
            append(&mut req.history, &req.id, actor, WitnessType::FullyApproved)?;
        }
        info!(request_id = %req.id, actor, "request approved by override");

        let notes = vec![self.note(
            EventKind::Approved,
            req,
            vec![req.requester.clone()],
            self.payload(req, Some(actor)),
        )];
        Ok((
            ActionOutcome {
                request: req.clone(),
                transition,
            },
            notes,
        ))
    }

    fn refuse_request(
        &self,
        req: &mut ApprovableRequest,
        actor: &str,
        reason: &str,
    ) -> Result<Committed, ApprovalError> {
        let transition = evaluate(req.state, &req.lines, Mutation::Refused).next_state();
        if let Some(state) = transition {
            req.state = state;
        }
        req.rejection_reason = Some(reason.to_string());
        append(
            &mut req.history,
            &req.id,
            actor,
            WitnessType::Refuse {
                reason: reason.to_string(),
            },
        )?;
        info!(request_id = %req.id, reference = %req.reference, actor, "request rejected");

        let notes = vec![self.note(
            EventKind::Rejected,
            req,
            vec![req.requester.clone()],
            Payload {
                reason: Some(reason.to_string()),
                ..self.payload(req, Some(actor))
            },
        )];
        Ok((
            ActionOutcome {
                request: req.clone(),
                transition,
            },
            notes,
        ))
    }

    fn revert_request(
        &self,
        req: &mut ApprovableRequest,
        actor: &str,
        remark: Option<String>,
    ) -> Result<Committed, ApprovalError> {
        let previous = req.state;
        let not_yet_acted: Vec<String> = req
            .pending_lines()
            .filter(|l| l.approver != actor)
            .map(|l| l.approver.clone())
            .collect();

        req.state = RequestState::Reverted;
        for line in req.lines.iter_mut() {
            line.reissue();
        }
        req.revert_remark = remark.clone();
        append(
            &mut req.history,
            &req.id,
            actor,
            WitnessType::Revert {
                previous,
                remark: remark.clone(),
            },
        )?;
        info!(request_id = %req.id, reference = %req.reference, actor, "request reverted");

        let payload = Payload {
            remark,
            ..self.payload(req, Some(actor))
        };
        let mut notes = vec![self.note(
            EventKind::Reverted,
            req,
            vec![req.requester.clone()],
            payload.clone(),
        )];
        if !not_yet_acted.is_empty() {
            notes.push(self.note(EventKind::Reverted, req, not_yet_acted, payload));
        }
        Ok((
            ActionOutcome {
                request: req.clone(),
                transition: Some(RequestState::Reverted),
            },
            notes,
        ))
    }

    fn links(&self, token: &str) -> ActionLinks {
        ActionLinks::for_token(&self.policy.base_url, token)
    }

    fn payload(&self, req: &ApprovableRequest, actor: Option<&str>) -> Payload {
        Payload {
            summary: req.subject.summary(),
            actor: actor.map(str::to_string),
            ..Payload::default()
        }
    }

    fn note(
        &self,
        kind: EventKind,
        req: &ApprovableRequest,
        recipients: Vec<String>,
        payload: Payload,
    ) -> Notification {
        Notification {
            kind,
            request_id: req.id.clone(),
            reference: req.reference.clone(),
            recipients,
            payload,
        }
    }

    fn dispatch(&self, notes: Vec<Notification>) {
        for n in notes {
            if let Err(e) = self.sink.notify(&n) {
                self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    kind = ?n.kind,
                    request_id = %n.request_id,
                    error = %e,
                    "notification dispatch failed"
                );
            }
        }
    }
}
