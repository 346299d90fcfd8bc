//! Approvable requests and their approval lines
use super::witness_set::Witness;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// ordered by instant; `Utc` itself has no ordering to derive from
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn date(&self) -> NaiveDate {
        self.0.date_naive()
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    #[n(0)]
    Draft,
    #[n(1)]
    Submitted,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
    #[n(4)]
    Reverted,
}

impl RequestState {
    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Approved | RequestState::Rejected)
    }
    /// States from which the requester may (re)submit.
    pub fn is_editable(&self) -> bool {
        matches!(self, RequestState::Draft | RequestState::Reverted)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequestState::Draft => "draft",
            RequestState::Submitted => "submitted",
            RequestState::Approved => "approved",
            RequestState::Rejected => "rejected",
            RequestState::Reverted => "reverted",
        };
        f.write_str(label)
    }
}

/// Why an approver sits on a request. Used for display and for merging
/// duplicate lines, never for authorization.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    #[n(0)]
    Manager,
    #[n(1)]
    Partner,
    #[n(2)]
    Other,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Manager => f.write_str("manager"),
            Role::Partner => f.write_str("partner"),
            Role::Other => f.write_str("other"),
        }
    }
}

/// One approver's slot on one request.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalLine {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub approver: String,
    #[n(2)]
    pub validated: bool,
    #[n(3)]
    pub roles: BTreeSet<Role>,
    #[n(4)]
    pub token: String,
    #[n(5)]
    pub token_issued_at: TimeStamp<Utc>,
    // creation order within the owning request, earliest wins on dedup
    #[n(6)]
    pub seq: u64,
}

impl ApprovalLine {
    pub fn new(id: String, approver: String, roles: BTreeSet<Role>, seq: u64) -> Self {
        Self {
            id,
            approver,
            validated: false,
            roles,
            token: crate::utils::new_token(),
            token_issued_at: TimeStamp::new(),
            seq,
        }
    }
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
    /// Reset the line for a fresh approval cycle. The old token stops working.
    pub fn reissue(&mut self) {
        self.validated = false;
        self.token = crate::utils::new_token();
        self.token_issued_at = TimeStamp::new();
    }
}

/// Authoring input for a line, before it has an id or token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDraft {
    pub approver: String,
    pub roles: BTreeSet<Role>,
}

impl LineDraft {
    pub fn new(approver: &str) -> Self {
        Self {
            approver: approver.to_string(),
            roles: BTreeSet::new(),
        }
    }
    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.insert(role);
        self
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentDirection {
    #[n(0)]
    Add,
    #[n(1)]
    Reduce,
}

/// What is being approved.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub enum Subject {
    #[n(0)]
    LeaveAdjustment {
        #[n(0)]
        direction: AdjustmentDirection,
        #[n(1)]
        days: f64,
        #[n(2)]
        date: TimeStamp<Utc>,
        #[n(3)]
        reason: String,
    },
    #[n(1)]
    LeaveCondonation {
        #[n(0)]
        year: i32,
        #[n(1)]
        month: u32,
        #[n(2)]
        days: f64,
        #[n(3)]
        reason: String,
    },
    #[n(2)]
    General {
        #[n(0)]
        title: String,
    },
}

impl Subject {
    /// One-line human description used in pages and notifications.
    pub fn summary(&self) -> String {
        match self {
            Subject::LeaveAdjustment {
                direction,
                days,
                date,
                reason,
            } => {
                let label = match direction {
                    AdjustmentDirection::Add => "Add leaves",
                    AdjustmentDirection::Reduce => "Reduce leaves",
                };
                format!(
                    "Leave adjustment ({label}) of {days} day(s) on {}: {reason}",
                    date.date().format("%d-%b-%Y")
                )
            }
            Subject::LeaveCondonation {
                year,
                month,
                days,
                reason,
            } => format!("Leave condonation of {days} day(s) for {year}-{month:02}: {reason}"),
            Subject::General { title } => title.clone(),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct ApprovableRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub reference: String,
    #[n(2)]
    pub requester: String,
    #[n(3)]
    pub subject: Subject,
    #[n(4)]
    pub state: RequestState,
    #[n(5)]
    pub lines: Vec<ApprovalLine>,
    #[n(6)]
    pub rejection_reason: Option<String>,
    #[n(7)]
    pub revert_remark: Option<String>,
    #[n(8)]
    pub history: Vec<Witness>,
    #[n(9)]
    pub next_line_seq: u64,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
}

impl ApprovableRequest {
    pub fn new(id: String, reference: String, requester: String, subject: Subject) -> Self {
        Self {
            id,
            reference,
            requester,
            subject,
            state: RequestState::Draft,
            lines: vec![],
            rejection_reason: None,
            revert_remark: None,
            history: vec![],
            next_line_seq: 0,
            created_at: TimeStamp::new(),
        }
    }
    /// Append a line built from `draft`, allocating the next creation sequence.
    /// Does not deduplicate; callers run the dedup policy afterwards.
    pub fn push_line(&mut self, line_id: String, draft: LineDraft) {
        let seq = self.next_line_seq;
        self.next_line_seq += 1;
        self.lines
            .push(ApprovalLine::new(line_id, draft.approver, draft.roles, seq));
    }
    pub fn line(&self, line_id: &str) -> Option<&ApprovalLine> {
        self.lines.iter().find(|l| l.id == line_id)
    }
    pub fn line_mut(&mut self, line_id: &str) -> Option<&mut ApprovalLine> {
        self.lines.iter_mut().find(|l| l.id == line_id)
    }
    pub fn line_for(&self, approver: &str) -> Option<&ApprovalLine> {
        self.lines.iter().find(|l| l.approver == approver)
    }
    pub fn line_by_token(&self, token: &str) -> Option<&ApprovalLine> {
        self.lines.iter().find(|l| l.token == token)
    }
    pub fn pending_lines(&self) -> impl Iterator<Item = &ApprovalLine> {
        self.lines.iter().filter(|l| !l.validated)
    }
    pub fn approved_count(&self) -> usize {
        self.lines.iter().filter(|l| l.validated).count()
    }
    pub fn approvers(&self) -> Vec<String> {
        self.lines.iter().map(|l| l.approver.clone()).collect()
    }
    pub fn history(&self) -> &[Witness] {
        &self.history
    }
    /// True when the audit trail is an unbroken hash chain.
    pub fn verify_history(&self) -> bool {
        super::witness_set::verify(&self.history)
    }
}
