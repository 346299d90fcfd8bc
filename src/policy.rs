//! Engine configuration and pluggable hooks.
use super::error::ValidationError;
use super::request::{ApprovableRequest, ApprovalLine, TimeStamp};
use super::store::RequestStore;
use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

pub type OverridePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct ApprovalPolicy {
    /// Base for action links in notifications.
    pub base_url: String,
    /// Prefix of the human reference, `<prefix>/<n>`.
    pub reference_prefix: String,
    /// Keep a line's token when it is transferred so links already sent
    /// keep working for the new approver.
    pub transfer_keeps_token: bool,
    /// Tokens older than this are treated as invalid. `None` never expires.
    pub token_ttl: Option<Duration>,
    /// Who may act on any request regardless of holding a line.
    pub can_override: OverridePredicate,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            reference_prefix: "APR".to_string(),
            transfer_keeps_token: true,
            token_ttl: None,
            can_override: Arc::new(|_| false),
        }
    }
}

impl fmt::Debug for ApprovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalPolicy")
            .field("base_url", &self.base_url)
            .field("reference_prefix", &self.reference_prefix)
            .field("transfer_keeps_token", &self.transfer_keeps_token)
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

impl ApprovalPolicy {
    /// Override capability for a fixed set of administrator ids.
    pub fn with_admins<I: IntoIterator<Item = String>>(mut self, admins: I) -> Self {
        let admins: BTreeSet<String> = admins.into_iter().collect();
        self.can_override = Arc::new(move |actor| admins.contains(actor));
        self
    }
    pub fn can_override(&self, actor: &str) -> bool {
        (self.can_override)(actor)
    }
    pub fn token_expired(&self, line: &ApprovalLine, now: &TimeStamp<Utc>) -> bool {
        match self.token_ttl {
            Some(ttl) => line.token_issued_at.to_datetime_utc() + ttl < now.to_datetime_utc(),
            None => false,
        }
    }
}

/// Domain check run before a request enters `submitted`.
pub trait SubmitGuard: Send + Sync {
    fn check(&self, request: &ApprovableRequest, store: &RequestStore) -> Result<(), ValidationError>;
}
