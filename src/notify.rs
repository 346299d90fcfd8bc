//! Notification sinks.
//!
//! The engine hands every transition to a [`NotificationSink`] after the
//! transition has been committed. Sinks are transport-agnostic and a failing
//! sink never undoes a state change.
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Approval requested; one per line with its action links.
    Submitted,
    /// Someone else approved, the recipient is still pending.
    AwaitingApproval,
    Approved,
    Rejected,
    Reverted,
    /// New approver of a transferred line, with action links.
    Transferred,
    /// Informational notice to the previous holder and other pending approvers.
    TransferNotice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionLinks {
    pub approve: String,
    pub refuse: String,
    pub revert: String,
    pub transfer: String,
}

impl ActionLinks {
    pub fn for_token(base_url: &str, token: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            approve: format!("{base}/approve/{token}"),
            refuse: format!("{base}/refuse/{token}"),
            revert: format!("{base}/revert/{token}"),
            transfer: format!("{base}/transfer/{token}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Payload {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<ActionLinks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: EventKind,
    pub request_id: String,
    pub reference: String,
    pub recipients: Vec<String>,
    pub payload: Payload,
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the log. The default sink.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, n: &Notification) -> anyhow::Result<()> {
        info!(
            kind = ?n.kind,
            request_id = %n.request_id,
            reference = %n.reference,
            recipients = ?n.recipients,
            "notification"
        );
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    sent: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
    pub fn of_kind(&self, kind: EventKind) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.kind == kind)
            .collect()
    }
    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, n: &Notification) -> anyhow::Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .push(n.clone());
        Ok(())
    }
}

/// Delivers to every inner sink. All sinks are attempted; the first error is
/// returned after the rest have run.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl NotificationSink for FanoutSink {
    fn notify(&self, n: &Notification) -> anyhow::Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(n) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Posts notifications as JSON to one or more URLs.
///
/// Delivery runs on the current tokio runtime and is not awaited; delivery
/// failures are logged from the spawned task.
#[derive(Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl WebhookSink {
    pub fn new(urls: Vec<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("approval-chain-webhook/0.1")
            .build()?;
        Ok(Self { client, urls })
    }
}

impl NotificationSink for WebhookSink {
    fn notify(&self, n: &Notification) -> anyhow::Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow::anyhow!("webhook sink needs a tokio runtime: {e}"))?;
        let body = serde_json::to_value(n)?;

        for url in &self.urls {
            let client = self.client.clone();
            let url = url.clone();
            let body = body.clone();
            handle.spawn(async move {
                match client.post(&url).json(&body).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        debug!(%url, "webhook delivered");
                    }
                    Ok(resp) => {
                        warn!(%url, status = %resp.status(), "webhook rejected");
                    }
                    Err(e) => {
                        warn!(%url, error = %e, "webhook delivery failed");
                    }
                }
            });
        }
        Ok(())
    }
}
