use super::policy::ApprovalPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: String,
    /// Public base URL used in emailed action links.
    pub base_url: String,
    /// Comma-separated list of webhook URLs to notify on every transition.
    pub webhook_urls: Vec<String>,
    /// Users allowed to approve, refuse, or revert any request.
    pub admins: Vec<String>,
    /// Set via APPROVAL_TOKEN_TTL_HOURS. Unset means tokens never expire.
    pub token_ttl_hours: Option<i64>,
    pub transfer_keeps_token: bool,
    pub reference_prefix: String,
    /// Sole approver of leave condonations (APPROVAL_CONDONATION_APPROVER).
    pub condonation_approver: Option<String>,
}

impl Config {
    pub fn policy(&self) -> ApprovalPolicy {
        ApprovalPolicy {
            base_url: self.base_url.clone(),
            reference_prefix: self.reference_prefix.clone(),
            transfer_keeps_token: self.transfer_keeps_token,
            token_ttl: self.token_ttl_hours.map(chrono::Duration::hours),
            ..ApprovalPolicy::default()
        }
        .with_admins(self.admins.clone())
    }
}

fn list(var: &str) -> Vec<String> {
    std::env::var(var)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn port(raw: Option<String>) -> anyhow::Result<u16> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("APPROVAL_PORT must be a port number, got {raw:?}: {e}")),
        None => Ok(8080),
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let token_ttl_hours = match std::env::var("APPROVAL_TOKEN_TTL_HOURS") {
        Ok(raw) => {
            let hours: i64 = raw
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("APPROVAL_TOKEN_TTL_HOURS must be a whole number: {e}"))?;
            if hours <= 0 {
                anyhow::bail!("APPROVAL_TOKEN_TTL_HOURS must be positive");
            }
            Some(hours)
        }
        Err(_) => None,
    };

    Ok(Config {
        port: port(std::env::var("APPROVAL_PORT").ok())?,
        db_path: std::env::var("APPROVAL_DB_PATH").unwrap_or_else(|_| "approval.db".into()),
        base_url: std::env::var("APPROVAL_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".into()),
        webhook_urls: list("APPROVAL_WEBHOOK_URLS"),
        admins: list("APPROVAL_ADMINS"),
        token_ttl_hours,
        transfer_keeps_token: std::env::var("APPROVAL_TRANSFER_KEEPS_TOKEN")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(true),
        reference_prefix: std::env::var("APPROVAL_REFERENCE_PREFIX")
            .unwrap_or_else(|_| "APR".into()),
        condonation_approver: std::env::var("APPROVAL_CONDONATION_APPROVER")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
    })
}
