use approval_chain::config;
use approval_chain::directory::StaticDirectory;
use approval_chain::gateway::{self, AppState};
use approval_chain::leave::leave_guards;
use approval_chain::notify::{FanoutSink, NotificationSink, TracingSink, WebhookSink};
use approval_chain::service::ApprovalService;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "approval_chain=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;

    tracing::info!(path = %cfg.db_path, "Opening database...");
    let db = Arc::new(sled::open(&cfg.db_path)?);

    let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
    if !cfg.webhook_urls.is_empty() {
        tracing::info!(count = cfg.webhook_urls.len(), "Webhook notifications enabled");
        sink = sink.with(Arc::new(WebhookSink::new(cfg.webhook_urls.clone())?));
    }
    let sink: Arc<dyn NotificationSink> = Arc::new(sink);

    let mut directory = StaticDirectory::new();
    if let Some(approver) = &cfg.condonation_approver {
        tracing::info!(%approver, "Condonations go to a single approver");
        directory = directory.condonation_approver(approver);
    }

    let service = ApprovalService::new(db, cfg.policy())
        .with_sink(sink)
        .with_directory(Arc::new(directory))
        .with_guards(leave_guards());
    let app = gateway::router(AppState {
        service: Arc::new(service),
    });

    let addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%addr, "approval gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
