use intake_flow::{DialogueMachine, InMemorySessionStorage, IntakeRunner, ProviderCatalog, ReplySender};
use locksmith_intake_service::{
    AppState, LlmHintExtractor, LogFormat, LoggingSender, ServiceConfig, TwilioClient,
    WhatsAppHandoffNotifier, build_router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing in the configured format
fn init_tracing(log_format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "locksmith_intake_service=debug,intake_flow=debug,tower_http=debug".into()
    });

    match log_format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env()?;
    init_tracing(config.log_format);

    let catalog = Arc::new(ProviderCatalog::load_or_empty(&config.provider_catalog_path));

    let sender: Arc<dyn ReplySender> = match &config.twilio {
        Some(twilio) => Arc::new(TwilioClient::new(twilio.clone())),
        None => {
            warn!("Twilio credentials not set, replies will only be logged");
            Arc::new(LoggingSender)
        }
    };
    if config.human_whatsapp_to.is_none() {
        info!("HUMAN_WHATSAPP_TO not set, advisor alerts disabled");
    }
    let notifier = Arc::new(WhatsAppHandoffNotifier::new(
        sender.clone(),
        config.human_whatsapp_to.clone(),
    ));

    let mut runner = IntakeRunner::new(
        Arc::new(InMemorySessionStorage::new()),
        Arc::new(DialogueMachine::new(catalog)),
        sender,
        notifier,
    );
    match &config.openrouter_api_key {
        Some(api_key) => {
            info!(model = %config.hint_model, timeout = ?config.hint_timeout, "Hint extraction enabled");
            runner = runner.with_hints(Arc::new(LlmHintExtractor::new(
                api_key,
                &config.hint_model,
                config.hint_timeout,
            )));
        }
        None => info!("OPENROUTER_API_KEY not set, hint extraction disabled"),
    }
    if let Some(ttl) = config.session_idle_ttl {
        info!(ttl_secs = ttl.as_secs(), "Idle session eviction enabled");
        runner = runner.with_idle_ttl(ttl);
    }

    let app = build_router(AppState::new(runner));
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("Server running on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
