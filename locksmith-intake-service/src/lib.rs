pub mod config;
pub mod hints;
pub mod service;
pub mod twilio;

pub use config::{ConfigError, LogFormat, ServiceConfig, TwilioConfig};
pub use hints::LlmHintExtractor;
pub use service::{AppState, build_router};
pub use twilio::{LoggingSender, TwilioClient, WhatsAppHandoffNotifier};
