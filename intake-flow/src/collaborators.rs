use async_trait::async_trait;
use tracing::info;

use crate::{
    case::{Case, CaseData},
    error::Result,
    extract::PartialCase,
};

/// Delivers a reply to the client over the chat channel
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send(&self, client_id: &str, text: &str) -> Result<()>;
}

/// Alerts a human advisor. Fire-and-forget: failures are logged by the caller.
#[async_trait]
pub trait HandoffNotifier: Send + Sync {
    async fn notify(&self, client_id: &str, summary: &str) -> Result<()>;
}

/// Receives every finalized case
#[async_trait]
pub trait CaseLogger: Send + Sync {
    async fn record(&self, case: &Case) -> Result<()>;
}

/// Optional free-text field extraction.
///
/// Implementations may be slow, unavailable or wrong; whatever they return goes through
/// the same validators as explicit answers and never overrides them.
#[async_trait]
pub trait HintExtractor: Send + Sync {
    async fn extract(&self, text: &str, case: &CaseData) -> Result<Option<PartialCase>>;
}

/// Hint source for deployments without one
pub struct NoHints;

#[async_trait]
impl HintExtractor for NoHints {
    async fn extract(&self, _text: &str, _case: &CaseData) -> Result<Option<PartialCase>> {
        Ok(None)
    }
}

/// Writes finalized cases to the structured log
pub struct TracingCaseLogger;

#[async_trait]
impl CaseLogger for TracingCaseLogger {
    async fn record(&self, case: &Case) -> Result<()> {
        let routing = case.routing.as_ref();
        info!(
            ticket = %case.ticket,
            client_id = %case.client_id,
            flow = %case.flow,
            role = ?case.role.map(|r| r.label()),
            insurer = ?case.insurer.as_ref().map(|i| i.as_str()),
            vehicle = %case.vehicle(),
            plate = ?case.plate.as_ref().map(|p| p.as_str()),
            postal_code = ?case.postal_code.as_ref().map(|p| p.as_str()),
            provider = ?routing.map(|m| m.provider.id.as_str()),
            tier = ?routing.map(|m| m.tier),
            "Case finalized"
        );
        Ok(())
    }
}
