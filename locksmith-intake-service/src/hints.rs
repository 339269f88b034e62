use async_trait::async_trait;
use intake_flow::{CaseData, FlowError, HintExtractor, PartialCase, Result};
use rig::{agent::Agent, client::CompletionClient, completion::Prompt, providers::openrouter};
use std::time::Duration;
use tracing::{debug, info};

const HINT_EXTRACTION_PROMPT: &str = r#"
You extract vehicle-locksmith intake data from WhatsApp messages written in Rioplatense Spanish.

Return ONLY a JSON object with these keys (use null when the message does not state the value):
{
  "role": "asegurado" | "particular" | null,
  "insurer": "insurance company name" | null,
  "make": "vehicle make" | null,
  "model": "vehicle model" | null,
  "year": "four digit model year" | null,
  "plate": "license plate" | null,
  "postal_code": "four digit postal code" | null
}

Never guess. Never include explanatory text with the JSON.
"#;

/// Free-text hints from an OpenRouter model, bounded by a timeout
pub struct LlmHintExtractor {
    agent: Agent<openrouter::CompletionModel>,
    timeout: Duration,
}

impl LlmHintExtractor {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Self {
        let client = openrouter::Client::new(api_key);
        let agent = client.agent(model).preamble(HINT_EXTRACTION_PROMPT).build();
        Self { agent, timeout }
    }
}

#[async_trait]
impl HintExtractor for LlmHintExtractor {
    async fn extract(&self, text: &str, case: &CaseData) -> Result<Option<PartialCase>> {
        let known = serde_json::to_string(case).unwrap_or_default();
        let prompt = format!("Already collected (do not repeat): {known}\n\nMessage:\n{text}");

        let response = tokio::time::timeout(self.timeout, self.agent.prompt(prompt.as_str()))
            .await
            .map_err(|_| FlowError::Hint(format!("no answer within {:?}", self.timeout)))?
            .map_err(|e| FlowError::Hint(e.to_string()))?;

        debug!(response = %response, "Hint model answered");
        let hints = parse_hints(&response);
        if let Some(hints) = &hints {
            info!(?hints, "Hints extracted");
        }
        Ok(hints)
    }
}

/// Finds the JSON object in a model answer, tolerating code fences and chatter around it
pub fn parse_hints(response: &str) -> Option<PartialCase> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end < start {
        return None;
    }
    let hints = serde_json::from_str::<PartialCase>(&response[start..=end]).ok()?;
    (!hints.is_empty()).then_some(hints)
}
