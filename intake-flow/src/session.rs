use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::case::{CaseData, Flow, Slot};

/// What the conversation is currently waiting for.
///
/// The flow lives inside the stage, so a session outside the menu always knows its flow
/// and a session in the menu never has one. Stages serialize to their display names
/// (`menu`, `duplicate_role`, `new_key_confirm`, ...); an unknown name deserializes to `Menu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Stage {
    Menu,
    Collect { flow: Flow, slot: Slot },
    Confirm { flow: Flow },
    Correct { flow: Flow },
}

impl Stage {
    pub fn flow(&self) -> Option<Flow> {
        match self {
            Stage::Menu => None,
            Stage::Collect { flow, .. } | Stage::Confirm { flow } | Stage::Correct { flow } => {
                Some(*flow)
            }
        }
    }

    /// Parses a display name back into a stage
    pub fn parse(name: &str) -> Option<Stage> {
        if name == "menu" {
            return Some(Stage::Menu);
        }
        for flow in [Flow::Duplicate, Flow::ShellReplacement, Flow::NewKey] {
            let Some(rest) = name
                .strip_prefix(flow.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
            else {
                continue;
            };
            if rest == "confirm" {
                return Some(Stage::Confirm { flow });
            }
            if rest == "correct" {
                return Some(Stage::Correct { flow });
            }
            let slot = [
                Slot::Role,
                Slot::Insurer,
                Slot::Make,
                Slot::Model,
                Slot::Year,
                Slot::Plate,
                Slot::PostalCode,
            ]
            .into_iter()
            .find(|slot| slot.as_str() == rest)?;
            return Some(Stage::Collect { flow, slot });
        }
        None
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Menu => f.write_str("menu"),
            Stage::Collect { flow, slot } => write!(f, "{flow}_{slot}"),
            Stage::Confirm { flow } => write!(f, "{flow}_confirm"),
            Stage::Correct { flow } => write!(f, "{flow}_correct"),
        }
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        stage.to_string()
    }
}

impl From<String> for Stage {
    fn from(name: String) -> Self {
        Stage::parse(&name).unwrap_or_else(|| {
            warn!(stage = %name, "Unknown stage, falling back to menu");
            Stage::Menu
        })
    }
}

/// Conversation state for one client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub client_id: String,
    pub stage: Stage,
    pub case: CaseData,
    /// Last text actually delivered to the client
    pub last_reply: String,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            stage: Stage::Menu,
            case: CaseData::default(),
            last_reply: String::new(),
            last_activity: Utc::now(),
        }
    }

    pub fn flow(&self) -> Option<Flow> {
        self.stage.flow()
    }

    /// Back to the menu with an empty case. `last_reply` survives so the menu that
    /// usually follows a reset is still de-duplicated.
    pub fn reset(&mut self) {
        self.stage = Stage::Menu;
        self.case = CaseData::default();
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::Role;

    #[test]
    fn test_stage_names_round_trip() {
        let stages = [
            Stage::Menu,
            Stage::Collect {
                flow: Flow::Duplicate,
                slot: Slot::Role,
            },
            Stage::Collect {
                flow: Flow::ShellReplacement,
                slot: Slot::Make,
            },
            Stage::Collect {
                flow: Flow::NewKey,
                slot: Slot::PostalCode,
            },
            Stage::Confirm { flow: Flow::NewKey },
            Stage::Correct {
                flow: Flow::Duplicate,
            },
        ];
        for stage in stages {
            assert_eq!(Stage::parse(&stage.to_string()), Some(stage));
        }
        assert_eq!(
            Stage::Collect {
                flow: Flow::Duplicate,
                slot: Slot::Make
            }
            .to_string(),
            "duplicate_make"
        );
    }

    #[test]
    fn test_corrupt_stage_deserializes_to_menu() {
        let json = r#"{
            "client_id": "whatsapp:+5491100000000",
            "stage": "duplicate_teleport",
            "case": {},
            "last_reply": "",
            "last_activity": "2026-01-01T00:00:00Z"
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.stage, Stage::Menu);
        assert_eq!(session.flow(), None);
    }

    #[test]
    fn test_reset_keeps_last_reply() {
        let mut session = Session::new("client");
        session.stage = Stage::Confirm {
            flow: Flow::Duplicate,
        };
        session.case.role = Some(Role::Private);
        session.last_reply = "¿Confirmás?".to_string();

        session.reset();

        assert_eq!(session.stage, Stage::Menu);
        assert_eq!(session.case, CaseData::default());
        assert_eq!(session.last_reply, "¿Confirmás?");
    }
}
