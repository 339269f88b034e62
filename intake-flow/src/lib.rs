pub mod case;
pub mod catalog;
pub mod collaborators;
pub mod derive;
pub mod dialogue;
pub mod error;
pub mod extract;
pub mod guard;
pub mod intent;
pub mod messages;
pub mod runner;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use case::{Case, CaseData, Coordinates, Flow, Insurer, ModelYear, Plate, PostalCode, Role, Slot};
pub use catalog::{Provider, ProviderCatalog};
pub use collaborators::{CaseLogger, HandoffNotifier, HintExtractor, NoHints, ReplySender, TracingCaseLogger};
pub use derive::{ProviderMatch, ProviderQuery, Tier, derive_provider};
pub use dialogue::{DialogueMachine, StepOutcome, Turn};
pub use error::{FlowError, Result};
pub use extract::PartialCase;
pub use intent::Intent;
pub use runner::{InboundMessage, IntakeRunner, TurnReport};
pub use session::{Session, Stage};
pub use storage::{InMemorySessionStorage, SessionHandle, SessionStorage};
