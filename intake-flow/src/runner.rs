//! IntakeRunner – handles exactly **one** inbound message for one client.
//!
//! Each call follows the same _lock → step → side effects → deliver_ sequence:
//!
//! 1. fetch (or lazily create) the client's session and hold its lock for the whole turn,
//!    so deliveries for the same client never interleave;
//! 2. optionally ask the [`HintExtractor`] for free-text hints;
//! 3. run one synchronous [`DialogueMachine::step`], which commits all session changes;
//! 4. alert an advisor and record a finished case, logging (never propagating) failures;
//! 5. pass the reply through the de-duplication guard, send it, and only then remember it
//!    as the session's last reply.
//!
//! Create the runner once at startup and share it across requests; it is cheap to clone.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};
use tracing::{debug, error, info, warn};

use crate::{
    case::Coordinates,
    collaborators::{CaseLogger, HandoffNotifier, HintExtractor, NoHints, ReplySender, TracingCaseLogger},
    dialogue::{DialogueMachine, Turn},
    error::Result,
    guard::should_send,
    session::Stage,
    storage::SessionStorage,
};

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A message received from the chat channel
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub client_id: String,
    pub text: String,
    pub coordinates: Option<Coordinates>,
}

impl InboundMessage {
    pub fn new(client_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            text: text.into(),
            coordinates: None,
        }
    }

    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }
}

/// What happened while handling one message
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    /// Stage after the turn
    pub stage: Stage,
    /// Text delivered to the client, if any got past the guard and the sender
    pub delivered: Option<String>,
    /// Ticket of the case finalized during this turn
    pub ticket: Option<String>,
}

/// High-level helper that wires storage, the state machine and the collaborators
#[derive(Clone)]
pub struct IntakeRunner {
    storage: Arc<dyn SessionStorage>,
    machine: Arc<DialogueMachine>,
    sender: Arc<dyn ReplySender>,
    notifier: Arc<dyn HandoffNotifier>,
    case_logger: Arc<dyn CaseLogger>,
    hints: Arc<dyn HintExtractor>,
    idle_ttl: Option<Duration>,
    last_sweep: Arc<AtomicI64>,
}

impl IntakeRunner {
    /// Runner without hints that logs finished cases through `tracing`
    pub fn new(
        storage: Arc<dyn SessionStorage>,
        machine: Arc<DialogueMachine>,
        sender: Arc<dyn ReplySender>,
        notifier: Arc<dyn HandoffNotifier>,
    ) -> Self {
        Self {
            storage,
            machine,
            sender,
            notifier,
            case_logger: Arc::new(TracingCaseLogger),
            hints: Arc::new(NoHints),
            idle_ttl: None,
            last_sweep: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn with_hints(mut self, hints: Arc<dyn HintExtractor>) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_case_logger(mut self, case_logger: Arc<dyn CaseLogger>) -> Self {
        self.case_logger = case_logger;
        self
    }

    /// Evicts sessions idle for longer than `ttl`, checked at most once a minute
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = Some(ttl);
        self
    }

    pub fn storage(&self) -> &Arc<dyn SessionStorage> {
        &self.storage
    }

    /// Handle one inbound message. Only storage errors are returned; collaborator
    /// failures are logged and the conversation carries on.
    pub async fn handle(&self, message: InboundMessage) -> Result<TurnReport> {
        let now = Utc::now();
        self.sweep_idle(now).await;

        let handle = self.storage.get_or_create(&message.client_id).await?;
        let mut session = handle.lock().await;
        session.touch(now);

        let hints = if self.machine.wants_hints(&session, &message.text) {
            match self.hints.extract(&message.text, &session.case).await {
                Ok(hints) => hints.filter(|h| !h.is_empty()),
                Err(e) => {
                    warn!(client_id = %message.client_id, error = %e, "Hint extraction failed");
                    None
                }
            }
        } else {
            None
        };

        let mut turn = Turn::new(&message.text, now);
        if let Some(hints) = &hints {
            turn = turn.with_hints(hints);
        }
        if let Some(coordinates) = message.coordinates {
            turn = turn.with_coordinates(coordinates);
        }

        let previous = session.stage;
        let outcome = self.machine.step(&mut session, turn);
        debug!(
            client_id = %message.client_id,
            from = %previous,
            to = %session.stage,
            "Step executed"
        );

        if let Some(summary) = &outcome.handoff {
            if let Err(e) = self.notifier.notify(&message.client_id, summary).await {
                error!(client_id = %message.client_id, error = %e, "Advisor notification failed");
            }
        }

        let ticket = outcome.completed.as_ref().map(|case| case.ticket.clone());
        if let Some(case) = &outcome.completed {
            if let Err(e) = self.case_logger.record(case).await {
                error!(client_id = %message.client_id, ticket = %case.ticket, error = %e, "Case logging failed");
            }
        }

        let delivered = if should_send(&outcome.reply, &session.last_reply) {
            match self.sender.send(&message.client_id, &outcome.reply).await {
                Ok(()) => {
                    session.last_reply = outcome.reply.clone();
                    Some(outcome.reply)
                }
                Err(e) => {
                    error!(client_id = %message.client_id, error = %e, "Reply delivery failed");
                    None
                }
            }
        } else {
            debug!(client_id = %message.client_id, "Reply suppressed");
            None
        };

        Ok(TurnReport {
            stage: session.stage,
            delivered,
            ticket,
        })
    }

    async fn sweep_idle(&self, now: DateTime<Utc>) {
        let Some(ttl) = self.idle_ttl else {
            return;
        };
        let interval = ttl.min(MAX_SWEEP_INTERVAL).as_secs() as i64;
        let last = self.last_sweep.load(Ordering::Relaxed);
        let current = now.timestamp();
        if current - last < interval
            || self
                .last_sweep
                .compare_exchange(last, current, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
        {
            return;
        }
        match self.storage.evict_idle(ttl).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Idle sessions evicted"),
            Err(e) => warn!(error = %e, "Idle session sweep failed"),
        }
    }
}
