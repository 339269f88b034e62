//! The per-client conversation: one synchronous step per inbound message.
//!
//! A step commits every session mutation before it returns. What the caller has to do
//! afterwards (send the reply, alert an advisor, record a finished case) comes back in the
//! [`StepOutcome`], so collaborator latency or failure can never leave a session half
//! updated.

use chrono::{DateTime, Datelike, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    case::{Case, CaseData, Coordinates, Flow, PostalCode, Role, Slot, fold_text},
    catalog::ProviderCatalog,
    derive::{ProviderMatch, ProviderQuery, derive_provider},
    extract::{PartialCase, apply_answer, merge_hints},
    intent::{Intent, classify, menu_choice},
    messages,
    session::{Session, Stage},
};

/// One inbound message as seen by the state machine
#[derive(Debug, Clone, Copy)]
pub struct Turn<'a> {
    pub text: &'a str,
    pub hints: Option<&'a PartialCase>,
    pub coordinates: Option<Coordinates>,
    pub now: DateTime<Utc>,
}

impl<'a> Turn<'a> {
    pub fn new(text: &'a str, now: DateTime<Utc>) -> Self {
        Self {
            text,
            hints: None,
            coordinates: None,
            now,
        }
    }

    pub fn with_hints(mut self, hints: &'a PartialCase) -> Self {
        self.hints = Some(hints);
        self
    }

    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }
}

/// Result of a step: the candidate reply plus the side effects the caller owes
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub reply: String,
    /// Summary for a human advisor, if one should be alerted
    pub handoff: Option<String>,
    /// Set when this step finalized a case
    pub completed: Option<Case>,
}

impl StepOutcome {
    fn reply(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            handoff: None,
            completed: None,
        }
    }

    fn with_handoff(mut self, summary: String) -> Self {
        self.handoff = Some(summary);
        self
    }
}

/// Drives sessions through menu, slot collection, confirmation and finalize
#[derive(Debug, Clone)]
pub struct DialogueMachine {
    catalog: Arc<ProviderCatalog>,
}

impl DialogueMachine {
    pub fn new(catalog: Arc<ProviderCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    /// Whether a hint lookup for `text` could be used by the next step.
    ///
    /// Global commands and stages without free-form answers never use hints, and a
    /// single word carries nothing beyond the explicit answer itself.
    pub fn wants_hints(&self, session: &Session, text: &str) -> bool {
        let text = text.trim();
        if classify(text) != Intent::None || !text.contains(char::is_whitespace) {
            return false;
        }
        match session.stage {
            Stage::Menu => menu_choice(text).is_some(),
            Stage::Collect { .. } => true,
            Stage::Confirm { .. } | Stage::Correct { .. } => false,
        }
    }

    /// Advances `session` by one inbound message
    pub fn step(&self, session: &mut Session, turn: Turn<'_>) -> StepOutcome {
        let text = turn.text.trim();

        if let Some(reason) = unreachable_stage(session) {
            warn!(
                client_id = %session.client_id,
                stage = %session.stage,
                reason,
                "Unreachable stage, resetting to menu"
            );
            session.reset();
            return StepOutcome::reply(messages::MENU);
        }

        let located = self.store_location(session, turn.coordinates);
        if text.is_empty() {
            let prompt = current_prompt(session);
            return if located {
                StepOutcome::reply(format!("{}\n\n{prompt}", messages::LOCATION_SAVED))
            } else {
                StepOutcome::reply(prompt)
            };
        }

        match classify(text) {
            Intent::Reset => {
                debug!(client_id = %session.client_id, stage = %session.stage, "Reset requested");
                session.reset();
                StepOutcome::reply(messages::MENU)
            }
            Intent::PriceInquiry => {
                StepOutcome::reply(format!("{}\n\n{}", messages::PRICE_INFO, current_prompt(session)))
                    .with_handoff(messages::price_inquiry_alert(&session.client_id, text))
            }
            Intent::LocationInquiry => StepOutcome::reply(format!(
                "{}\n\n{}",
                messages::LOCATION_INFO,
                current_prompt(session)
            )),
            Intent::HumanHandoff => {
                info!(client_id = %session.client_id, stage = %session.stage, "Human handoff requested");
                let alert = messages::handoff_alert(&session.client_id, &session.stage.to_string(), text);
                StepOutcome::reply(format!("{}\n\n{}", messages::HANDOFF_ACK, current_prompt(session)))
                    .with_handoff(alert)
            }
            Intent::None => {
                let current_year = turn.now.year();
                match session.stage {
                    Stage::Menu => on_menu(session, text, turn.hints, current_year),
                    Stage::Collect { flow, slot } => {
                        on_collect(session, flow, slot, text, turn.hints, current_year)
                    }
                    Stage::Confirm { flow } => self.on_confirm(session, flow, text, turn.now),
                    Stage::Correct { flow } => on_correct(session, flow, text),
                }
            }
        }
    }

    /// Keeps the first valid location shared while a flow is active
    fn store_location(&self, session: &mut Session, coordinates: Option<Coordinates>) -> bool {
        let Some(coordinates) = coordinates.filter(Coordinates::is_valid) else {
            return false;
        };
        if session.flow().is_none() || session.case.coordinates.is_some() {
            return false;
        }
        debug!(client_id = %session.client_id, "Client location stored");
        session.case.coordinates = Some(coordinates);
        true
    }

    fn on_confirm(&self, session: &mut Session, flow: Flow, text: &str, now: DateTime<Utc>) -> StepOutcome {
        match fold_text(text).as_str() {
            "1" | "si" | "confirmar" | "confirmo" => self.finalize(session, flow, now),
            "2" | "corregir" => match session.case.next_slot(flow) {
                Some(slot) => StepOutcome::reply(enter(session, flow, slot)),
                None => {
                    session.stage = Stage::Correct { flow };
                    StepOutcome::reply(messages::correction_menu(&correctable(flow, &session.case)))
                }
            },
            _ => {
                if session.case.postal_code.is_none() {
                    session.case.postal_code = PostalCode::parse(text);
                }
                StepOutcome::reply(messages::confirm(flow, &session.case))
            }
        }
    }

    /// Builds the case, derives a provider and sends the session back to the menu
    fn finalize(&self, session: &mut Session, flow: Flow, now: DateTime<Utc>) -> StepOutcome {
        if let Some(slot) = session.case.next_slot(flow) {
            warn!(client_id = %session.client_id, %slot, "Finalize with a missing field");
            return StepOutcome::reply(enter(session, flow, slot));
        }

        let routing = self.route(flow, &session.case);
        let data = std::mem::take(&mut session.case);
        let case = Case {
            ticket: ticket(now),
            client_id: session.client_id.clone(),
            flow,
            role: data.role,
            insurer: data.insurer,
            make: data.make,
            model: data.model,
            year: data.year,
            plate: data.plate,
            postal_code: data.postal_code,
            routing,
        };
        session.reset();

        info!(
            client_id = %case.client_id,
            ticket = %case.ticket,
            %flow,
            provider = ?case.routing.as_ref().map(|m| m.provider.id.as_str()),
            "Case completed"
        );

        StepOutcome {
            reply: messages::done(&case),
            handoff: Some(messages::advisor_summary(&case)),
            completed: Some(case),
        }
    }

    fn route(&self, flow: Flow, case: &CaseData) -> Option<ProviderMatch> {
        let mut query = ProviderQuery::new(flow);
        if let Some(role) = case.role {
            query = query.role(role);
        }
        if let Some(insurer) = case.insurer.as_ref().filter(|i| !i.is_other()) {
            query.insurer = Some(insurer.as_str().to_string());
        }
        if let Some(postal_code) = &case.postal_code {
            query = query.postal_code(postal_code.as_str());
        }
        let coordinates = case
            .coordinates
            .or_else(|| case.postal_code.as_ref().and_then(|pc| self.catalog.centroid(pc)));
        if let Some(coordinates) = coordinates {
            query = query.coordinates(coordinates);
        }
        derive_provider(&self.catalog, &query)
    }
}

fn on_menu(session: &mut Session, text: &str, hints: Option<&PartialCase>, current_year: i32) -> StepOutcome {
    let Some(flow) = menu_choice(text) else {
        return StepOutcome::reply(messages::MENU);
    };
    session.case = CaseData::default();
    if let Some(hints) = hints {
        let filled = merge_hints(&mut session.case, flow, hints, current_year);
        if !filled.is_empty() {
            debug!(client_id = %session.client_id, ?filled, "Hints merged");
        }
    }
    let first_slot = session.case.next_slot(flow);
    let prompt = advance(session, flow);
    info!(client_id = %session.client_id, %flow, stage = %session.stage, "Flow selected");
    StepOutcome::reply(messages::flow_selected(&prompt, first_slot))
}

fn on_collect(
    session: &mut Session,
    flow: Flow,
    slot: Slot,
    text: &str,
    hints: Option<&PartialCase>,
    current_year: i32,
) -> StepOutcome {
    if !apply_answer(&mut session.case, slot, text, current_year) {
        debug!(client_id = %session.client_id, %slot, "Answer rejected");
        return StepOutcome::reply(messages::retry(slot));
    }
    if let Some(hints) = hints {
        let filled = merge_hints(&mut session.case, flow, hints, current_year);
        if !filled.is_empty() {
            debug!(client_id = %session.client_id, ?filled, "Hints merged");
        }
    }
    let next = advance(session, flow);
    StepOutcome::reply(messages::accepted(slot, session.case.role, &next))
}

fn on_correct(session: &mut Session, flow: Flow, text: &str) -> StepOutcome {
    let fields = correctable(flow, &session.case);
    let choice = text
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| fields.get(i).copied());
    match choice {
        Some(slot) => {
            debug!(client_id = %session.client_id, %slot, "Field cleared for correction");
            session.case.clear(slot);
            StepOutcome::reply(advance(session, flow))
        }
        None => StepOutcome::reply(messages::correction_menu(&fields)),
    }
}

/// Moves to the first unfilled slot, or to confirmation, and returns its prompt
fn advance(session: &mut Session, flow: Flow) -> String {
    match session.case.next_slot(flow) {
        Some(slot) => enter(session, flow, slot),
        None => {
            session.stage = Stage::Confirm { flow };
            messages::confirm(flow, &session.case)
        }
    }
}

fn enter(session: &mut Session, flow: Flow, slot: Slot) -> String {
    session.stage = Stage::Collect { flow, slot };
    messages::prompt(slot).to_string()
}

/// What the current stage is asking for
pub fn current_prompt(session: &Session) -> String {
    match session.stage {
        Stage::Menu => messages::MENU.to_string(),
        Stage::Collect { slot, .. } => messages::prompt(slot).to_string(),
        Stage::Confirm { flow } => messages::confirm(flow, &session.case),
        Stage::Correct { flow } => messages::correction_menu(&correctable(flow, &session.case)),
    }
}

/// Filled fields the client may choose to correct, in prompt order
fn correctable(flow: Flow, case: &CaseData) -> Vec<Slot> {
    flow.slots()
        .iter()
        .copied()
        .chain(std::iter::once(Slot::PostalCode))
        .filter(|slot| case.is_filled(*slot))
        .collect()
}

/// Stages a well-behaved conversation can never be in
fn unreachable_stage(session: &Session) -> Option<&'static str> {
    match session.stage {
        Stage::Menu | Stage::Confirm { .. } => None,
        Stage::Collect { flow, slot } => {
            if !flow.slots().contains(&slot) {
                Some("slot not collected by this flow")
            } else if slot == Slot::Insurer && session.case.role != Some(Role::Insured) {
                Some("insurer asked for a client that is not insured")
            } else {
                None
            }
        }
        Stage::Correct { flow } => {
            correctable(flow, &session.case).is_empty().then_some("nothing to correct")
        }
    }
}

/// Six-digit ticket number taken from the clock
fn ticket(now: DateTime<Utc>) -> String {
    format!("{:06}", now.timestamp_millis().rem_euclid(1_000_000))
}
