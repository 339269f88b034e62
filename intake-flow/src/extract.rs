//! Field extraction for stepwise answers and the conservative merge of free-text hints.
//!
//! Explicit answers are validated against the slot being asked for and always win.
//! Hints only ever fill fields that are still empty, and only after passing the same
//! validator an explicit answer would, so the dialogue behaves identically (if more
//! slowly) when no hint source is configured.

use serde::{Deserialize, Deserializer};

use crate::case::{CaseData, Flow, Insurer, ModelYear, Plate, PostalCode, Role, Slot};

/// Raw field values proposed by a hint source. Nothing here is trusted until merged.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PartialCase {
    pub role: Option<String>,
    pub insurer: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub year: Option<String>,
    pub plate: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub postal_code: Option<String>,
}

impl PartialCase {
    pub fn is_empty(&self) -> bool {
        self == &PartialCase::default()
    }
}

/// LLMs answer `"year": 2019` as often as `"year": "2019"`
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Trimmed text if anything is left
pub fn non_empty_text(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Validates `text` as the answer for `slot` and stores it.
///
/// Returns `false` (leaving `case` untouched) when the answer is rejected.
pub fn apply_answer(case: &mut CaseData, slot: Slot, text: &str, current_year: i32) -> bool {
    match slot {
        Slot::Role => store(&mut case.role, Role::parse(text)),
        Slot::Insurer => {
            let insurer = Insurer::recognize(text).or_else(|| is_other_insurer(text).then(Insurer::other));
            store(&mut case.insurer, insurer)
        }
        Slot::Make => store(&mut case.make, non_empty_text(text)),
        Slot::Model => store(&mut case.model, non_empty_text(text)),
        Slot::Year => store(&mut case.year, ModelYear::parse(text, current_year)),
        Slot::Plate => store(&mut case.plate, Plate::parse(text)),
        Slot::PostalCode => store(&mut case.postal_code, PostalCode::parse(text)),
    }
}

fn is_other_insurer(text: &str) -> bool {
    matches!(
        text.trim().to_lowercase().as_str(),
        "otra" | "otro" | "otra aseguradora" | "ninguna de esas"
    )
}

fn store<T>(field: &mut Option<T>, value: Option<T>) -> bool {
    match value {
        Some(value) => {
            *field = Some(value);
            true
        }
        None => false,
    }
}

/// Fills empty fields from `hints`, first accepted value wins.
///
/// A hint is applied only when the field belongs to `flow` (the postal code belongs to
/// every flow), is still `None`, and the hinted value passes the field's validator.
/// Returns the slots that were filled.
pub fn merge_hints(case: &mut CaseData, flow: Flow, hints: &PartialCase, current_year: i32) -> Vec<Slot> {
    let mut filled = Vec::new();
    let wanted = |slot: Slot| slot == Slot::PostalCode || flow.slots().contains(&slot);

    let mut fill = |slot: Slot, applied: bool| {
        if applied {
            filled.push(slot);
        }
    };

    if wanted(Slot::Role) && case.role.is_none() {
        fill(Slot::Role, fill_from(&mut case.role, &hints.role, Role::parse));
    }
    // An insurer only matters for insured clients; a private client never gets one.
    if wanted(Slot::Insurer) && case.insurer.is_none() && case.role != Some(Role::Private) {
        fill(
            Slot::Insurer,
            fill_from(&mut case.insurer, &hints.insurer, Insurer::recognize),
        );
    }
    if case.make.is_none() {
        fill(Slot::Make, fill_from(&mut case.make, &hints.make, non_empty_text));
    }
    if case.model.is_none() {
        fill(Slot::Model, fill_from(&mut case.model, &hints.model, non_empty_text));
    }
    if case.year.is_none() {
        fill(
            Slot::Year,
            fill_from(&mut case.year, &hints.year, |text| ModelYear::parse(text, current_year)),
        );
    }
    if case.plate.is_none() {
        fill(Slot::Plate, fill_from(&mut case.plate, &hints.plate, Plate::parse));
    }
    if case.postal_code.is_none() {
        fill(
            Slot::PostalCode,
            fill_from(&mut case.postal_code, &hints.postal_code, PostalCode::parse),
        );
    }

    filled
}

fn fill_from<T>(field: &mut Option<T>, hint: &Option<String>, parse: impl Fn(&str) -> Option<T>) -> bool {
    match hint.as_deref().and_then(parse) {
        Some(value) => {
            *field = Some(value);
            true
        }
        None => false,
    }
}
