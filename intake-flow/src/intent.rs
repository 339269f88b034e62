use regex::Regex;
use std::sync::LazyLock;

use crate::case::Flow;

/// Global commands recognised in any stage, before stage-specific handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Back to the main menu, dropping the case in progress
    Reset,
    PriceInquiry,
    LocationInquiry,
    HumanHandoff,
    /// Nothing global; the current stage handles the message
    None,
}

/// Ordered rules, first match wins
static RULES: LazyLock<Vec<(Intent, Regex)>> = LazyLock::new(|| {
    [
        (Intent::Reset, r"(?i)^\s*(0|men[uú])\s*$"),
        (Intent::PriceInquiry, r"(?i)precio|cu[aá]nto\s+(sale|cuesta)|costo|\bvale\b"),
        (
            Intent::LocationInquiry,
            r"(?i)ubicaci[oó]n|d[oó]nde\s+est[aá]n|direcci[oó]n|horarios?",
        ),
        (
            Intent::HumanHandoff,
            r"(?i)\b(asesor|asesora|humano|operador|operadora|persona)\b",
        ),
    ]
    .into_iter()
    .map(|(intent, pattern)| (intent, Regex::new(pattern).expect("intent pattern")))
    .collect()
});

static DUPLICATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)duplicad").expect("pattern"));
static SHELL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)carcasa").expect("pattern"));
static NEW_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)llave\s+nueva").expect("pattern"));

/// Classifies a message against the global command rules
pub fn classify(text: &str) -> Intent {
    RULES
        .iter()
        .find(|(_, pattern)| pattern.is_match(text))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::None)
}

/// Flow picked from the main menu, by option number or by name
pub fn menu_choice(text: &str) -> Option<Flow> {
    let text = text.trim();
    if text == "1" || DUPLICATE.is_match(text) {
        Some(Flow::Duplicate)
    } else if text == "2" || SHELL.is_match(text) {
        Some(Flow::ShellReplacement)
    } else if text == "3" || NEW_KEY.is_match(text) {
        Some(Flow::NewKey)
    } else {
        None
    }
}
