use serde::{Deserialize, Serialize};
use std::fmt;

use crate::derive::ProviderMatch;

/// Earliest model year accepted for a vehicle
pub const MIN_MODEL_YEAR: i32 = 1980;

/// Insurers the intake recognizes by name. Matching is case- and accent-insensitive.
pub const KNOWN_INSURERS: &[&str] = &[
    "La Segunda",
    "Sancor",
    "Federación Patronal",
    "Rivadavia",
    "Mapfre",
    "Allianz",
    "Zurich",
    "La Caja",
    "Mercantil Andina",
    "San Cristóbal",
    "Provincia Seguros",
];

const OTHER_INSURER: &str = "OTRA";

/// Words shared by many insurer names; on their own they name no insurer
const GENERIC_INSURER_WORDS: &[&str] = &["seguro", "seguros", "aseguradora", "compania", "compañia"];

/// Largest value that still renders as a four-digit year
const MAX_STORED_YEAR: u16 = 9999;

/// Service type requested by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    Duplicate,
    ShellReplacement,
    NewKey,
}

impl Flow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flow::Duplicate => "duplicate",
            Flow::ShellReplacement => "shell_replacement",
            Flow::NewKey => "new_key",
        }
    }

    /// Name shown to clients and advisors
    pub fn label(&self) -> &'static str {
        match self {
            Flow::Duplicate => "duplicado",
            Flow::ShellReplacement => "carcasa",
            Flow::NewKey => "llave nueva",
        }
    }

    /// Slots collected by this flow, in prompt order
    pub fn slots(&self) -> &'static [Slot] {
        match self {
            Flow::Duplicate => &[
                Slot::Role,
                Slot::Insurer,
                Slot::Make,
                Slot::Model,
                Slot::Year,
                Slot::Plate,
            ],
            Flow::ShellReplacement | Flow::NewKey => {
                &[Slot::Make, Slot::Model, Slot::Year, Slot::Plate]
            }
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single structured field of a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Role,
    Insurer,
    Make,
    Model,
    Year,
    Plate,
    PostalCode,
}

impl Slot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Role => "role",
            Slot::Insurer => "insurer",
            Slot::Make => "make",
            Slot::Model => "model",
            Slot::Year => "year",
            Slot::Plate => "plate",
            Slot::PostalCode => "postal_code",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Insured,
    Private,
}

impl Role {
    /// Accepts the menu digits or the spelled-out role
    pub fn parse(text: &str) -> Option<Role> {
        let text = fold_text(text.trim());
        if text == "1" || text.contains("asegurad") {
            Some(Role::Insured)
        } else if text == "2" || text.contains("particular") {
            Some(Role::Private)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Insured => "ASEGURADO",
            Role::Private => "PARTICULAR",
        }
    }
}

/// Canonical insurer name, or the "other" marker for unlisted insurers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insurer(String);

impl Insurer {
    pub fn recognize(text: &str) -> Option<Insurer> {
        let needle = fold_text(text.trim());
        if needle.is_empty() {
            return None;
        }
        KNOWN_INSURERS
            .iter()
            .find(|name| {
                let name = fold_text(name);
                needle.contains(&name)
                    || (needle.chars().count() >= 4
                        && !GENERIC_INSURER_WORDS.contains(&needle.as_str())
                        && name.contains(&needle))
            })
            .map(|name| Insurer((*name).to_string()))
    }

    pub fn other() -> Insurer {
        Insurer(OTHER_INSURER.to_string())
    }

    pub fn is_other(&self) -> bool {
        self.0 == OTHER_INSURER
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Vehicle model year, validated against `[MIN_MODEL_YEAR, current_year + 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16")]
pub struct ModelYear(u16);

impl ModelYear {
    pub fn parse(text: &str, current_year: i32) -> Option<ModelYear> {
        let text = text.trim();
        if text.len() != 4 || !text.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let year: i32 = text.parse().ok()?;
        if (MIN_MODEL_YEAR..=current_year + 1).contains(&year) {
            Some(ModelYear(year as u16))
        } else {
            None
        }
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

/// Stored sessions carry no current year, so only the fixed bounds are checked
impl TryFrom<u16> for ModelYear {
    type Error = String;

    fn try_from(year: u16) -> Result<Self, Self::Error> {
        if (MIN_MODEL_YEAR as u16..=MAX_STORED_YEAR).contains(&year) {
            Ok(ModelYear(year))
        } else {
            Err(format!("model year {year} out of range"))
        }
    }
}

impl fmt::Display for ModelYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Uppercases and strips everything that is not an ASCII letter or digit
pub fn normalize_plate(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// License plate in one of the two accepted shapes: `LLLDDD` or `LLDDDLL`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct Plate(String);

impl Plate {
    pub fn parse(text: &str) -> Option<Plate> {
        let normalized = normalize_plate(text);
        let shape: String = normalized
            .chars()
            .map(|c| if c.is_ascii_digit() { 'D' } else { 'L' })
            .collect();
        match shape.as_str() {
            "LLLDDD" | "LLDDDLL" => Some(Plate(normalized)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Plate {
    type Error = String;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Plate::parse(&text).ok_or_else(|| format!("invalid plate {text:?}"))
    }
}

impl fmt::Display for Plate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Four-digit postal code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct PostalCode(String);

impl PostalCode {
    pub fn parse(text: &str) -> Option<PostalCode> {
        let text = text.trim();
        if text.len() == 4 && text.bytes().all(|b| b.is_ascii_digit()) {
            Some(PostalCode(text.to_string()))
        } else {
            None
        }
    }

    /// First two digits, shared by every code in the same zone
    pub fn zone(&self) -> &str {
        &self.0[..2]
    }

    pub fn numeric(&self) -> u32 {
        // Parsing cannot fail: construction guarantees four ASCII digits.
        self.0.parse().unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PostalCode {
    type Error = String;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        PostalCode::parse(&text).ok_or_else(|| format!("invalid postal code {text:?}"))
    }
}

impl fmt::Display for PostalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Both components finite and inside the lat/lon ranges
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle (haversine) distance in kilometres
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * Self::EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Fields collected for the case in progress. Every field is validated before it is stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseData {
    pub role: Option<Role>,
    pub insurer: Option<Insurer>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<ModelYear>,
    pub plate: Option<Plate>,
    pub postal_code: Option<PostalCode>,
    pub coordinates: Option<Coordinates>,
}

impl CaseData {
    pub fn is_filled(&self, slot: Slot) -> bool {
        match slot {
            Slot::Role => self.role.is_some(),
            Slot::Insurer => self.insurer.is_some(),
            Slot::Make => self.make.is_some(),
            Slot::Model => self.model.is_some(),
            Slot::Year => self.year.is_some(),
            Slot::Plate => self.plate.is_some(),
            Slot::PostalCode => self.postal_code.is_some(),
        }
    }

    /// Whether `slot` still has to be asked for in `flow`
    pub fn needs(&self, flow: Flow, slot: Slot) -> bool {
        if !flow.slots().contains(&slot) || self.is_filled(slot) {
            return false;
        }
        // The insurer is only asked for insured clients.
        slot != Slot::Insurer || self.role == Some(Role::Insured)
    }

    /// First slot of `flow` that still has to be collected
    pub fn next_slot(&self, flow: Flow) -> Option<Slot> {
        flow.slots().iter().copied().find(|slot| self.needs(flow, *slot))
    }

    /// Drops a field so it can be asked again. Clearing the role also drops the insurer.
    pub fn clear(&mut self, slot: Slot) {
        match slot {
            Slot::Role => {
                self.role = None;
                self.insurer = None;
            }
            Slot::Insurer => self.insurer = None,
            Slot::Make => self.make = None,
            Slot::Model => self.model = None,
            Slot::Year => self.year = None,
            Slot::Plate => self.plate = None,
            Slot::PostalCode => self.postal_code = None,
        }
    }

    /// "Make Model Year" with missing parts left out
    pub fn vehicle(&self) -> String {
        let year = self.year.map(|y| y.to_string());
        [self.make.as_deref(), self.model.as_deref(), year.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A finalized case, handed to the notification and logging collaborators
#[derive(Debug, Clone, Serialize)]
pub struct Case {
    pub ticket: String,
    pub client_id: String,
    pub flow: Flow,
    pub role: Option<Role>,
    pub insurer: Option<Insurer>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<ModelYear>,
    pub plate: Option<Plate>,
    pub postal_code: Option<PostalCode>,
    pub routing: Option<ProviderMatch>,
}

impl Case {
    pub fn vehicle(&self) -> String {
        let year = self.year.map(|y| y.to_string());
        [self.make.as_deref(), self.model.as_deref(), year.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Lowercases and folds the Spanish accented vowels so comparisons ignore them
pub(crate) fn fold_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' => 'a',
            'é' | 'è' => 'e',
            'í' | 'ì' => 'i',
            'ó' | 'ò' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            other => other,
        })
        .collect()
}
