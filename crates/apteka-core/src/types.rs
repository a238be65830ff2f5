use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AptekaError, Result};

// =============================================================================
// Conversation
// =============================================================================

/// Speaker of a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The caller.
    User,
    /// The assistant's spoken reply.
    Assistant,
}

/// One text-only entry of a session's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

// =============================================================================
// Slots
// =============================================================================

/// One identifying attribute of a pharmacy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotField {
    Name,
    Number,
    City,
    Street,
    HouseNumber,
}

impl SlotField {
    /// All fields in canonical order.
    pub const ALL: [SlotField; 5] = [
        SlotField::Name,
        SlotField::Number,
        SlotField::City,
        SlotField::Street,
        SlotField::HouseNumber,
    ];

    /// Key used both as the tool argument name and as the index metadata key.
    pub fn key(&self) -> &'static str {
        match self {
            SlotField::Name => "pharmacy_name",
            SlotField::Number => "pharmacy_number",
            SlotField::City => "city",
            SlotField::Street => "street",
            SlotField::HouseNumber => "house_number",
        }
    }
}

impl fmt::Display for SlotField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Slot values narrowing a search. An empty string means "not specified".
///
/// Used both for the values extracted from a single turn and for the
/// disambiguation context a session carries between turns.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotSet {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub house_number: String,
}

impl SlotSet {
    pub fn get(&self, field: SlotField) -> &str {
        match field {
            SlotField::Name => &self.name,
            SlotField::Number => &self.number,
            SlotField::City => &self.city,
            SlotField::Street => &self.street,
            SlotField::HouseNumber => &self.house_number,
        }
    }

    pub fn set(&mut self, field: SlotField, value: impl Into<String>) {
        let value = value.into();
        match field {
            SlotField::Name => self.name = value,
            SlotField::Number => self.number = value,
            SlotField::City => self.city = value,
            SlotField::Street => self.street = value,
            SlotField::HouseNumber => self.house_number = value,
        }
    }

    /// Builder-style setter, handy in tests and fixtures.
    pub fn with(mut self, field: SlotField, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn has(&self, field: SlotField) -> bool {
        !self.get(field).is_empty()
    }

    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        SlotField::ALL.iter().all(|f| !self.has(*f))
    }

    /// Non-empty fields in canonical order.
    pub fn filled(&self) -> impl Iterator<Item = (SlotField, &str)> + '_ {
        SlotField::ALL
            .into_iter()
            .map(move |f| (f, self.get(f)))
            .filter(|(_, v)| !v.is_empty())
    }

    pub fn filled_count(&self) -> usize {
        self.filled().count()
    }
}

/// Structured output of the intent classifier for one turn.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedQuery {
    /// Mandatory verbatim transcription of the caller's utterance.
    pub transcription: String,
    pub slots: SlotSet,
}

// =============================================================================
// Retrieval
// =============================================================================

/// One document returned by the semantic index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Ready-to-speak document text.
    pub document: String,
    /// Metadata fields, stringified.
    pub metadata: HashMap<String, String>,
}

impl CandidateRecord {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Metadata value for `field`, or `""` when absent.
    pub fn field(&self, field: SlotField) -> &str {
        self.metadata
            .get(field.key())
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Caller position in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Validate and build a coordinate pair.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(AptekaError::InvalidInput(format!(
                "latitude out of range: {}",
                latitude
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(AptekaError::InvalidInput(format!(
                "longitude out of range: {}",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

// =============================================================================
// Session
// =============================================================================

/// Per-conversation state owned by the session store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub history: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Present only while a multi-candidate search is unresolved.
    pub current_topic: Option<SlotSet>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            current_topic: None,
        }
    }

    /// Append a user/assistant exchange, keeping only the last `cap` turns.
    pub fn push_exchange(&mut self, user: &str, assistant: &str, cap: usize) {
        self.history.push(Turn::user(user));
        self.history.push(Turn::assistant(assistant));
        if self.history.len() > cap {
            let excess = self.history.len() - cap;
            self.history.drain(..excess);
        }
    }

    /// Drop history and disambiguation context (fresh conversation baseline).
    pub fn reset_conversation(&mut self) {
        self.history.clear();
        self.current_topic = None;
    }
}
