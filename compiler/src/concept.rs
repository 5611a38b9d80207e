//! Ontology and cohort-store inputs
//!
//! These are the values handed to the compiler by its collaborators: the
//! ontology browser yields [`Concept`]s (optionally addressed through a
//! [`Modifier`]), and the saved-cohort store yields [`Cohort`]s. The compiler
//! never fetches them itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value type declared by the ontology for a concept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Presence-only concept (no value restriction possible)
    #[default]
    None,
    /// Any integer
    Integer,
    /// Integer >= 0
    PositiveInteger,
    /// Any real number
    Float,
    /// Real number >= 0
    PositiveFloat,
    /// Free text
    Text,
}

impl ValueType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ValueType::Integer
                | ValueType::PositiveInteger
                | ValueType::Float
                | ValueType::PositiveFloat
        )
    }

    pub fn is_integer_only(&self) -> bool {
        matches!(self, ValueType::Integer | ValueType::PositiveInteger)
    }

    pub fn is_positive_only(&self) -> bool {
        matches!(self, ValueType::PositiveInteger | ValueType::PositiveFloat)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ValueType::Text)
    }
}

/// How a concept is protected on the wire
///
/// `id` is the plaintext integer identifier the crypto collaborator turns into
/// a ciphertext query term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionDescriptor {
    pub id: i64,
}

/// Qualifier narrowing the context a concept applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifier {
    /// Ontology key of the modifier itself
    pub key_path: String,
    /// Path pattern of the concepts the modifier applies to
    pub applied_path: String,
    /// Concrete concept the modifier is applied to in this query
    pub applied_concept_path: String,
}

/// A leaf ontology term a user can constrain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    /// Ontology path, e.g. `\\i2b2\\Demographics\\Age\\`
    pub path: String,
    /// Human-readable name, used in labels and validity messages
    pub display_name: String,
    #[serde(default)]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier: Option<Modifier>,
}

impl Concept {
    pub fn new(path: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            display_name: display_name.into(),
            value_type: ValueType::None,
            unit: None,
            encryption: None,
            modifier: None,
        }
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_encryption(mut self, id: i64) -> Self {
        self.encryption = Some(EncryptionDescriptor { id });
        self
    }

    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifier = Some(modifier);
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    /// Path the query engine should match: the applied concept when a
    /// modifier is present, the concept's own path otherwise
    pub fn query_path(&self) -> &str {
        match &self.modifier {
            Some(m) => &m.applied_concept_path,
            None => &self.path,
        }
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name)
    }
}

/// A previously saved, named cohort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cohort {
    pub name: String,
    /// Opaque id of the saved query that produced the cohort
    pub query_id: String,
}

impl Cohort {
    pub fn new(name: impl Into<String>, query_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query_id: query_id.into(),
        }
    }
}
