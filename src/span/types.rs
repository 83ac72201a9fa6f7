//! Core span and document types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sensitive-data category of a detected span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    Ssn,
    Mrn,
    CreditCard,
    Account,
    License,
    Passport,
    HealthPlan,
    Email,
    Phone,
    Fax,
    Ip,
    Url,
    Date,
    ZipCode,
    Address,
    Age,
    Name,
    ProviderName,
    Vehicle,
    Device,
    Custom,
}

impl FilterType {
    /// Type specificity weight, used as the default tie-break priority.
    ///
    /// More structured identifiers (SSN, MRN) outrank loosely structured
    /// ones (names, ages) when spans compete for the same text.
    pub fn specificity(&self) -> u32 {
        match self {
            Self::Ssn => 100,
            Self::Mrn => 95,
            Self::CreditCard => 90,
            Self::Account | Self::License | Self::Passport | Self::HealthPlan => 85,
            Self::Email => 80,
            Self::Phone | Self::Fax | Self::Ip | Self::Url => 75,
            Self::Vehicle | Self::Device => 70,
            Self::Date => 60,
            Self::ZipCode => 55,
            Self::Address => 50,
            Self::Age => 40,
            Self::ProviderName => 36,
            Self::Name => 35,
            Self::Custom => 20,
        }
    }

    /// Mask token used by the built-in writer.
    pub fn mask_label(&self) -> &'static str {
        match self {
            Self::Ssn => "SSN",
            Self::Mrn => "MRN",
            Self::CreditCard => "CREDIT_CARD",
            Self::Account => "ACCOUNT",
            Self::License => "LICENSE",
            Self::Passport => "PASSPORT",
            Self::HealthPlan => "HEALTH_PLAN",
            Self::Email => "EMAIL",
            Self::Phone => "PHONE",
            Self::Fax => "FAX",
            Self::Ip => "IP",
            Self::Url => "URL",
            Self::Date => "DATE",
            Self::ZipCode => "ZIPCODE",
            Self::Address => "ADDRESS",
            Self::Age => "AGE",
            Self::Name => "NAME",
            Self::ProviderName => "PROVIDER_NAME",
            Self::Vehicle => "VEHICLE",
            Self::Device => "DEVICE",
            Self::Custom => "CUSTOM",
        }
    }
}

impl std::fmt::Display for FilterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mask_label())
    }
}

impl std::str::FromStr for FilterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SSN" => Ok(Self::Ssn),
            "MRN" => Ok(Self::Mrn),
            "CREDIT_CARD" => Ok(Self::CreditCard),
            "ACCOUNT" => Ok(Self::Account),
            "LICENSE" => Ok(Self::License),
            "PASSPORT" => Ok(Self::Passport),
            "HEALTH_PLAN" => Ok(Self::HealthPlan),
            "EMAIL" => Ok(Self::Email),
            "PHONE" => Ok(Self::Phone),
            "FAX" => Ok(Self::Fax),
            "IP" => Ok(Self::Ip),
            "URL" => Ok(Self::Url),
            "DATE" => Ok(Self::Date),
            "ZIPCODE" => Ok(Self::ZipCode),
            "ADDRESS" => Ok(Self::Address),
            "AGE" => Ok(Self::Age),
            "NAME" => Ok(Self::Name),
            "PROVIDER_NAME" => Ok(Self::ProviderName),
            "VEHICLE" => Ok(Self::Vehicle),
            "DEVICE" => Ok(Self::Device),
            "CUSTOM" => Ok(Self::Custom),
            other => Err(format!("unknown filter type: {}", other)),
        }
    }
}

/// A candidate sensitive-data occurrence.
///
/// Produced by upstream detectors, mutated in place by the confidence
/// modifier engine, then consumed (one survivor per character range) by the
/// disambiguation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    /// Sensitive-data category
    pub filter_type: FilterType,

    /// Half-open start offset into the source text
    pub character_start: usize,

    /// Half-open end offset into the source text
    pub character_end: usize,

    /// The matched substring
    pub text: String,

    /// Detection confidence; held in [0, 1] after every processing step
    pub confidence: f64,

    /// Ordered nearby tokens used as context
    #[serde(default)]
    pub window: Vec<String>,

    /// Tie-break weight; defaults to the filter type's specificity
    #[serde(default)]
    pub priority: u32,

    /// Winning score, set once disambiguation picks this span
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disambiguation_score: Option<f64>,

    /// Filter types this span beat during disambiguation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ambiguous_with: Vec<FilterType>,
}

impl Span {
    /// Create a span with confidence clamped into [0, 1] and priority
    /// defaulted from the type's specificity.
    pub fn new(
        filter_type: FilterType,
        character_start: usize,
        character_end: usize,
        text: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            filter_type,
            character_start,
            character_end,
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            window: Vec::new(),
            priority: filter_type.specificity(),
            disambiguation_score: None,
            ambiguous_with: Vec::new(),
        }
    }

    /// Attach a context window.
    pub fn with_window(mut self, window: Vec<String>) -> Self {
        self.window = window;
        self
    }

    /// Override the tie-break priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Span length in bytes.
    pub fn len(&self) -> usize {
        self.character_end.saturating_sub(self.character_start)
    }

    /// True when the span covers no text.
    pub fn is_empty(&self) -> bool {
        self.character_end <= self.character_start
    }

    /// True when the two spans cover the exact same range.
    pub fn same_range(&self, other: &Span) -> bool {
        self.character_start == other.character_start && self.character_end == other.character_end
    }

    /// True when the two spans overlap at all.
    pub fn overlaps(&self, other: &Span) -> bool {
        !(self.character_end <= other.character_start
            || self.character_start >= other.character_end)
    }

    /// True when this span fully contains the other.
    pub fn contains(&self, other: &Span) -> bool {
        self.character_start <= other.character_start
            && self.character_end >= other.character_end
    }
}

/// A unit of text flowing through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Document identity, carried through hooks and results
    pub id: Uuid,

    /// Source text
    pub text: String,

    /// Optional origin label (file name, channel, stream id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Document {
    /// Create a document with a fresh identity.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            source: None,
        }
    }

    /// Attach an origin label.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Finished output of one document's pass through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionResult {
    /// Document this result belongs to
    pub document_id: Uuid,

    /// Text with surviving spans replaced
    pub redacted_text: String,

    /// Spans that survived disambiguation and were applied
    pub spans: Vec<Span>,

    /// Name of the plugin that short-circuited the pipeline, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_circuited_by: Option<String>,

    /// Wall-clock processing time in milliseconds
    pub duration_ms: u64,
}
