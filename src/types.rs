//! Shared types for the POWA dev server.
//!
//! The request payload, the events streamed back to the browser and the
//! error taxonomy all live here so the engine and the HTTP layer can depend
//! on them without depending on each other.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

/// Largest accepted `revenueAmount`.
pub const MAX_REVENUE_AMOUNT: f64 = 1e12;

/// Largest accepted number of entries in `epochs`.
pub const MAX_EPOCHS: usize = 20;

// ---------------------------------------------------------------------------
// Simulation config
// ---------------------------------------------------------------------------

/// A validated simulation configuration as posted by the browser.
///
/// Only `revenueAmount`, `epochs` and `userHoldings` are inspected. Every
/// other field is kept verbatim so the file handed to forge matches what
/// the client sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SimulationConfig {
    fields: Map<String, Value>,
}

impl SimulationConfig {
    /// Parse and validate a raw request body.
    pub fn from_slice(body: &[u8]) -> Result<Self, ValidationError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ValidationError::MalformedBody(e.to_string()))?;
        Self::validate(value)
    }

    /// Validate an already-parsed body, returning it unchanged on success.
    pub fn validate(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(fields) = value else {
            return Err(ValidationError::NotAnObject);
        };

        let revenue = fields.get("revenueAmount").unwrap_or(&Value::Null);
        if !is_truthy(revenue) {
            return Err(ValidationError::MissingRevenueAmount);
        }
        let amount = revenue
            .as_f64()
            .ok_or(ValidationError::RevenueAmountNotNumber)?;
        if amount <= 0.0 {
            return Err(ValidationError::RevenueAmountNotPositive(amount));
        }
        if amount > MAX_REVENUE_AMOUNT {
            return Err(ValidationError::RevenueAmountTooLarge(amount));
        }

        match fields.get("epochs") {
            None | Some(Value::Null) => return Err(ValidationError::MissingEpochs),
            Some(Value::Array(epochs)) if epochs.len() > MAX_EPOCHS => {
                return Err(ValidationError::TooManyEpochs(epochs.len()));
            }
            Some(Value::Array(_)) => {}
            Some(_) => return Err(ValidationError::EpochsNotArray),
        }

        Ok(Self { fields })
    }

    pub fn revenue_amount(&self) -> f64 {
        self.fields
            .get("revenueAmount")
            .and_then(Value::as_f64)
            .unwrap_or_default()
    }

    pub fn epoch_count(&self) -> usize {
        self.fields
            .get("epochs")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }

    /// Whether the client supplied per-user holdings (`null` counts as absent).
    pub fn has_user_holdings(&self) -> bool {
        self.fields
            .get("userHoldings")
            .is_some_and(|v| !v.is_null())
    }

    /// Which forge test this configuration should run.
    pub fn test_target(&self) -> TestTarget {
        if self.has_user_holdings() {
            TestTarget::Scenario
        } else {
            TestTarget::Distribution
        }
    }
}

/// JavaScript truthiness, which is what the browser client was written against.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Test target
// ---------------------------------------------------------------------------

/// The forge test function selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestTarget {
    /// Replays explicit user holdings.
    Scenario,
    /// Checks the reward distribution across epochs.
    Distribution,
}

impl TestTarget {
    /// Name passed to `forge test --match-test`.
    pub fn test_name(self) -> &'static str {
        match self {
            TestTarget::Scenario => "testScenario",
            TestTarget::Distribution => "testDistribution",
        }
    }
}

impl fmt::Display for TestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.test_name())
    }
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// One message on the `/run-test` event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Start,
    Stdout { data: String },
    Stderr { data: String },
    /// `code` is `None` when the process was ended by a signal.
    Complete { code: Option<i32> },
    Error { error: String },
}

impl StreamEvent {
    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            error: message.into(),
        }
    }

    /// `complete` and `error` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}

/// Which pipe a line of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Stdout,
    Stderr,
}

impl OutputKind {
    pub fn event(self, line: String) -> StreamEvent {
        match self {
            OutputKind::Stdout => StreamEvent::Stdout { data: line },
            OutputKind::Stderr => StreamEvent::Stderr { data: line },
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Stdout => write!(f, "stdout"),
            OutputKind::Stderr => write!(f, "stderr"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// A request body the server refuses to run. Always the client's fault.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid configuration format: malformed JSON ({0})")]
    MalformedBody(String),

    #[error("Invalid configuration format: body must be a JSON object")]
    NotAnObject,

    #[error("Invalid configuration format: revenueAmount is required")]
    MissingRevenueAmount,

    #[error("Invalid configuration format: revenueAmount must be a number")]
    RevenueAmountNotNumber,

    #[error("Invalid configuration format: revenueAmount must be positive (got {0})")]
    RevenueAmountNotPositive(f64),

    #[error("Invalid configuration format: revenueAmount {0} exceeds 1e12")]
    RevenueAmountTooLarge(f64),

    #[error("Invalid configuration format: epochs is required")]
    MissingEpochs,

    #[error("Invalid configuration format: epochs must be an array")]
    EpochsNotArray,

    #[error("Invalid configuration format: {0} epochs given, at most 20 allowed")]
    TooManyEpochs(usize),
}

/// Failures while running a forge test.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to write config to {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for test process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Test timed out after {secs} seconds")]
    Timeout { secs: u64 },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
