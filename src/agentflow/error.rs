//! Engine-wide error taxonomy and log redaction.
//!
//! Every failure that crosses a component boundary is classified into one of
//! the [`EngineError`] variants so that callers can make retry/surface
//! decisions without string matching. Handlers never leak raw errors across
//! the dispatcher boundary; anything unclassified becomes a
//! `HandlerResult { status: error }` (see [`crate::dispatcher`]).
//!
//! `RequiresUserInput` is deliberately *not* part of this taxonomy: it is a
//! signal, not a fault, and is modelled as a variant of
//! [`DispatchOutcome`](crate::dispatcher::DispatchOutcome).

use crate::agentflow::validation::ValidationResult;
use std::error::Error;
use std::fmt;

/// Classified failures surfaced by the engine core.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// A handler, flow, model, or trigger registration was not found.
    /// Never retried. Carries the keys that were attempted and the
    /// candidates that exist, to make typos obvious in logs.
    NotFound {
        kind: &'static str,
        name: String,
        attempted: Vec<String>,
        available: Vec<String>,
    },
    /// Parameter validation failed for a handler. Fatal to the current
    /// dispatch; the agent may plan around it on the next turn.
    Validation {
        handler: String,
        result: ValidationResult,
    },
    /// A handler constructor panicked or refused to build.
    Instantiation { handler: String, message: String },
    /// Missing or invalid credentials. Never retried.
    Auth(String),
    /// Upstream throttling (429 or an explicit rate-limit header).
    RateLimited { retry_after_secs: Option<u64> },
    /// Network errors, 5xx responses, timeouts. Retryable with backoff.
    Transient(String),
    /// Configuration is missing or malformed at startup.
    Config(String),
    /// Unclassified. Logged with full context and converted to a
    /// handler-result error at the dispatcher boundary.
    Fatal(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NotFound {
                kind,
                name,
                attempted,
                available,
            } => write!(
                f,
                "{} not found: '{}' (tried {:?}; available: {:?})",
                kind, name, attempted, available
            ),
            EngineError::Validation { handler, result } => {
                write!(f, "parameter validation failed for '{}'", handler)?;
                if !result.missing_required.is_empty() {
                    write!(f, "; missing required: {:?}", result.missing_required)?;
                }
                if !result.invalid_types.is_empty() {
                    write!(f, "; invalid types: {:?}", result.invalid_types)?;
                }
                if !result.unexpected.is_empty() {
                    write!(f, "; unexpected: {:?}", result.unexpected)?;
                }
                Ok(())
            }
            EngineError::Instantiation { handler, message } => {
                write!(f, "failed to instantiate handler '{}': {}", handler, message)
            }
            EngineError::Auth(msg) => write!(f, "authentication error: {}", msg),
            EngineError::RateLimited { retry_after_secs } => match retry_after_secs {
                Some(secs) => write!(f, "rate limited (retry after {}s)", secs),
                None => write!(f, "rate limited"),
            },
            EngineError::Transient(msg) => write!(f, "transient error: {}", msg),
            EngineError::Config(msg) => write!(f, "configuration error: {}", msg),
            EngineError::Fatal(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error for EngineError {}

impl EngineError {
    /// True for errors worth retrying with exponential delay.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::RateLimited { .. } | EngineError::Transient(_)
        )
    }
}

/// Keywords whose presence in a key marks the value as secret.
const SECRET_KEYWORDS: &[&str] = &[
    "password",
    "token",
    "secret",
    "key",
    "auth",
    "credential",
    "api_key",
];

/// Replace secret-looking values in a JSON tree with `"***"`.
///
/// Matching is by key substring, case-insensitive, applied recursively so
/// nested credential maps are covered too. Always call this before a
/// parameter map reaches a log line or an error envelope.
pub fn redact_secrets(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                let lowered = k.to_lowercase();
                let is_secret = SECRET_KEYWORDS.iter().any(|kw| lowered.contains(kw));
                if is_secret {
                    out.insert(k.clone(), serde_json::Value::String("***".into()));
                } else {
                    out.insert(k.clone(), redact_secrets(v));
                }
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(redact_secrets).collect())
        }
        other => other.clone(),
    }
}
