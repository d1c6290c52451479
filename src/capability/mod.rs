//! Capability adapters: the narrow contracts through which the engine
//! invokes perception, logic synthesis, logic reasoning, and verification.
//!
//! Adapters never see the state machine; they receive exactly the data the
//! current state carries and report typed results plus token usage. All
//! adapter failures are [`CapabilityError`] — transient, expected, and
//! handled by a defined state transition — as opposed to the fatal
//! contract-violation errors in [`crate::agent`].

pub mod remote;

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::{Attribute, Context, Entity, Relation};
use crate::cost::TokenUsage;

// ── Errors ───────────────────────────────────────────────────────────────

/// Transient failure of an external capability.
#[derive(Debug, Error, Diagnostic)]
pub enum CapabilityError {
    #[error("capability \"{capability}\" transport failure: {message}")]
    #[diagnostic(
        code(vantage::capability::transport),
        help(
            "The model gateway could not be reached or closed the connection. \
             Check that the gateway is running and the configured URL is correct."
        )
    )]
    Transport { capability: String, message: String },

    #[error("capability \"{capability}\" returned a malformed response: {message}")]
    #[diagnostic(
        code(vantage::capability::malformed),
        help(
            "The gateway answered, but the payload did not match the capability \
             contract. Check that engine and gateway versions agree."
        )
    )]
    Malformed { capability: String, message: String },

    #[error("capability \"{capability}\" failed: {message}")]
    #[diagnostic(
        code(vantage::capability::failed),
        help("The model reported an execution failure. The engine may retry per its transition table.")
    )]
    Failed { capability: String, message: String },
}

/// Convenience alias for capability invocations.
pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;

// ── Task input ───────────────────────────────────────────────────────────

/// Reference to the image a run operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef(pub PathBuf);

impl ImageRef {
    pub fn path(&self) -> &std::path::Path {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<PathBuf> for ImageRef {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

// ── Result shapes ────────────────────────────────────────────────────────

/// A capability result together with the usage it cost.
#[derive(Debug, Clone)]
pub struct Metered<T> {
    pub value: T,
    pub usage: TokenUsage,
}

impl<T> Metered<T> {
    pub fn new(value: T, usage: TokenUsage) -> Self {
        Self { value, usage }
    }

    /// A result that cost nothing (local fallbacks, cached answers).
    pub fn free(value: T) -> Self {
        Self {
            value,
            usage: TokenUsage::default(),
        }
    }
}

/// Everything one perception pass observed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerceptionOutput {
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

/// Outcome of verifying a candidate against the user query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ── Adapter traits ───────────────────────────────────────────────────────

/// Open-vocabulary scene perception: entities, relations, attributes.
///
/// An empty entity set is a valid observation, not an error.
pub trait Perceiver: Send + Sync {
    fn perceive(&self, image: &ImageRef) -> CapabilityResult<Metered<PerceptionOutput>>;
}

/// Query-conditioned single-shot detection, used when open perception finds
/// nothing. May legitimately find nothing either.
pub trait FallbackPerceiver: Send + Sync {
    fn locate(&self, image: &ImageRef, query: &str) -> CapabilityResult<Metered<Option<Entity>>>;
}

/// Synthesizes an executable logic query from the user query and the current
/// context, optionally steered by feedback from failed verification.
pub trait LogicGenerator: Send + Sync {
    fn generate(
        &self,
        query: &str,
        context: &Context,
        feedback: Option<&str>,
    ) -> CapabilityResult<Metered<String>>;
}

/// Evaluates a logic query over the context, skipping the `skip_top`
/// best-ranked candidates that were already rejected.
pub trait LogicReasoner: Send + Sync {
    fn reason(
        &self,
        logic_query: &str,
        context: &Context,
        skip_top: usize,
    ) -> CapabilityResult<Metered<Option<Entity>>>;
}

/// Final verification of a candidate entity against the user query.
pub trait Answerer: Send + Sync {
    fn verify(
        &self,
        candidate: &Entity,
        query: &str,
        context: &Context,
    ) -> CapabilityResult<Metered<Verdict>>;
}

// ── Suite ────────────────────────────────────────────────────────────────

/// The full set of adapters one agent run invokes.
///
/// Bundled so the engine takes a single handle; each field is a trait object
/// so deployments can mix gateway-backed and local implementations.
pub struct CapabilitySuite {
    pub perceiver: Box<dyn Perceiver>,
    pub fallback: Box<dyn FallbackPerceiver>,
    pub generator: Box<dyn LogicGenerator>,
    pub reasoner: Box<dyn LogicReasoner>,
    pub answerer: Box<dyn Answerer>,
}

impl fmt::Debug for CapabilitySuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilitySuite").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metered_free_reports_zero_usage() {
        let m = Metered::free(42u32);
        assert_eq!(m.value, 42);
        assert_eq!(m.usage, TokenUsage::default());
    }

    #[test]
    fn perception_output_deserializes_without_optional_fields() {
        let json = r#"{"entities": []}"#;
        let output: PerceptionOutput = serde_json::from_str(json).unwrap();
        assert!(output.entities.is_empty());
        assert!(output.relations.is_empty());
        assert!(output.attributes.is_empty());
    }

    #[test]
    fn verdict_reason_is_optional() {
        let verdict: Verdict = serde_json::from_str(r#"{"confirmed": true}"#).unwrap();
        assert!(verdict.confirmed);
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn capability_error_display_names_the_capability() {
        let err = CapabilityError::Transport {
            capability: "perception".into(),
            message: "connection refused".into(),
        };
        assert!(format!("{err}").contains("perception"));
    }
}
