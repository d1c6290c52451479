//! The agent's state machine vocabulary.
//!
//! [`State`] is a closed sum type: each variant carries exactly the data its
//! capability invocation needs, and a new value is constructed on every
//! transition — states are never mutated in place. Exhaustive matching over
//! the variants is what makes the transition table checkable for
//! completeness.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::Entity;

/// Where the agent is in its run and what the next capability call needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum State {
    /// Open-vocabulary scene perception.
    Perception,
    /// Synthesize a logic query, optionally steered by verification feedback.
    LogicGeneration { feedback: Option<String> },
    /// Evaluate the logic query, skipping `skip_top` already-rejected
    /// candidates.
    LogicReasoning { logic_query: String, skip_top: usize },
    /// Verify a candidate. `logic_query` is carried so a rejection can
    /// re-enter reasoning; it is `None` on the single-entity and fallback
    /// paths, which have no logic to re-run.
    Answering {
        candidate: Option<Entity>,
        logic_query: Option<String>,
        skip_top: usize,
    },
}

impl State {
    pub fn tag(&self) -> StateTag {
        match self {
            State::Perception => StateTag::Perception,
            State::LogicGeneration { .. } => StateTag::LogicGeneration,
            State::LogicReasoning { .. } => StateTag::LogicReasoning,
            State::Answering { .. } => StateTag::Answering,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Perception => write!(f, "Perception"),
            State::LogicGeneration { feedback } => {
                write!(
                    f,
                    "LogicGeneration(feedback: {})",
                    if feedback.is_some() { "some" } else { "none" }
                )
            }
            State::LogicReasoning {
                logic_query,
                skip_top,
            } => write!(
                f,
                "LogicReasoning(query: {logic_query:?}, skip_top: {skip_top})"
            ),
            State::Answering {
                candidate,
                logic_query,
                skip_top,
            } => write!(
                f,
                "Answering(candidate: {}, logic_query: {}, skip_top: {skip_top})",
                candidate
                    .as_ref()
                    .map(|e| format!("#{}", e.id))
                    .unwrap_or_else(|| "none".into()),
                if logic_query.is_some() { "some" } else { "none" },
            ),
        }
    }
}

/// Variant-only discriminant, used for state history and event snapshots.
///
/// `Output` is a synthetic tag appended to the history once a run terminates;
/// it is never a live [`State`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateTag {
    Perception,
    LogicGeneration,
    LogicReasoning,
    Answering,
    Output,
}

impl fmt::Display for StateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Perception => write!(f, "Perception"),
            Self::LogicGeneration => write!(f, "LogicGeneration"),
            Self::LogicReasoning => write!(f, "LogicReasoning"),
            Self::Answering => write!(f, "Answering"),
            Self::Output => write!(f, "Output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_variants() {
        assert_eq!(State::Perception.tag(), StateTag::Perception);
        assert_eq!(
            State::LogicGeneration { feedback: None }.tag(),
            StateTag::LogicGeneration
        );
        assert_eq!(
            State::LogicReasoning {
                logic_query: "q".into(),
                skip_top: 0
            }
            .tag(),
            StateTag::LogicReasoning
        );
        assert_eq!(
            State::Answering {
                candidate: None,
                logic_query: None,
                skip_top: 0
            }
            .tag(),
            StateTag::Answering
        );
    }

    #[test]
    fn state_serializes_with_tag_field() {
        let state = State::LogicReasoning {
            logic_query: "above(dog, sofa)".into(),
            skip_top: 2,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "LogicReasoning");
        assert_eq!(json["skip_top"], 2);
    }

    #[test]
    fn display_elides_payload_details() {
        let state = State::Answering {
            candidate: None,
            logic_query: Some("q".into()),
            skip_top: 1,
        };
        let text = state.to_string();
        assert!(text.contains("candidate: none"));
        assert!(text.contains("skip_top: 1"));
    }
}
