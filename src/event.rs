//! Structured event protocol for session observers.
//!
//! A [`SessionEvent`] is one message on a session's event stream: the
//! agent's narrated thinking, the action it is about to take, a state
//! snapshot, the terminal result with its context, or an error. Events
//! serialize with a `type` tag so transports can forward them verbatim.

use serde::{Deserialize, Serialize};

use crate::agent::StateTag;
use crate::context::{Context, Entity};

/// One message on a session's event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Narrated reasoning ahead of the next transition.
    Thinking { content: String },
    /// The capability invocation the agent is about to perform.
    Action { content: String },
    /// Snapshot of the state machine: the state about to execute plus the
    /// realized history.
    StateInfo {
        current_state: Option<StateTag>,
        history: Vec<StateTag>,
    },
    /// Terminal result. `entity` is `None` when the target was not found.
    Result {
        entity: Option<Entity>,
        content: String,
    },
    /// Full knowledge-store snapshot, published once after the result.
    Context { context: Context },
    /// Run-level failure or cancellation.
    Error { code: String, message: String },
}

impl SessionEvent {
    pub fn thinking(content: impl Into<String>) -> Self {
        Self::Thinking {
            content: content.into(),
        }
    }

    pub fn action(content: impl Into<String>) -> Self {
        Self::Action {
            content: content.into(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}
