//! Agent-layer error types with rich miette diagnostics.
//!
//! These are the fatal faults of a run: contract violations and exhausted
//! budgets. Transient capability failures live in
//! [`crate::capability::CapabilityError`] and drive state transitions
//! instead of aborting.

use miette::Diagnostic;
use thiserror::Error;

use super::state::StateTag;

/// Errors specific to the agent layer (state machine, memory bank, narration).
#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error("unknown state transition: {from} -> {to}")]
    #[diagnostic(
        code(vantage::agent::unknown_transition),
        help(
            "The (state, outcome) pair is outside the documented transition table. \
             This is a programming-contract violation, not a model failure — it is \
             never retried. File a bug with the full state context."
        )
    )]
    UnknownTransition { from: String, to: String },

    #[error("{budget} budget exhausted after {limit} attempt(s)")]
    #[diagnostic(
        code(vantage::agent::budget_exhausted),
        help(
            "The run hit its configured retry/iteration cap without reaching a \
             terminal state. Raise the cap in EngineConfig, or inspect the \
             capability outputs to see why the loop made no progress."
        )
    )]
    BudgetExhausted { budget: &'static str, limit: usize },

    #[error("no context recorded before entering {state}")]
    #[diagnostic(
        code(vantage::agent::missing_context),
        help(
            "Logic generation, reasoning, and answering all read the knowledge \
             store that perception populates. Reaching {state} without a recorded \
             context is a contract violation."
        )
    )]
    MissingContext { state: StateTag },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Context(#[from] crate::error::ContextError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Capability(#[from] crate::capability::CapabilityError),
}

/// Convenience alias for agent operations.
pub type AgentResult<T> = std::result::Result<T, AgentError>;
