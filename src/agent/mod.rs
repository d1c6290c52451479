//! The agent layer: state machine, memory bank, step execution, narration.
//!
//! An [`Agent`] couples one (image, query) task to its current [`State`] and
//! [`MemoryBank`] and exposes a single step-and-advance operation. The
//! [`narrate`] module derives observer-facing descriptions of upcoming
//! transitions from pairs of states.

pub mod agent;
pub mod error;
pub mod memory;
pub mod narrate;
pub mod state;

pub use agent::{Agent, StepOutcome};
pub use error::{AgentError, AgentResult};
pub use memory::MemoryBank;
pub use state::{State, StateTag};
