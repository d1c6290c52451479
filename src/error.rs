//! Rich diagnostic error types for the vantage engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the vantage engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum VantageError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Capability(#[from] crate::capability::CapabilityError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Agent(#[from] crate::agent::AgentError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] crate::session::SessionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Batch(#[from] BatchError),
}

// ---------------------------------------------------------------------------
// Context errors
// ---------------------------------------------------------------------------

/// Referential-integrity faults in the knowledge store. These are contract
/// violations: a capability produced a malformed observation set, and the run
/// must fail rather than carry dangling references forward.
#[derive(Debug, Error, Diagnostic)]
pub enum ContextError {
    #[error("relation \"{relation_name}\" references missing entity {entity_id}")]
    #[diagnostic(
        code(vantage::context::dangling_relation),
        help(
            "Every relation endpoint must reference an entity present in the same \
             perception result. The perception capability emitted a relation whose \
             subject or object id is absent — this result set cannot be recorded."
        )
    )]
    DanglingRelation {
        relation_name: String,
        entity_id: u64,
    },

    #[error("attribute \"{attribute_name}\" references missing entity {entity_id}")]
    #[diagnostic(
        code(vantage::context::dangling_attribute),
        help(
            "Attributes may only describe entities present in the same perception \
             result. Check the perception capability's output."
        )
    )]
    DanglingAttribute {
        attribute_name: String,
        entity_id: u64,
    },

    #[error("duplicate entity id {entity_id} in one perception result")]
    #[diagnostic(
        code(vantage::context::duplicate_entity),
        help(
            "Entity ids must be unique within a perception result; they identify \
             entities for the life of the run."
        )
    )]
    DuplicateEntity { entity_id: u64 },

    #[error("attribute \"{attribute_name}\" has probability {prob} outside [0, 1]")]
    #[diagnostic(
        code(vantage::context::invalid_probability),
        help("Attribute probabilities are calibrated to [0, 1]. Fix the capability output.")
    )]
    InvalidProbability { attribute_name: String, prob: f32 },
}

/// Convenience alias for knowledge-store operations.
pub type ContextResult<T> = std::result::Result<T, ContextError>;

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("cannot read config file \"{path}\": {source}")]
    #[diagnostic(
        code(vantage::config::io),
        help("Check that the path exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file \"{path}\": {message}")]
    #[diagnostic(
        code(vantage::config::parse),
        help("The file must be valid TOML matching the EngineConfig schema.")
    )]
    Parse { path: String, message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(vantage::config::invalid),
        help("Check the EngineConfig fields. {message}")
    )]
    Invalid { message: String },
}

// ---------------------------------------------------------------------------
// Batch errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum BatchError {
    #[error("I/O error on \"{path}\": {source}")]
    #[diagnostic(
        code(vantage::batch::io),
        help(
            "A batch file operation failed. Check that the task file exists and \
             that the result path is writable."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record at {path}:{line}: {message}")]
    #[diagnostic(
        code(vantage::batch::record),
        help(
            "Each line must be one JSON object. Fix or remove the offending line; \
             completed tasks before it are still honored on resume."
        )
    )]
    Record {
        path: String,
        line: usize,
        message: String,
    },
}

/// Convenience alias for functions returning vantage results.
pub type VantageResult<T> = std::result::Result<T, VantageError>;
