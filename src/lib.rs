//! # vantage
//!
//! An agent execution engine for iterative visual grounding: given an image
//! and a natural-language query, an agent invokes perception, logic
//! synthesis, logic reasoning, and verification capabilities until it
//! produces a bounding region or exhausts its retry budget.
//!
//! ## Architecture
//!
//! - **Knowledge store** (`context`): entities, relations, attributes
//!   accumulated across one run
//! - **State machine** (`agent`): tagged states carrying exactly the data
//!   the next capability needs, plus narration over state pairs
//! - **Capability adapters** (`capability`): narrow contracts to the
//!   external perception/language models
//! - **Session layer** (`session`): concurrent agent runs streaming their
//!   reasoning to observers
//! - **Batch runner** (`batch`): resumable offline evaluation over JSONL
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use vantage::agent::Agent;
//! use vantage::capability::{ImageRef, remote::Gateway};
//! use vantage::config::EngineConfig;
//!
//! let config = EngineConfig::default();
//! let suite = Arc::new(Gateway::suite(&config.gateway));
//! let mut agent = Agent::new(
//!     ImageRef("scene.jpg".into()),
//!     "the dog on the sofa",
//!     suite,
//!     &config,
//! );
//! let result = agent.run().unwrap();
//! ```

pub mod agent;
pub mod batch;
pub mod capability;
pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod event;
pub mod session;
