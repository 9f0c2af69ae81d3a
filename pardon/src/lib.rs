//! Bidirectional, schema-directed HTTP request template engine.
//!
//! This crate wires `pardon-core`'s pattern/schema/scope algebra and
//! `pardon-https`'s file parser together with an expression host and secret
//! store to produce a runnable endpoint environment.

#![warn(clippy::all)]

pub mod endpoint;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod expression;
pub mod fetch;
pub mod lookup;
pub mod secrets;

pub use endpoint::{Default, Endpoint};
pub use engine::{Build, Engine};
pub use envelope::{RequestEnvelope, ResponseEnvelope};
pub use error::PardonEngineError;
pub use expression::{Expression, MapScriptEnvironment, NullScriptEnvironment, ScriptEnvironment};
pub use fetch::Fetch;
pub use lookup::EngineLookup;
pub use secrets::{ScopedSecrets, Secrets};
