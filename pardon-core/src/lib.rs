//! Pattern language, schema algebra and evaluation scope shared by every
//! crate in the workspace.
//!
//! This crate has no knowledge of HTTP, `.https` files, or endpoint
//! configuration — those live in `pardon-https` and `pardon`. It implements
//! only the four schema operations (`scope`, `merge`, `render`, `resolve`)
//! and the scope/context machinery they run under.

#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod pattern;
pub mod schema;
pub mod scope;

pub use context::{Context, Mode, Phase};
pub use error::{Diagnostic, PardonError};
pub use pattern::{Hint, Hole, Lookup, Pattern, Segment, REDACTED};
pub use schema::{CustomSchema, DeferredArm, DeferredRule, Encoding, ScalarType, SchemaNode};
pub use scope::{Binding, EvaluationScope, FrameId, ScopeLabel, ScopeLookup};
