//! Developer tooling: a devtools-style inspector that attaches to an engine
//! like any other observer.
//!
//! # Invariants
//! - Tools never write state; they observe through a binding and read
//!   through the engine.

mod inspector;

pub use inspector::{ChangeRecord, PathInfo, StateInspector, StateSummary};
