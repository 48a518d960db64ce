//! State kernel: the authoritative state tree, its change detection, and the
//! subscriber notification that follows every write.
//!
//! # Invariants
//! - Every write publishes a new tree; a published tree is never mutated.
//! - A write with no structural change neither persists nor notifies.
//! - Persistence runs before notification; key subscribers before global ones.
//! - Single-threaded: the engine is `!Send` and never suspends.

pub mod binding;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;

pub use binding::{Binding, StateObserver};
pub use config::EngineConfig;
pub use engine::{StateEngine, StateUpdate};
pub use error::KernelError;
pub use registry::{KeyScope, Listener, Subscription, SubscriptionRegistry};
