//! Shared building blocks: dot-path resolution over JSON trees, structural
//! comparison, and the identifier types used by the kernel.
//!
//! # Invariants
//! - Path reads never fail; absence is `None`.
//! - Path writes only touch the addressed location.

pub mod path;
pub mod types;
pub mod value;

pub use path::{PathError, PathResolver};
pub use types::{ChangedKeys, ListenerId};
pub use value::{deep_merge, structurally_equal};
