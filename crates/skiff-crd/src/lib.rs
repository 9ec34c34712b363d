//! Skiff resource types
//!
//! This crate provides the custom resource types the orchestration engine
//! reads and writes through the cluster API.
//!
//! # API Group
//!
//! All types use the `cr.skiff.dev/v1alpha1` API group.
//!
//! # Resources
//!
//! - `Blueprint` - Reusable, named sequences of function-backed phases
//! - `ActionSet` - A run request naming target objects and blueprints,
//!   plus the execution record the controller maintains in its status
//!
//! Argument and output maps use the tagged-union [`Value`] type so that
//! arbitrary blueprint arguments stay typed end to end.

pub mod actionset;
pub mod blueprint;
pub mod error;
pub mod metadata;
pub mod value;

pub use actionset::*;
pub use blueprint::*;
pub use error::*;
pub use metadata::*;
pub use value::*;

/// API version for all Skiff resources
pub const API_VERSION: &str = "cr.skiff.dev/v1alpha1";

/// API group for all Skiff resources
pub const API_GROUP: &str = "cr.skiff.dev";

/// API version string
pub const VERSION: &str = "v1alpha1";
