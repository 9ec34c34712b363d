//! Skiff orchestration engine
//!
//! This crate drives ActionSets to completion. It resolves blueprint
//! actions into function-backed phases, runs them in order, records
//! progress, and keeps every status write consistent under concurrent
//! writers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Controller                        │
//! │   Added | Updated | Deleted  ->  state machine      │
//! └─────────────────────────────────────────────────────┘
//!          │                               │
//!          ▼                               ▼
//! ┌──────────────────────┐     ┌──────────────────────────┐
//! │      Resolver        │     │   Execution units        │
//! │  blueprint + params  │     │  one per action, phases  │
//! │  -> bound phases     │     │  in order, then deferred │
//! └──────────────────────┘     └──────────────────────────┘
//!                                          │
//!                                          ▼
//! ┌─────────────────────────────────────────────────────┐
//! │        reconcile::action_set  (CAS + validate)      │
//! └─────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────┐
//! │              ActionSetStore                         │
//! │          Memory | Kubernetes API                    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use skiff_engine::{Controller, ControllerConfig, MemoryStore, Resolver};
//! use skiff_functions::{register_builtins, FuncRegistry};
//! use std::sync::Arc;
//!
//! let registry = FuncRegistry::new();
//! register_builtins(&registry)?;
//! let controller = Arc::new(Controller::new(
//!     Arc::new(MemoryStore::new()),
//!     Resolver::new(Arc::new(registry)),
//!     ControllerConfig::new("apps"),
//! ));
//! controller.run(shutdown).await?;
//! ```

pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod params;
pub mod progress;
pub mod reconcile;
pub mod render;
pub mod resolver;
pub mod store;
pub mod validate;

pub use cluster::KubeStore;
pub use config::ControllerConfig;
pub use controller::Controller;
pub use error::*;
pub use resolver::{ResolvedAction, Resolver};
pub use store::*;
