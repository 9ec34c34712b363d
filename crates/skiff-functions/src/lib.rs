//! Skiff function contract and registry
//!
//! Blueprint phases name a function; this crate defines what a function
//! is, how it is registered, and what it sees when it runs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            FuncRegistry                 │
//! │  ┌─────────────────────────────────┐    │
//! │  │   name -> Arc<dyn Func>         │    │
//! │  │   Wait | Output | ...           │    │
//! │  └─────────────────────────────────┘    │
//! │                  │                      │
//! │                  ▼                      │
//! │  ┌─────────────────────────────────┐    │
//! │  │   Func::exec(ctx, params, args) │    │
//! │  │  - FuncContext (cancellation)   │    │
//! │  │  - ProgressReporter             │    │
//! │  │  - FuncOutput                   │    │
//! │  └─────────────────────────────────┘    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use skiff_functions::{register_builtins, FuncContext, FuncRegistry, TemplateParams};
//!
//! let registry = FuncRegistry::new();
//! register_builtins(&registry)?;
//! let wait = registry.require("Wait")?;
//! let ctx = FuncContext::new("backup-1", "default", "pause");
//! wait.exec(&ctx, &TemplateParams::default(), &args).await?;
//! ```

pub mod args;
pub mod builtin;
pub mod context;
pub mod error;
pub mod params;
pub mod progress;
pub mod registry;
pub mod traits;

pub use builtin::register_builtins;
pub use context::*;
pub use error::*;
pub use params::*;
pub use progress::*;
pub use registry::*;
pub use traits::*;
