// src/lib.rs

//! bbmerge: multicall binary merger
//!
//! Merges independently written Rust command-line programs into one
//! busybox-style binary that behaves as whichever program it is invoked as.
//!
//! # Architecture
//!
//! - Loader: parses each program's module tree with `syn` and resolves
//!   module-level names
//! - Transformer: lifts `fn main`, `#[ctor]` functions and `#[ctor]` statics
//!   into lifecycle procedures registered under the program's name
//! - Normalizer: reconciles `use` declarations and dependencies, renders
//!   through `prettyplease`, re-parses everything it emits
//! - Orchestrator: drives the pipeline and writes the merged crate
//! - Registry: the runtime every merged binary links against
//!
//! Only [`registry`] is compiled without the default `merger` feature, so a
//! merged binary depends on nothing but the runtime.

pub mod registry;

#[cfg(feature = "merger")]
pub mod config;
#[cfg(feature = "merger")]
mod error;
#[cfg(feature = "merger")]
pub mod loader;
#[cfg(feature = "merger")]
pub mod manifest;
#[cfg(feature = "merger")]
pub mod normalize;
#[cfg(feature = "merger")]
pub mod orchestrator;
#[cfg(feature = "merger")]
pub mod transform;

#[cfg(feature = "merger")]
pub use config::{MergeConfig, MissingEntryPolicy, TargetArch};
#[cfg(feature = "merger")]
pub use error::{Error, Result, Stage};
#[cfg(feature = "merger")]
pub use orchestrator::{expand_patterns, MergeReport, Merger, ProgramSource};
