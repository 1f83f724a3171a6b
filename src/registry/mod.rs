// src/registry/mod.rs

//! Runtime dispatch registry for merged multicall binaries
//!
//! Every transformed program registers its lifecycle procedures here when
//! the merged binary starts. Once every program has registered, the
//! registry is frozen and exactly one program is dispatched per process.
//!
//! # Lifecycle
//!
//! For a program name the registry keeps three ordered lists:
//!
//! - **var-init**: deferred initializers of the program's `#[ctor]` statics
//! - **init**: the program's `#[ctor]` functions, in original order
//! - **entry**: the program's `main`, exactly one
//!
//! `FrozenRegistry::run` executes them in that order and nothing else.
//!
//! This module is compiled without the `merger` feature so merged binaries
//! only pay for the runtime.

mod deferred;
mod dispatch;

pub use deferred::{args, args_os, Deferred};
pub use dispatch::{install, Dispatcher, InstallReport, Invocation};

use std::collections::BTreeMap;
use std::process::ExitCode;
use thiserror::Error;
use tracing::debug;

/// A zero-argument lifecycle procedure (var-init or init stage)
pub type Procedure = fn();

/// A program's entry procedure, reporting the process exit status
pub type EntryProcedure = fn() -> ExitCode;

/// Errors raised while registering lifecycle procedures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("program {0:?} has multiple entry procedures")]
    DuplicateEntry(String),
}

/// Errors raised while dispatching to a program
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("{name}: program not found")]
    NotFound {
        /// The invocation name that was looked up
        name: String,
        /// Every name with a registered entry procedure, sorted
        valid: Vec<String>,
    },
}

/// Lifecycle procedures registered under one program name
#[derive(Debug, Default, Clone)]
pub struct Lifecycle {
    var_inits: Vec<Procedure>,
    inits: Vec<Procedure>,
    entry: Option<EntryProcedure>,
}

impl Lifecycle {
    /// Registered var-init procedures, in registration order
    pub fn var_inits(&self) -> &[Procedure] {
        &self.var_inits
    }

    /// Registered init procedures, in registration order
    pub fn inits(&self) -> &[Procedure] {
        &self.inits
    }

    /// The entry procedure, if one was registered
    pub fn entry(&self) -> Option<EntryProcedure> {
        self.entry
    }
}

/// Mutable registry used while the merged binary registers its programs
#[derive(Debug, Default)]
pub struct Registry {
    programs: BTreeMap<String, Lifecycle>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a var-init procedure for `name`
    pub fn register_var_init(&mut self, name: &str, procedure: Procedure) {
        self.lifecycle_mut(name).var_inits.push(procedure);
    }

    /// Append an init procedure for `name`
    pub fn register_init(&mut self, name: &str, procedure: Procedure) {
        self.lifecycle_mut(name).inits.push(procedure);
    }

    /// Record the entry procedure for `name`
    ///
    /// Fails if `name` already has an entry procedure.
    pub fn try_register_entry(
        &mut self,
        name: &str,
        procedure: EntryProcedure,
    ) -> Result<(), RegistryError> {
        let lifecycle = self.lifecycle_mut(name);
        if lifecycle.entry.is_some() {
            return Err(RegistryError::DuplicateEntry(name.to_string()));
        }
        lifecycle.entry = Some(procedure);
        Ok(())
    }

    /// Record the entry procedure for `name`, aborting on a duplicate
    ///
    /// A program may only have one entry procedure. A second registration
    /// means the merged binary was assembled incorrectly, so this panics.
    pub fn register_entry(&mut self, name: &str, procedure: EntryProcedure) {
        if let Err(e) = self.try_register_entry(name, procedure) {
            panic!("{}", e);
        }
    }

    /// Look up the lifecycle registered for `name`
    pub fn get(&self, name: &str) -> Option<&Lifecycle> {
        self.programs.get(name)
    }

    /// Stop accepting registrations
    pub fn freeze(self) -> FrozenRegistry {
        debug!("Registry frozen with {} program(s)", self.programs.len());
        FrozenRegistry {
            programs: self.programs,
        }
    }

    fn lifecycle_mut(&mut self, name: &str) -> &mut Lifecycle {
        self.programs.entry(name.to_string()).or_default()
    }
}

/// Read-only registry consulted at the single dispatch point
#[derive(Debug)]
pub struct FrozenRegistry {
    programs: BTreeMap<String, Lifecycle>,
}

impl FrozenRegistry {
    /// Names with a registered entry procedure, sorted
    pub fn names(&self) -> Vec<&str> {
        self.programs
            .iter()
            .filter(|(_, lifecycle)| lifecycle.entry.is_some())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Check whether `name` can be dispatched
    pub fn contains(&self, name: &str) -> bool {
        self.programs
            .get(name)
            .is_some_and(|lifecycle| lifecycle.entry.is_some())
    }

    /// Run the var-init, init and entry procedures of `name`
    ///
    /// Lookup is by exact name only.
    pub fn run(&self, name: &str) -> Result<ExitCode, DispatchError> {
        let Some((lifecycle, entry)) = self
            .programs
            .get(name)
            .and_then(|lifecycle| lifecycle.entry.map(|entry| (lifecycle, entry)))
        else {
            return Err(DispatchError::NotFound {
                name: name.to_string(),
                valid: self.names().into_iter().map(String::from).collect(),
            });
        };

        debug!(
            "Dispatching {} ({} var-init, {} init)",
            name,
            lifecycle.var_inits.len(),
            lifecycle.inits.len()
        );
        for var_init in &lifecycle.var_inits {
            var_init();
        }
        for init in &lifecycle.inits {
            init();
        }
        Ok(entry())
    }
}
