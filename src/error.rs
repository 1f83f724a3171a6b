// src/error.rs

//! Error types for the merge pipeline
//!
//! Every variant names the program it concerns (when there is one) and the
//! pipeline stage that failed, so a fatal diagnostic on stderr is enough to
//! find the offending input.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Locating programs and reading configuration
    Discover,
    /// Parsing source files and manifests
    Load,
    /// Rewriting the syntax tree
    Transform,
    /// Reconciling references and re-parsing generated code
    Normalize,
    /// Registering names and writing output
    Write,
    /// Generating the merged entry point and manifest
    Glue,
}

impl Stage {
    /// Get the stage name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Load => "load",
            Self::Transform => "transform",
            Self::Normalize => "normalize",
            Self::Write => "write",
            Self::Glue => "glue",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the merge pipeline
#[derive(Debug, Error)]
pub enum Error {
    #[error("{program} [load]: parse error in {}: {message}", file.display())]
    Parse {
        program: String,
        file: PathBuf,
        message: String,
    },

    #[error("{program} [{stage}]: I/O error on {}: {source}", path.display())]
    Io {
        program: String,
        stage: Stage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} [load]: invalid manifest {}: {message}", path.display())]
    Manifest {
        program: String,
        path: PathBuf,
        message: String,
    },

    #[error("{program} [transform]: no entry procedure (fn main) found")]
    MissingEntry { program: String },

    #[error("{program} [{stage}]: duplicate entry procedure: {detail}")]
    DuplicateEntry {
        program: String,
        stage: Stage,
        detail: String,
    },

    #[error("{program} [write]: module `{module}` collides with program {existing}")]
    NamespaceCollision {
        program: String,
        module: String,
        existing: String,
    },

    #[error("{program} [write]: name is reserved for the {purpose}")]
    ReservedName { program: String, purpose: String },

    #[error("{program} [transform]: {message}")]
    Transform { program: String, message: String },

    #[error("{program} [normalize]: generated {} does not parse: {message}\n{generated}", file.display())]
    Normalize {
        program: String,
        file: PathBuf,
        message: String,
        generated: String,
    },

    #[error("invalid program pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },

    #[error("no programs matched {patterns:?} under {roots:?}")]
    NoPrograms {
        patterns: Vec<String>,
        roots: Vec<PathBuf>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("[glue]: {0}")]
    Glue(String),
}

impl Error {
    /// The program this error concerns, if any
    pub fn program(&self) -> Option<&str> {
        match self {
            Self::Parse { program, .. }
            | Self::Io { program, .. }
            | Self::Manifest { program, .. }
            | Self::MissingEntry { program }
            | Self::DuplicateEntry { program, .. }
            | Self::NamespaceCollision { program, .. }
            | Self::ReservedName { program, .. }
            | Self::Transform { program, .. }
            | Self::Normalize { program, .. } => Some(program),
            Self::Pattern { .. } | Self::NoPrograms { .. } | Self::Config(_) | Self::Glue(_) => {
                None
            }
        }
    }

    /// The stage that failed
    pub fn stage(&self) -> Stage {
        match self {
            Self::Parse { .. } | Self::Manifest { .. } => Stage::Load,
            Self::Io { stage, .. } | Self::DuplicateEntry { stage, .. } => *stage,
            Self::MissingEntry { .. } | Self::Transform { .. } => Stage::Transform,
            Self::NamespaceCollision { .. } | Self::ReservedName { .. } => Stage::Write,
            Self::Normalize { .. } => Stage::Normalize,
            Self::Pattern { .. } | Self::NoPrograms { .. } | Self::Config(_) => Stage::Discover,
            Self::Glue(_) => Stage::Glue,
        }
    }

    pub(crate) fn io(
        program: impl Into<String>,
        stage: Stage,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            program: program.into(),
            stage,
            path: path.into(),
            source,
        }
    }
}

/// Result type for the merge pipeline
pub type Result<T> = std::result::Result<T, Error>;
