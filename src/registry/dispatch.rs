// src/registry/dispatch.rs

//! Invocation parsing, dispatch and self-installation
//!
//! A merged binary performs exactly one dispatch per process:
//!
//! ```text
//! Start ─▶ parse invocation name ─┬─▶ Found:    var-init ▶ init ▶ entry ▶ Exit
//!                                 ├─▶ NotFound: report + list names ▶ Exit 1
//!                                 └─▶ Install:  one alias per name ▶ Exit
//! ```

use super::deferred::set_args;
use super::{DispatchError, FrozenRegistry};
use std::ffi::{OsStr, OsString};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, warn};

/// Argument that makes `<binary> install` self-install
const INSTALL_ARG: &str = "install";

/// What a merged binary was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Run the program registered under `name` with `argv`
    Dispatch { name: String, argv: Vec<OsString> },
    /// Create one alias per registered name in `dir` (default: next to the binary)
    SelfInstall { dir: Option<PathBuf> },
    /// Invoked under the binary's own name without a program
    Usage,
}

impl Invocation {
    /// Decide what to do from the raw argument vector
    ///
    /// The invocation name is the final path component of `argv[0]`.
    /// Invoking the binary under `binary_name` shifts the arguments by one
    /// so `bb echo hi` behaves like `echo hi`; `bb install` self-installs
    /// unless a program is actually named `install`.
    pub fn parse(
        argv: &[OsString],
        binary_name: &str,
        install_name: &str,
        registry: &FrozenRegistry,
    ) -> Self {
        let Some(arg0) = argv.first() else {
            return Self::Usage;
        };
        let name = invocation_name(arg0);

        if name == install_name {
            return Self::SelfInstall {
                dir: argv.get(1).map(PathBuf::from),
            };
        }

        if name == binary_name && !registry.contains(&name) {
            return match argv.get(1) {
                None => Self::Usage,
                Some(sub) if sub == INSTALL_ARG && !registry.contains(INSTALL_ARG) => {
                    Self::SelfInstall {
                        dir: argv.get(2).map(PathBuf::from),
                    }
                }
                Some(sub) => Self::Dispatch {
                    name: invocation_name(sub),
                    argv: argv[1..].to_vec(),
                },
            };
        }

        Self::Dispatch {
            name,
            argv: argv.to_vec(),
        }
    }
}

fn invocation_name(arg: &OsStr) -> String {
    Path::new(arg)
        .file_name()
        .unwrap_or(arg)
        .to_string_lossy()
        .into_owned()
}

/// The single dispatch point of a merged binary
#[derive(Debug)]
pub struct Dispatcher {
    registry: FrozenRegistry,
    binary_name: String,
    install_name: String,
}

impl Dispatcher {
    /// Create a dispatcher over a frozen registry
    pub fn new(
        registry: FrozenRegistry,
        binary_name: impl Into<String>,
        install_name: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            binary_name: binary_name.into(),
            install_name: install_name.into(),
        }
    }

    /// Get the registry
    pub fn registry(&self) -> &FrozenRegistry {
        &self.registry
    }

    /// Run the state machine once; diagnostics go to `stderr`
    pub fn run(&self, argv: Vec<OsString>, stderr: &mut dyn Write) -> ExitCode {
        let invocation = Invocation::parse(
            &argv,
            &self.binary_name,
            &self.install_name,
            &self.registry,
        );
        debug!("Invocation: {:?}", invocation);

        match invocation {
            Invocation::Dispatch { name, argv } => {
                set_args(argv);
                match self.registry.run(&name) {
                    Ok(code) => code,
                    Err(e) => {
                        let DispatchError::NotFound { valid, .. } = &e;
                        let _ = writeln!(stderr, "{}", e);
                        let _ = writeln!(stderr, "Valid program names are: {:?}", valid);
                        ExitCode::FAILURE
                    }
                }
            }
            Invocation::SelfInstall { dir } => self.self_install(dir, stderr),
            Invocation::Usage => {
                let _ = writeln!(
                    stderr,
                    "usage: {} <program> [args...] | {} {} [dir]",
                    self.binary_name, self.binary_name, INSTALL_ARG
                );
                let _ = writeln!(
                    stderr,
                    "Valid program names are: {:?}",
                    self.registry.names()
                );
                ExitCode::FAILURE
            }
        }
    }

    fn self_install(&self, dir: Option<PathBuf>, stderr: &mut dyn Write) -> ExitCode {
        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(e) => {
                let _ = writeln!(stderr, "cannot locate the running binary: {}", e);
                return ExitCode::FAILURE;
            }
        };
        let dir = match dir.or_else(|| exe.parent().map(Path::to_path_buf)) {
            Some(dir) => dir,
            None => {
                let _ = writeln!(stderr, "no install directory for {}", exe.display());
                return ExitCode::FAILURE;
            }
        };

        let report = install(self.registry.names(), &dir, &exe);
        for (path, e) in &report.failed {
            let _ = writeln!(stderr, "link {} to {}: {}", path.display(), exe.display(), e);
        }
        if report.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

/// Outcome of a self-install
#[derive(Debug, Default)]
pub struct InstallReport {
    /// Aliases created
    pub created: Vec<PathBuf>,
    /// Paths that already existed and were left alone
    pub existing: Vec<PathBuf>,
    /// Aliases that could not be created
    pub failed: Vec<(PathBuf, io::Error)>,
}

impl InstallReport {
    /// True if no alias failed
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Create one alias in `dir` per name, each pointing at `exe`
///
/// Existing paths are never replaced. No lifecycle procedure runs.
pub fn install<'a>(
    names: impl IntoIterator<Item = &'a str>,
    dir: &Path,
    exe: &Path,
) -> InstallReport {
    let mut report = InstallReport::default();

    for name in names {
        let alias = dir.join(name);
        if alias.symlink_metadata().is_ok() {
            debug!("Alias {} already exists", alias.display());
            report.existing.push(alias);
            continue;
        }
        match link(exe, &alias) {
            Ok(()) => report.created.push(alias),
            Err(e) => {
                warn!("Failed to link {} to {}: {}", alias.display(), exe.display(), e);
                report.failed.push((alias, e));
            }
        }
    }

    report
}

#[cfg(unix)]
fn link(target: &Path, alias: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, alias)
}

#[cfg(not(unix))]
fn link(target: &Path, alias: &Path) -> io::Result<()> {
    std::fs::hard_link(target, alias)
}
