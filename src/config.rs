// src/config.rs

//! Merge configuration
//!
//! Everything except the program list comes from the environment:
//!
//! | Variable | Default |
//! |---|---|
//! | `BBMERGE_WORKSPACE` | current directory |
//! | `BBMERGE_SOURCE_ROOT` | `<workspace>/cmds` (`:`-separated list) |
//! | `BBMERGE_OUTPUT_ROOT` | `<workspace>/bbsh` |
//! | `BBMERGE_TARGET_ARCH` | unset (host) |
//! | `BBMERGE_BINARY_NAME` | `bb` |
//! | `BBMERGE_INSTALL_NAME` | `bbinstall` |
//! | `BBMERGE_MISSING_ENTRY` | `exclude` |
//! | `BBMERGE_RUNTIME_PATH` | unset (registry dependency by version) |
//! | `BBMERGE_EDITION` | `2021` |
//! | `BBMERGE_PARALLEL` | `false` |
//!
//! Relative paths are resolved against the workspace.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Target architecture of the merged binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetArch {
    /// x86_64 / AMD64
    X86_64,
    /// AArch64 / ARM64
    Aarch64,
    /// RISC-V 64-bit
    Riscv64,
    /// 32-bit ARM (hard float)
    Arm,
}

impl TargetArch {
    /// Get the Rust target triple (static musl, suitable for an initramfs)
    pub fn triple(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64-unknown-linux-musl",
            Self::Aarch64 => "aarch64-unknown-linux-musl",
            Self::Riscv64 => "riscv64gc-unknown-linux-musl",
            Self::Arm => "armv7-unknown-linux-musleabihf",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Some(Self::X86_64),
            "aarch64" | "arm64" => Some(Self::Aarch64),
            "riscv64" => Some(Self::Riscv64),
            "arm" | "armv7" => Some(Self::Arm),
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetArch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::X86_64 => write!(f, "x86_64"),
            Self::Aarch64 => write!(f, "aarch64"),
            Self::Riscv64 => write!(f, "riscv64"),
            Self::Arm => write!(f, "arm"),
        }
    }
}

/// What to do with a program that has no `fn main`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingEntryPolicy {
    /// Log it and leave it out of the merged binary
    #[default]
    Exclude,
    /// Abort the merge
    Fail,
}

impl MissingEntryPolicy {
    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exclude" | "skip" => Some(Self::Exclude),
            "fail" | "error" => Some(Self::Fail),
            _ => None,
        }
    }
}

/// Merge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Workspace root; relative paths resolve against it
    pub workspace: PathBuf,

    /// Directories holding one subdirectory per program
    pub source_roots: Vec<PathBuf>,

    /// Where the merged crate is written
    pub output_root: PathBuf,

    /// Target architecture, or the host when unset
    pub target_arch: Option<TargetArch>,

    /// Name of the merged binary (invoking it by this name shifts argv)
    pub binary_name: String,

    /// Reserved invocation name that self-installs
    pub install_name: String,

    /// Handling of programs without an entry procedure
    pub missing_entry: MissingEntryPolicy,

    /// Path to the bbmerge crate for the merged manifest, instead of a version
    pub runtime_path: Option<PathBuf>,

    /// Rust edition of the merged crate
    pub edition: String,

    /// Load, transform and normalize programs in parallel
    pub parallel: bool,
}

impl MergeConfig {
    /// Create a config with default values rooted at `workspace`
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        Self {
            source_roots: vec![workspace.join("cmds")],
            output_root: workspace.join("bbsh"),
            workspace,
            target_arch: None,
            binary_name: "bb".to_string(),
            install_name: "bbinstall".to_string(),
            missing_entry: MissingEntryPolicy::Exclude,
            runtime_path: None,
            edition: "2021".to_string(),
            parallel: false,
        }
    }

    /// Build the config from `BBMERGE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Config(format!("cannot read current directory: {}", e)))?;
        Self::from_lookup(&cwd, |key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable lookup
    pub fn from_lookup(cwd: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let workspace = var("BBMERGE_WORKSPACE")
            .map(|w| cwd.join(w))
            .unwrap_or_else(|| cwd.to_path_buf());
        let mut config = Self::new(&workspace);

        if let Some(roots) = var("BBMERGE_SOURCE_ROOT") {
            config.source_roots = std::env::split_paths(&roots)
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| workspace.join(p))
                .collect();
        }
        if let Some(out) = var("BBMERGE_OUTPUT_ROOT") {
            config.output_root = workspace.join(out);
        }
        if let Some(arch) = var("BBMERGE_TARGET_ARCH") {
            let parsed = TargetArch::parse(&arch).ok_or_else(|| {
                Error::Config(format!(
                    "unknown target architecture {:?} (expected: x86_64, aarch64, riscv64, arm)",
                    arch
                ))
            })?;
            config.target_arch = Some(parsed);
        }
        if let Some(name) = var("BBMERGE_BINARY_NAME") {
            config.binary_name = name;
        }
        if let Some(name) = var("BBMERGE_INSTALL_NAME") {
            config.install_name = name;
        }
        if let Some(policy) = var("BBMERGE_MISSING_ENTRY") {
            config.missing_entry = MissingEntryPolicy::parse(&policy).ok_or_else(|| {
                Error::Config(format!(
                    "unknown missing-entry policy {:?} (expected: exclude, fail)",
                    policy
                ))
            })?;
        }
        if let Some(path) = var("BBMERGE_RUNTIME_PATH") {
            config.runtime_path = Some(workspace.join(path));
        }
        if let Some(edition) = var("BBMERGE_EDITION") {
            config.edition = edition;
        }
        if let Some(parallel) = var("BBMERGE_PARALLEL") {
            config.parallel = parse_bool(&parallel).ok_or_else(|| {
                Error::Config(format!("BBMERGE_PARALLEL is not a boolean: {:?}", parallel))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the source roots
    pub fn with_source_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.source_roots = roots;
        self
    }

    /// Set the output root
    pub fn with_output_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_root = path.into();
        self
    }

    /// Set the target architecture
    pub fn with_target(mut self, arch: TargetArch) -> Self {
        self.target_arch = Some(arch);
        self
    }

    /// Set the missing-entry policy
    pub fn with_missing_entry(mut self, policy: MissingEntryPolicy) -> Self {
        self.missing_entry = policy;
        self
    }

    /// Enable or disable the parallel pipeline
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Use a local checkout of the runtime in the merged manifest
    pub fn with_runtime_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.runtime_path = Some(path.into());
        self
    }

    /// Set the merged binary's name
    pub fn with_binary_name(mut self, name: impl Into<String>) -> Self {
        self.binary_name = name.into();
        self
    }

    /// Check that names and paths make sense
    pub fn validate(&self) -> Result<()> {
        if self.source_roots.is_empty() {
            return Err(Error::Config("no source roots configured".to_string()));
        }
        for (what, name) in [
            ("binary name", &self.binary_name),
            ("install name", &self.install_name),
        ] {
            if name.is_empty() || name.contains('/') {
                return Err(Error::Config(format!("invalid {}: {:?}", what, name)));
            }
        }
        if self.binary_name == self.install_name {
            return Err(Error::Config(format!(
                "binary name and install name are both {:?}",
                self.binary_name
            )));
        }
        if !matches!(self.edition.as_str(), "2015" | "2018" | "2021" | "2024") {
            return Err(Error::Config(format!("unknown edition {:?}", self.edition)));
        }
        Ok(())
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_target_arch_triple() {
        assert_eq!(TargetArch::X86_64.triple(), "x86_64-unknown-linux-musl");
        assert_eq!(TargetArch::Aarch64.triple(), "aarch64-unknown-linux-musl");
        assert_eq!(TargetArch::Riscv64.triple(), "riscv64gc-unknown-linux-musl");
    }

    #[test]
    fn test_target_arch_parse() {
        assert_eq!(TargetArch::parse("x86_64"), Some(TargetArch::X86_64));
        assert_eq!(TargetArch::parse("amd64"), Some(TargetArch::X86_64));
        assert_eq!(TargetArch::parse("ARM64"), Some(TargetArch::Aarch64));
        assert_eq!(TargetArch::parse("riscv64"), Some(TargetArch::Riscv64));
        assert_eq!(TargetArch::parse("unknown"), None);
    }

    #[test]
    fn test_config_defaults() {
        let config = MergeConfig::from_lookup(Path::new("/ws"), lookup(&[])).unwrap();
        assert_eq!(config.workspace, PathBuf::from("/ws"));
        assert_eq!(config.source_roots, vec![PathBuf::from("/ws/cmds")]);
        assert_eq!(config.output_root, PathBuf::from("/ws/bbsh"));
        assert_eq!(config.binary_name, "bb");
        assert_eq!(config.install_name, "bbinstall");
        assert_eq!(config.missing_entry, MissingEntryPolicy::Exclude);
        assert_eq!(config.target_arch, None);
        assert!(!config.parallel);
    }

    #[test]
    fn test_config_from_env_vars() {
        let config = MergeConfig::from_lookup(
            Path::new("/home/me"),
            lookup(&[
                ("BBMERGE_WORKSPACE", "uroot"),
                ("BBMERGE_SOURCE_ROOT", "cmds:/opt/extra"),
                ("BBMERGE_OUTPUT_ROOT", "/tmp/out"),
                ("BBMERGE_TARGET_ARCH", "arm64"),
                ("BBMERGE_MISSING_ENTRY", "fail"),
                ("BBMERGE_PARALLEL", "yes"),
                ("BBMERGE_BINARY_NAME", ""),
            ]),
        )
        .unwrap();

        assert_eq!(config.workspace, PathBuf::from("/home/me/uroot"));
        assert_eq!(
            config.source_roots,
            vec![PathBuf::from("/home/me/uroot/cmds"), PathBuf::from("/opt/extra")]
        );
        assert_eq!(config.output_root, PathBuf::from("/tmp/out"));
        assert_eq!(config.target_arch, Some(TargetArch::Aarch64));
        assert_eq!(config.missing_entry, MissingEntryPolicy::Fail);
        assert!(config.parallel);
        // Empty values fall back to defaults
        assert_eq!(config.binary_name, "bb");
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let cwd = Path::new("/ws");
        assert!(matches!(
            MergeConfig::from_lookup(cwd, lookup(&[("BBMERGE_TARGET_ARCH", "sparc")])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            MergeConfig::from_lookup(cwd, lookup(&[("BBMERGE_MISSING_ENTRY", "maybe")])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            MergeConfig::from_lookup(cwd, lookup(&[("BBMERGE_INSTALL_NAME", "bb")])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            MergeConfig::from_lookup(cwd, lookup(&[("BBMERGE_EDITION", "2030")])),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = MergeConfig::new("/ws")
            .with_target(TargetArch::Riscv64)
            .with_output_root("/out")
            .with_missing_entry(MissingEntryPolicy::Fail)
            .with_parallel(true);
        assert_eq!(config.target_arch, Some(TargetArch::Riscv64));
        assert_eq!(config.output_root, PathBuf::from("/out"));
        assert_eq!(config.missing_entry, MissingEntryPolicy::Fail);
        assert!(config.parallel);
    }
}
