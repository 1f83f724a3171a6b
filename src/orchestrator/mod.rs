// src/orchestrator/mod.rs

//! Merge orchestration
//!
//! Drives every requested program through the pipeline and assembles the
//! merged crate:
//!
//! ```text
//! patterns ─▶ program dirs ─▶ load ─▶ transform ─▶ normalize ─┐  (per program,
//!                                                             │   optionally parallel)
//!            ┌────────────────────────────────────────────────┘
//!            ▼
//!      claim names ─▶ write src/cmds/<m>/ + src/cmd_<m>.rs    (request order)
//!            │
//!            ▼
//!      src/main.rs + Cargo.toml + .cargo/config.toml          (after every program)
//! ```
//!
//! A fatal error stops the run where it happens. Programs already written
//! stay on disk, but the merged entry point of an earlier run is removed
//! up front and only written again once every program has succeeded.

pub mod glue;
pub mod namespace;

pub use namespace::{Claim, Namespace};

use crate::config::{MergeConfig, MissingEntryPolicy};
use crate::error::{Error, Result, Stage};
use crate::loader::load_program;
use crate::normalize::{normalize, NormalizedUnit, GENERATED_HEADER, GENERATED_TOML_HEADER};
use crate::transform::transform;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Programs matched when no pattern is given
pub const DEFAULT_PATTERN: &str = "[a-zA-Z]*";

/// A program directory selected for merging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    pub name: String,
    pub dir: PathBuf,
}

/// Outcome of a successful merge
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// Programs merged, in registration order
    pub merged: Vec<String>,
    /// Programs left out, with the reason
    pub excluded: Vec<(String, String)>,
    /// Non-fatal diagnostics emitted
    pub warnings: usize,
    /// Root of the merged crate
    pub output_root: PathBuf,
}

/// Expand program patterns against the source roots
///
/// Each pattern is a glob over directory names under every root. Results
/// keep pattern order; within one pattern they are sorted by name, then by
/// root. A directory reached twice is only listed once. A pattern without
/// glob characters that matches nothing is an error.
pub fn expand_patterns(roots: &[PathBuf], patterns: &[String]) -> Result<Vec<ProgramSource>> {
    let default = [DEFAULT_PATTERN.to_string()];
    let patterns = if patterns.is_empty() {
        &default[..]
    } else {
        patterns
    };

    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    for pattern in patterns {
        if pattern.is_empty() || pattern.contains('/') || pattern.starts_with('.') {
            return Err(Error::Pattern {
                pattern: pattern.clone(),
                message: "must match program directory names under a source root".to_string(),
            });
        }

        let mut matched = Vec::new();
        for (index, root) in roots.iter().enumerate() {
            let full = format!(
                "{}/{}",
                glob::Pattern::escape(&root.to_string_lossy()),
                pattern
            );
            let paths = glob::glob(&full).map_err(|e| Error::Pattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            for entry in paths {
                let path = entry.map_err(|e| Error::Pattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
                if !path.is_dir() {
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    warn!("Skipping {}: name is not valid UTF-8", path.display());
                    continue;
                };
                matched.push((name.to_string(), index, path.clone()));
            }
        }

        if matched.is_empty() && !has_glob_chars(pattern) {
            return Err(Error::Pattern {
                pattern: pattern.clone(),
                message: format!("no program directory named {} under {:?}", pattern, roots),
            });
        }

        matched.sort();
        for (name, _, dir) in matched {
            let canonical = fs::canonicalize(&dir).unwrap_or_else(|_| dir.clone());
            if seen.insert(canonical) {
                sources.push(ProgramSource { name, dir });
            }
        }
    }

    Ok(sources)
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Merges programs into one multicall crate
#[derive(Debug, Clone)]
pub struct Merger {
    config: MergeConfig,
    dump_ast: bool,
}

impl Merger {
    /// Create a merger
    pub fn new(config: MergeConfig) -> Self {
        Self {
            config,
            dump_ast: false,
        }
    }

    /// Dump each transformed syntax tree to stderr
    pub fn with_dump_ast(mut self, dump_ast: bool) -> Self {
        self.dump_ast = dump_ast;
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge every program matched by `patterns`
    pub fn merge(&self, patterns: &[String]) -> Result<MergeReport> {
        self.config.validate()?;
        self.remove_entry_point()?;
        let sources = expand_patterns(&self.config.source_roots, patterns)?;
        if sources.is_empty() {
            return Err(Error::NoPrograms {
                patterns: patterns.to_vec(),
                roots: self.config.source_roots.clone(),
            });
        }
        info!(
            "Merging {} program(s) into {}",
            sources.len(),
            self.config.output_root.display()
        );

        let mut report = MergeReport {
            output_root: self.config.output_root.clone(),
            ..Default::default()
        };
        let mut namespace = Namespace::new(&self.config.binary_name, &self.config.install_name);
        let mut units = Vec::new();

        if self.config.parallel {
            let prepared: Vec<_> = sources.par_iter().map(|s| self.prepare(s)).collect();
            for (source, result) in sources.iter().zip(prepared) {
                self.commit(source, result, &mut namespace, &mut report, &mut units)?;
            }
        } else {
            for source in &sources {
                let result = self.prepare(source);
                self.commit(source, result, &mut namespace, &mut report, &mut units)?;
            }
        }

        if units.is_empty() {
            return Err(Error::Glue(format!(
                "no mergeable programs ({} excluded)",
                report.excluded.len()
            )));
        }

        self.remove_stale(&namespace)?;
        report.warnings += self.write_glue(&units)?;

        info!(
            "Merged {} program(s), excluded {}, {} warning(s)",
            report.merged.len(),
            report.excluded.len(),
            report.warnings
        );
        Ok(report)
    }

    /// Load, transform and normalize one program
    fn prepare(&self, source: &ProgramSource) -> Result<NormalizedUnit> {
        debug!("Preparing {} from {}", source.name, source.dir.display());
        let program = load_program(&source.name, &source.dir)?;
        let mut unit = transform(&program)?;

        if let Some(edition) = unit.manifest.as_ref().and_then(|m| m.edition.as_deref()) {
            if edition != self.config.edition {
                let message = format!(
                    "written for edition {} but merged as {}",
                    edition, self.config.edition
                );
                warn!("{}: {}", source.name, message);
                unit.warnings.push(message);
            }
        }

        if self.dump_ast {
            let mut stderr = std::io::stderr().lock();
            for file in &unit.files {
                let _ = writeln!(
                    stderr,
                    "// {}: {}\n{:#?}",
                    unit.program,
                    file.rel_path.display(),
                    file.ast
                );
            }
        }

        normalize(unit)
    }

    /// Serialized part of the pipeline: apply the missing-entry policy,
    /// claim names, write output
    fn commit(
        &self,
        source: &ProgramSource,
        result: Result<NormalizedUnit>,
        namespace: &mut Namespace,
        report: &mut MergeReport,
        units: &mut Vec<NormalizedUnit>,
    ) -> Result<()> {
        let unit = match result {
            Ok(unit) => unit,
            Err(e @ Error::MissingEntry { .. })
                if self.config.missing_entry == MissingEntryPolicy::Exclude =>
            {
                warn!("Excluding {}: {}", source.name, e);
                report.excluded.push((source.name.clone(), e.to_string()));
                report.warnings += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        namespace.claim(&unit.program, &unit.module, &source.dir)?;
        self.write_unit(&unit)?;

        info!(
            "Merged {} ({} var-init, {} init)",
            unit.program, unit.var_inits, unit.inits
        );
        report.merged.push(unit.program.clone());
        report.warnings += unit.warnings.len();
        units.push(unit);
        Ok(())
    }

    fn src_dir(&self) -> PathBuf {
        self.config.output_root.join("src")
    }

    /// Drop the generated entry point so a failed run leaves no crate that
    /// still builds from partly updated programs
    fn remove_entry_point(&self) -> Result<()> {
        let path = self.src_dir().join("main.rs");
        if is_generated(&path, GENERATED_HEADER) {
            debug!("Removing previous entry point {}", path.display());
            fs::remove_file(&path)
                .map_err(|e| Error::io(&self.config.binary_name, Stage::Write, &path, e))?;
        }
        Ok(())
    }

    fn write_unit(&self, unit: &NormalizedUnit) -> Result<()> {
        let src = self.src_dir();
        let dir = src.join("cmds").join(&unit.module);
        let io = |path: &Path, e| Error::io(&unit.program, Stage::Write, path, e);

        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| io(&dir, e))?;
        }
        for file in &unit.files {
            let path = dir.join(&file.rel_path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| io(parent, e))?;
            }
            fs::write(&path, &file.text).map_err(|e| io(&path, e))?;
        }

        let stub = glue::stub_source(&unit.program, &unit.module)?;
        let stub_path = src.join(format!("cmd_{}.rs", unit.module));
        fs::write(&stub_path, stub).map_err(|e| io(&stub_path, e))?;
        debug!("Wrote {} file(s) for {}", unit.files.len() + 1, unit.program);
        Ok(())
    }

    /// Remove stubs and program directories of earlier runs that are not
    /// part of this one
    fn remove_stale(&self, namespace: &Namespace) -> Result<()> {
        let src = self.src_dir();
        let io = |path: &Path, e| Error::io(&self.config.binary_name, Stage::Write, path, e);

        let entries = match fs::read_dir(&src) {
            Ok(entries) => entries,
            Err(e) => return Err(io(&src, e)),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(module) = name
                .strip_prefix("cmd_")
                .and_then(|n| n.strip_suffix(".rs"))
            else {
                continue;
            };
            if !namespace.has_module(module) && is_generated(&path, GENERATED_HEADER) {
                info!("Removing stale stub {}", path.display());
                fs::remove_file(&path).map_err(|e| io(&path, e))?;
            }
        }

        let cmds = src.join("cmds");
        let entries = match fs::read_dir(&cmds) {
            Ok(entries) => entries,
            Err(e) => return Err(io(&cmds, e)),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let stale = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|module| !namespace.has_module(module));
            if stale && path.is_dir() {
                info!("Removing stale program directory {}", path.display());
                fs::remove_dir_all(&path).map_err(|e| io(&path, e))?;
            }
        }
        Ok(())
    }

    /// Write the merged entry point and manifests; returns the number of
    /// warnings raised
    fn write_glue(&self, units: &[NormalizedUnit]) -> Result<usize> {
        let root = &self.config.output_root;
        let io = |path: &Path, e| Error::io(&self.config.binary_name, Stage::Glue, path, e);

        let modules: Vec<String> = units.iter().map(|u| u.module.clone()).collect();
        let macro_use: Vec<String> = units
            .iter()
            .flat_map(|u| u.macro_use_crates.iter().cloned())
            .collect();
        let main = glue::main_source(
            &modules,
            &macro_use,
            &self.config.binary_name,
            &self.config.install_name,
        )?;
        let main_path = self.src_dir().join("main.rs");
        fs::write(&main_path, main).map_err(|e| io(&main_path, e))?;

        let (dependencies, warnings) = glue::merge_dependencies(
            self.config.runtime_path.as_ref(),
            units
                .iter()
                .map(|u| (u.program.as_str(), &u.dependencies, &u.target_dependencies)),
        );
        let manifest = glue::cargo_manifest(
            &self.config.binary_name,
            &self.config.edition,
            &dependencies,
        )?;
        let manifest_path = root.join("Cargo.toml");
        fs::write(&manifest_path, manifest).map_err(|e| io(&manifest_path, e))?;

        let cargo_dir = root.join(".cargo");
        let config_path = cargo_dir.join("config.toml");
        match self.config.target_arch {
            Some(arch) => {
                fs::create_dir_all(&cargo_dir).map_err(|e| io(&cargo_dir, e))?;
                fs::write(&config_path, glue::cargo_config(arch)?)
                    .map_err(|e| io(&config_path, e))?;
                debug!("Target {} ({})", arch, arch.triple());
            }
            None if is_generated(&config_path, GENERATED_TOML_HEADER) => {
                fs::remove_file(&config_path).map_err(|e| io(&config_path, e))?;
            }
            None => {}
        }

        debug!(
            "Merged dependencies: {:?}, target tables: {:?}",
            dependencies.dependencies.keys().collect::<Vec<_>>(),
            dependencies.target.keys().collect::<Vec<_>>()
        );
        Ok(warnings.len())
    }
}

fn is_generated(path: &Path, header: &str) -> bool {
    fs::read_to_string(path).is_ok_and(|text| text.starts_with(header))
}
