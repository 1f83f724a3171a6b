// src/manifest.rs

//! Program manifests (`Cargo.toml`) and the merged crate's manifest

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Dependency specs keyed by the name used in the manifest
pub type DependencyTable = BTreeMap<String, toml::Value>;

/// The parts of a program's `Cargo.toml` the merger cares about
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramManifest {
    /// `[package] name`
    pub package_name: Option<String>,
    /// `[package] edition`
    pub edition: Option<String>,
    /// `[dependencies]`
    pub dependencies: DependencyTable,
    /// `[target.<cfg>.dependencies]`, keyed by the target expression
    pub target_dependencies: BTreeMap<String, DependencyTable>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    package: Option<RawPackage>,
    #[serde(default)]
    dependencies: DependencyTable,
    #[serde(default)]
    target: BTreeMap<String, RawTarget>,
}

#[derive(Debug, Deserialize)]
struct RawPackage {
    name: Option<String>,
    edition: Option<toml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    #[serde(default)]
    dependencies: DependencyTable,
}

impl ProgramManifest {
    /// Parse a manifest; relative `path` dependencies are made absolute
    /// against `dir` so they survive the move into the merged crate
    pub fn parse(program: &str, path: &Path, text: &str, dir: &Path) -> Result<Self> {
        let raw: RawManifest = toml::from_str(text).map_err(|e| Error::Manifest {
            program: program.to_string(),
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let dependencies = relocate(program, dir, raw.dependencies);
        let target_dependencies = raw
            .target
            .into_iter()
            .filter(|(_, target)| !target.dependencies.is_empty())
            .map(|(cfg, target)| (cfg, relocate(program, dir, target.dependencies)))
            .collect();

        let (package_name, edition) = match raw.package {
            Some(package) => (
                package.name,
                package.edition.and_then(|e| e.as_str().map(String::from)),
            ),
            None => (None, None),
        };

        Ok(Self {
            package_name,
            edition,
            dependencies,
            target_dependencies,
        })
    }

    /// Read `<dir>/Cargo.toml` if it exists
    pub fn load(program: &str, dir: &Path) -> Result<Option<Self>> {
        let path = dir.join("Cargo.toml");
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| Error::io(program, crate::Stage::Load, &path, e))?;
        Self::parse(program, &path, &text, dir).map(Some)
    }
}

fn relocate(program: &str, dir: &Path, table: DependencyTable) -> DependencyTable {
    let mut dependencies = BTreeMap::new();
    for (name, mut spec) in table {
        if let Some(table) = spec.as_table_mut() {
            if table.contains_key("workspace") {
                warn!(
                    "{}: dependency {} is inherited from a workspace; copied verbatim",
                    program, name
                );
            }
            if let Some(dep_path) = table.get("path").and_then(|v| v.as_str()) {
                let absolute = dir.join(dep_path);
                table.insert(
                    "path".to_string(),
                    toml::Value::String(absolute.to_string_lossy().into_owned()),
                );
            }
        }
        dependencies.insert(name, spec);
    }
    dependencies
}

/// The identifier a dependency is referred to by in source code
pub fn crate_ident(manifest_key: &str) -> String {
    manifest_key.replace('-', "_")
}

/// Dependencies of the merged crate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedDependencies {
    pub dependencies: DependencyTable,
    /// Emitted under the same `target` keys the programs used
    pub target: BTreeMap<String, DependencyTable>,
}

#[derive(Debug, Serialize)]
struct MergedManifest<'a> {
    package: MergedPackage<'a>,
    bin: Vec<MergedBin<'a>>,
    dependencies: &'a DependencyTable,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    target: BTreeMap<&'a str, MergedTarget<'a>>,
}

#[derive(Debug, Serialize)]
struct MergedTarget<'a> {
    dependencies: &'a DependencyTable,
}

#[derive(Debug, Serialize)]
struct MergedPackage<'a> {
    name: &'a str,
    version: &'a str,
    edition: &'a str,
    publish: bool,
}

#[derive(Debug, Serialize)]
struct MergedBin<'a> {
    name: &'a str,
    path: &'a str,
}

/// Render the merged crate's `Cargo.toml`
pub fn render_merged_manifest(
    binary_name: &str,
    edition: &str,
    dependencies: &MergedDependencies,
) -> Result<String> {
    let manifest = MergedManifest {
        package: MergedPackage {
            name: binary_name,
            version: "0.1.0",
            edition,
            publish: false,
        },
        bin: vec![MergedBin {
            name: binary_name,
            path: "src/main.rs",
        }],
        dependencies: &dependencies.dependencies,
        target: dependencies
            .target
            .iter()
            .map(|(cfg, deps)| (cfg.as_str(), MergedTarget { dependencies: deps }))
            .collect(),
    };
    let body = toml::to_string(&manifest)
        .map_err(|e| Error::Glue(format!("cannot render merged manifest: {}", e)))?;
    Ok(format!("{}{}", crate::normalize::GENERATED_TOML_HEADER, body))
}

/// Dependency on the runtime registry for the merged manifest
pub fn runtime_dependency(runtime_path: Option<&PathBuf>) -> toml::Value {
    let mut table = toml::Table::new();
    match runtime_path {
        Some(path) => {
            table.insert(
                "path".to_string(),
                toml::Value::String(path.to_string_lossy().into_owned()),
            );
        }
        None => {
            table.insert(
                "version".to_string(),
                toml::Value::String(env!("CARGO_PKG_VERSION").to_string()),
            );
        }
    }
    table.insert("default-features".to_string(), toml::Value::Boolean(false));
    toml::Value::Table(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
[package]
name = "wget"
version = "0.1.0"
edition = "2021"

[dependencies]
serde = { version = "1.0", features = ["derive"] }
url = "2.5"
netutil = { path = "../../lib/netutil" }

[target.'cfg(unix)'.dependencies]
nix = { version = "0.29", features = ["fs"] }
unixsock = { path = "../../lib/unixsock" }

[target.'cfg(windows)'.dev-dependencies]
winapi = "0.3"
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = ProgramManifest::parse(
            "wget",
            Path::new("/src/cmds/wget/Cargo.toml"),
            MANIFEST,
            Path::new("/src/cmds/wget"),
        )
        .unwrap();

        assert_eq!(manifest.package_name.as_deref(), Some("wget"));
        assert_eq!(manifest.edition.as_deref(), Some("2021"));
        assert_eq!(
            manifest.dependencies.keys().collect::<Vec<_>>(),
            vec!["netutil", "serde", "url"]
        );
        assert_eq!(
            manifest.dependencies["netutil"]["path"].as_str(),
            Some("/src/cmds/wget/../../lib/netutil")
        );
        assert_eq!(manifest.dependencies["url"].as_str(), Some("2.5"));

        // Only target tables that carry [dependencies] are kept
        assert_eq!(
            manifest.target_dependencies.keys().collect::<Vec<_>>(),
            vec!["cfg(unix)"]
        );
        let unix = &manifest.target_dependencies["cfg(unix)"];
        assert_eq!(unix["nix"]["version"].as_str(), Some("0.29"));
        assert_eq!(
            unix["unixsock"]["path"].as_str(),
            Some("/src/cmds/wget/../../lib/unixsock")
        );
    }

    #[test]
    fn test_parse_manifest_error() {
        let err = ProgramManifest::parse(
            "bad",
            Path::new("Cargo.toml"),
            "[package\nname=",
            Path::new("."),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Manifest { .. }));
        assert_eq!(err.program(), Some("bad"));
    }

    #[test]
    fn test_crate_ident() {
        assert_eq!(crate_ident("serde-json"), "serde_json");
        assert_eq!(crate_ident("url"), "url");
    }

    #[test]
    fn test_render_merged_manifest() {
        let mut deps = MergedDependencies::default();
        deps.dependencies
            .insert("bbmerge".to_string(), runtime_dependency(None));
        deps.dependencies
            .insert("url".to_string(), toml::Value::String("2.5".to_string()));

        let text = render_merged_manifest("bb", "2021", &deps).unwrap();
        assert!(text.starts_with("# Code generated by bbmerge. DO NOT EDIT."));

        let parsed: toml::Table = toml::from_str(&text).unwrap();
        assert_eq!(parsed["package"]["name"].as_str(), Some("bb"));
        assert_eq!(parsed["bin"][0]["path"].as_str(), Some("src/main.rs"));
        assert_eq!(
            parsed["dependencies"]["bbmerge"]["default-features"].as_bool(),
            Some(false)
        );
        assert_eq!(parsed["dependencies"]["url"].as_str(), Some("2.5"));
        assert!(!parsed.contains_key("target"));
    }

    #[test]
    fn test_render_target_dependencies() {
        let mut deps = MergedDependencies::default();
        deps.dependencies
            .insert("bbmerge".to_string(), runtime_dependency(None));
        let mut unix = DependencyTable::new();
        unix.insert("nix".to_string(), toml::Value::String("0.29".to_string()));
        deps.target.insert("cfg(unix)".to_string(), unix);

        let text = render_merged_manifest("bb", "2021", &deps).unwrap();

        let parsed: toml::Table = toml::from_str(&text).unwrap();
        assert_eq!(
            parsed["target"]["cfg(unix)"]["dependencies"]["nix"].as_str(),
            Some("0.29")
        );
    }
}
