// src/orchestrator/glue.rs

//! Generated glue: registration stubs, the merged entry point, and the
//! merged crate's manifests

use crate::config::TargetArch;
use crate::error::{Error, Result};
use crate::manifest::{
    render_merged_manifest, runtime_dependency, DependencyTable, MergedDependencies,
};
use crate::normalize::{render, GENERATED_TOML_HEADER};
use quote::format_ident;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use syn::ItemExternCrate;
use tracing::warn;

/// Name of the runtime crate in the merged manifest
pub const RUNTIME_CRATE: &str = "bbmerge";

/// Source of `src/cmd_<module>.rs`, which pulls a program's module into the
/// merged crate and forwards its registrations
pub fn stub_source(program: &str, module: &str) -> Result<String> {
    let ident = format_ident!("{}", module);
    let path = format!("cmds/{}/mod.rs", module);
    let file: syn::File = syn::parse_quote! {
        #[path = #path]
        mod #ident;

        pub(crate) fn register(registry: &mut ::bbmerge::registry::Registry) {
            #ident::__bbmerge_register(registry);
        }
    };
    render(program, Path::new(&format!("cmd_{}.rs", module)), &file)
}

/// Source of the merged `src/main.rs`
///
/// Registers every program in order, freezes the registry and performs the
/// one dispatch of the process.
pub fn main_source(
    modules: &[String],
    macro_use_crates: &[String],
    binary_name: &str,
    install_name: &str,
) -> Result<String> {
    let stubs: Vec<_> = modules
        .iter()
        .map(|m| format_ident!("cmd_{}", m))
        .collect();

    let mut seen = HashSet::new();
    let mut crates = Vec::new();
    for text in macro_use_crates {
        let krate: ItemExternCrate = syn::parse_str(text)
            .map_err(|e| Error::Glue(format!("invalid extern crate item {:?}: {}", text, e)))?;
        if seen.insert(krate.ident.to_string()) {
            crates.push(krate);
        }
    }

    let file: syn::File = syn::parse_quote! {
        #(#crates)*

        #(mod #stubs;)*

        fn main() -> ::std::process::ExitCode {
            let mut registry = ::bbmerge::registry::Registry::new();
            #(#stubs::register(&mut registry);)*
            ::bbmerge::registry::Dispatcher::new(registry.freeze(), #binary_name, #install_name)
                .run(::std::env::args_os().collect(), &mut ::std::io::stderr())
        }
    };
    render("", Path::new("main.rs"), &file).map_err(|e| Error::Glue(e.to_string()))
}

/// Union of the programs' dependencies plus the runtime
///
/// Each program contributes its `[dependencies]` and its target tables.
/// Within one table the first program to name a dependency decides its
/// spec; a later, different spec is reported in the returned warnings.
pub fn merge_dependencies<'a>(
    runtime_path: Option<&std::path::PathBuf>,
    programs: impl IntoIterator<
        Item = (
            &'a str,
            &'a DependencyTable,
            &'a BTreeMap<String, DependencyTable>,
        ),
    >,
) -> (MergedDependencies, Vec<String>) {
    let mut merged = MergedDependencies::default();
    let mut owners: BTreeMap<(Option<&str>, &str), &str> = BTreeMap::new();
    let mut warnings = Vec::new();
    merged
        .dependencies
        .insert(RUNTIME_CRATE.to_string(), runtime_dependency(runtime_path));

    for (program, dependencies, targets) in programs {
        let tables = std::iter::once((None, dependencies))
            .chain(targets.iter().map(|(cfg, table)| (Some(cfg.as_str()), table)));
        for (cfg, table) in tables {
            let into = match cfg {
                Some(cfg) => merged.target.entry(cfg.to_string()).or_default(),
                None => &mut merged.dependencies,
            };
            for (name, spec) in table {
                if name == RUNTIME_CRATE {
                    continue;
                }
                match into.get(name) {
                    Some(existing) if existing != spec => {
                        let message = format!(
                            "dependency {}{} of {} ({}) conflicts with {} from {}; keeping the first",
                            name,
                            cfg.map(|c| format!(" for {}", c)).unwrap_or_default(),
                            program,
                            spec,
                            existing,
                            owners.get(&(cfg, name.as_str())).copied().unwrap_or("?")
                        );
                        warn!("{}", message);
                        warnings.push(message);
                    }
                    Some(_) => {}
                    None => {
                        into.insert(name.clone(), spec.clone());
                        owners.insert((cfg, name.as_str()), program);
                    }
                }
            }
        }
    }

    (merged, warnings)
}

/// The merged `Cargo.toml`
pub fn cargo_manifest(
    binary_name: &str,
    edition: &str,
    dependencies: &MergedDependencies,
) -> Result<String> {
    let text = render_merged_manifest(binary_name, edition, dependencies)?;
    toml::from_str::<toml::Table>(&text)
        .map_err(|e| Error::Glue(format!("generated Cargo.toml does not parse: {}", e)))?;
    Ok(text)
}

#[derive(Serialize)]
struct CargoConfig<'a> {
    build: CargoBuild<'a>,
}

#[derive(Serialize)]
struct CargoBuild<'a> {
    target: &'a str,
}

/// `.cargo/config.toml` selecting the target triple
pub fn cargo_config(arch: TargetArch) -> Result<String> {
    let config = CargoConfig {
        build: CargoBuild {
            target: arch.triple(),
        },
    };
    let body = toml::to_string(&config)
        .map_err(|e| Error::Glue(format!("cannot render cargo config: {}", e)))?;
    Ok(format!("{}{}", GENERATED_TOML_HEADER, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::GENERATED_HEADER;

    #[test]
    fn test_stub_source() {
        let text = stub_source("true-cmd", "true_cmd").unwrap();
        assert!(text.starts_with(GENERATED_HEADER));
        assert!(text.contains("#[path = \"cmds/true_cmd/mod.rs\"]\nmod true_cmd;"));
        assert!(text.contains("pub(crate) fn register(registry: &mut ::bbmerge::registry::Registry)"));
        assert!(text.contains("true_cmd::__bbmerge_register(registry);"));
    }

    #[test]
    fn test_main_source() {
        let log = "#[macro_use] extern crate log;".to_string();
        let text = main_source(
            &["echo".to_string(), "cat".to_string()],
            &[log.clone(), log],
            "bb",
            "bbinstall",
        )
        .unwrap();

        assert_eq!(text.matches("extern crate log;").count(), 1);
        assert!(text.find("mod cmd_echo;").unwrap() < text.find("mod cmd_cat;").unwrap());
        let echo = text.find("cmd_echo::register(&mut registry);").unwrap();
        let cat = text.find("cmd_cat::register(&mut registry);").unwrap();
        assert!(echo < cat);
        assert!(text.contains("\"bb\""));
        assert!(text.contains("\"bbinstall\""));
    }

    #[test]
    fn test_merge_dependencies_keeps_first() {
        let none = BTreeMap::new();
        let mut a = DependencyTable::new();
        a.insert("url".to_string(), toml::Value::String("2.5".to_string()));
        let mut b = DependencyTable::new();
        b.insert("url".to_string(), toml::Value::String("2.4".to_string()));
        b.insert("log".to_string(), toml::Value::String("0.4".to_string()));

        let (merged, warnings) =
            merge_dependencies(None, [("wget", &a, &none), ("curl", &b, &none)]);
        assert_eq!(merged.dependencies["url"].as_str(), Some("2.5"));
        assert_eq!(merged.dependencies["log"].as_str(), Some("0.4"));
        assert!(merged.dependencies.contains_key(RUNTIME_CRATE));
        assert!(merged.target.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("wget"));
    }

    #[test]
    fn test_merge_target_dependencies() {
        let common = DependencyTable::new();
        let spec = |v: &str| toml::Value::String(v.to_string());

        let mut ls = BTreeMap::new();
        ls.insert(
            "cfg(unix)".to_string(),
            DependencyTable::from([("libc".to_string(), spec("0.2"))]),
        );
        let mut ps = BTreeMap::new();
        ps.insert(
            "cfg(unix)".to_string(),
            DependencyTable::from([
                ("libc".to_string(), spec("0.1")),
                ("nix".to_string(), spec("0.29")),
            ]),
        );
        ps.insert(
            "cfg(windows)".to_string(),
            DependencyTable::from([("winapi".to_string(), spec("0.3"))]),
        );

        let (merged, warnings) =
            merge_dependencies(None, [("ls", &common, &ls), ("ps", &common, &ps)]);
        let unix = &merged.target["cfg(unix)"];
        assert_eq!(unix["libc"].as_str(), Some("0.2"));
        assert_eq!(unix["nix"].as_str(), Some("0.29"));
        assert_eq!(merged.target["cfg(windows)"]["winapi"].as_str(), Some("0.3"));
        // Target tables never leak into the common table
        assert!(!merged.dependencies.contains_key("libc"));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("for cfg(unix)"));

        let text = cargo_manifest("bb", "2021", &merged).unwrap();
        let parsed: toml::Table = toml::from_str(&text).unwrap();
        assert_eq!(
            parsed["target"]["cfg(windows)"]["dependencies"]["winapi"].as_str(),
            Some("0.3")
        );
    }

    #[test]
    fn test_cargo_config() {
        let text = cargo_config(TargetArch::Aarch64).unwrap();
        let parsed: toml::Table = toml::from_str(&text).unwrap();
        assert_eq!(
            parsed["build"]["target"].as_str(),
            Some("aarch64-unknown-linux-musl")
        );
    }
}
