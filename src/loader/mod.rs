// src/loader/mod.rs

//! Source loader
//!
//! Parses one program's source tree into a syntax forest. The crate root is
//! `<dir>/src/main.rs` for a Cargo package or `<dir>/main.rs` for a bare
//! program; every other file is reached by following `mod` items exactly
//! the way rustc does:
//!
//! - children of a mod-rs file (`main.rs`, `mod.rs`, or a `#[path]` file)
//!   live next to it
//! - children of any other file `foo.rs` live in `foo/`
//! - inline `mod a { mod b; }` adds `a/` to the search directory
//!
//! Files no `mod` item reaches are not part of the program and only
//! produce a warning.

pub mod resolve;

pub use resolve::{Resolution, ResolveError, Scope};

use crate::error::{Error, Result, Stage};
use crate::manifest::ProgramManifest;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Directories under a crate root that hold other targets
const NON_PROGRAM_DIRS: &[&str] = &["bin", "tests", "benches", "examples", "target"];

/// One parsed source file
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the crate root directory
    pub rel_path: PathBuf,
    /// The parsed file
    pub ast: syn::File,
}

/// A loaded program unit
#[derive(Debug, Clone)]
pub struct Program {
    /// Program name (its directory name)
    pub name: String,
    /// The program's directory under the source root
    pub dir: PathBuf,
    /// Directory holding the crate root file
    pub root_dir: PathBuf,
    /// Parsed files; index 0 is the crate root
    pub files: Vec<SourceFile>,
    /// `(parent file, inline module path + module ident)` -> child file
    links: HashMap<(usize, Vec<String>), usize>,
    /// The program's `Cargo.toml`, if it has one
    pub manifest: Option<ProgramManifest>,
}

impl Program {
    /// Look up the file backing `mod <path>;` declared in file `parent`
    ///
    /// `path` is the chain of inline modules leading to the declaration,
    /// ending with the declared module's identifier.
    pub fn child(&self, parent: usize, path: &[String]) -> Option<usize> {
        self.links.get(&(parent, path.to_vec())).copied()
    }

    /// Build a program from in-memory sources, for callers that already
    /// hold parsed files (`files[0]` is the root; `links` as in [`Program::child`])
    pub fn from_parts(
        name: impl Into<String>,
        dir: impl Into<PathBuf>,
        files: Vec<SourceFile>,
        links: HashMap<(usize, Vec<String>), usize>,
        manifest: Option<ProgramManifest>,
    ) -> Self {
        let dir = dir.into();
        Self {
            name: name.into(),
            root_dir: dir.clone(),
            dir,
            files,
            links,
            manifest,
        }
    }
}

/// Find the crate root file of a program directory
pub fn crate_root(dir: &Path) -> Option<PathBuf> {
    [dir.join("src").join("main.rs"), dir.join("main.rs")]
        .into_iter()
        .find(|p| p.is_file())
}

/// Parse a program's full source tree
///
/// A directory without a crate root has no entry procedure and yields
/// [`Error::MissingEntry`].
pub fn load_program(name: &str, dir: &Path) -> Result<Program> {
    let root = crate_root(dir).ok_or_else(|| Error::MissingEntry {
        program: name.to_string(),
    })?;
    let root_dir = root
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| dir.to_path_buf());
    debug!("Loading {} from {}", name, root.display());

    let mut loader = Loader {
        program: name,
        root_dir: &root_dir,
        files: Vec::new(),
        links: HashMap::new(),
    };
    loader.load_file(&root, true)?;

    let Loader { files, links, .. } = loader;
    report_orphans(name, &root_dir, &files);

    Ok(Program {
        name: name.to_string(),
        dir: dir.to_path_buf(),
        root_dir,
        files,
        links,
        manifest: ProgramManifest::load(name, dir)?,
    })
}

/// Parse a single source text the way the loader does
pub fn parse_source(program: &str, file: &Path, text: &str) -> Result<syn::File> {
    syn::parse_file(text).map_err(|e| {
        let start = e.span().start();
        Error::Parse {
            program: program.to_string(),
            file: file.to_path_buf(),
            message: format!("{} (line {}, column {})", e, start.line, start.column + 1),
        }
    })
}

struct Loader<'a> {
    program: &'a str,
    root_dir: &'a Path,
    files: Vec<SourceFile>,
    links: HashMap<(usize, Vec<String>), usize>,
}

impl Loader<'_> {
    fn load_file(&mut self, path: &Path, mod_rs: bool) -> Result<usize> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::io(self.program, Stage::Load, path, e))?;
        let rel_path = self.relative(path)?;
        let ast = parse_source(self.program, &rel_path, &text)?;

        let index = self.files.len();
        let items = ast.items.clone();
        self.files.push(SourceFile { rel_path, ast });

        let file_dir = path.parent().unwrap_or(self.root_dir).to_path_buf();
        let child_dir = if mod_rs {
            file_dir.clone()
        } else {
            let stem = path.file_stem().unwrap_or_default();
            file_dir.join(stem)
        };
        self.load_children(index, &items, &file_dir, &child_dir, &mut Vec::new())?;
        Ok(index)
    }

    fn load_children(
        &mut self,
        file: usize,
        items: &[syn::Item],
        file_dir: &Path,
        dir: &Path,
        inline: &mut Vec<String>,
    ) -> Result<()> {
        for item in items {
            let syn::Item::Mod(module) = item else {
                continue;
            };
            let ident = module.ident.to_string();
            let path_attr = path_attribute(&module.attrs);

            if let Some((_, content)) = &module.content {
                let nested = match &path_attr {
                    Some(p) => dir.join(p),
                    None => dir.join(&ident),
                };
                inline.push(ident);
                self.load_children(file, content, file_dir, &nested, inline)?;
                inline.pop();
                continue;
            }

            let (candidates, mod_rs) = match &path_attr {
                // Outside inline modules, #[path] is relative to the file itself
                Some(p) if inline.is_empty() => (vec![file_dir.join(p)], true),
                Some(p) => (vec![dir.join(p)], true),
                None => (
                    vec![
                        dir.join(format!("{}.rs", ident)),
                        dir.join(&ident).join("mod.rs"),
                    ],
                    false,
                ),
            };

            let Some(found) = candidates.iter().find(|c| c.is_file()) else {
                if module.attrs.iter().any(|a| a.path().is_ident("cfg")) {
                    warn!(
                        "{}: module {} is cfg-gated and has no source file; kept as declared",
                        self.program, ident
                    );
                    continue;
                }
                return Err(Error::Parse {
                    program: self.program.to_string(),
                    file: self.files[file].rel_path.clone(),
                    message: format!(
                        "file not found for module `{}` (looked for {})",
                        ident,
                        candidates
                            .iter()
                            .map(|c| c.display().to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                });
            };

            let is_mod_rs = mod_rs || found.file_name().is_some_and(|n| n == "mod.rs");
            let child = self.load_file(found, is_mod_rs)?;
            let mut key = inline.clone();
            key.push(ident);
            self.links.insert((file, key), child);
        }
        Ok(())
    }

    fn relative(&self, path: &Path) -> Result<PathBuf> {
        let rel = path.strip_prefix(self.root_dir).map_err(|_| Error::Parse {
            program: self.program.to_string(),
            file: path.to_path_buf(),
            message: "module file lies outside the program's source directory".to_string(),
        })?;
        if rel.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(Error::Parse {
                program: self.program.to_string(),
                file: path.to_path_buf(),
                message: "module path escapes the program's source directory".to_string(),
            });
        }
        Ok(rel.to_path_buf())
    }
}

/// The value of a `#[path = "..."]` attribute
pub fn path_attribute(attrs: &[syn::Attribute]) -> Option<String> {
    attrs.iter().find_map(|attr| {
        if !attr.path().is_ident("path") {
            return None;
        }
        match &attr.meta {
            syn::Meta::NameValue(syn::MetaNameValue {
                value:
                    syn::Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Str(s),
                        ..
                    }),
                ..
            }) => Some(s.value()),
            _ => None,
        }
    })
}

fn report_orphans(program: &str, root_dir: &Path, files: &[SourceFile]) {
    let loaded: BTreeSet<&Path> = files.iter().map(|f| f.rel_path.as_path()).collect();

    let walker = WalkDir::new(root_dir).into_iter().filter_entry(|entry| {
        let nested_target = entry.depth() == 1
            && entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|n| NON_PROGRAM_DIRS.contains(&n));
        !nested_target
    });

    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().is_none_or(|e| e != "rs") {
            continue;
        }
        if path.file_name().is_some_and(|n| n == "build.rs") {
            continue;
        }
        if let Ok(rel) = path.strip_prefix(root_dir) {
            if !loaded.contains(rel) {
                warn!(
                    "{}: {} is not reachable from the crate root; ignored",
                    program,
                    rel.display()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_load_follows_modules() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("ls");
        write(&dir, "Cargo.toml", "[package]\nname = \"ls\"\nedition = \"2021\"\n");
        write(&dir, "src/main.rs", "mod format;\nmod walk { pub mod filter; }\nfn main() {}\n");
        write(&dir, "src/format.rs", "mod columns;\npub fn f() {}\n");
        write(&dir, "src/format/columns.rs", "pub fn c() {}\n");
        write(&dir, "src/walk/filter/mod.rs", "pub fn keep() -> bool { true }\n");
        write(&dir, "src/unused.rs", "fn nothing() {}\n");

        let program = load_program("ls", &dir).unwrap();
        let paths: Vec<_> = program.files.iter().map(|f| f.rel_path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("main.rs"),
                PathBuf::from("format.rs"),
                PathBuf::from("format/columns.rs"),
                PathBuf::from("walk/filter/mod.rs"),
            ]
        );

        assert_eq!(program.child(0, &["format".to_string()]), Some(1));
        assert_eq!(program.child(1, &["columns".to_string()]), Some(2));
        assert_eq!(
            program.child(0, &["walk".to_string(), "filter".to_string()]),
            Some(3)
        );
        assert_eq!(program.root_dir, dir.join("src"));
        assert_eq!(
            program.manifest.unwrap().edition.as_deref(),
            Some("2021")
        );
    }

    #[test]
    fn test_load_path_attribute() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("dd");
        write(&dir, "main.rs", "#[path = \"impls/copy.rs\"]\nmod copy;\nfn main() {}\n");
        write(&dir, "impls/copy.rs", "mod buffer;\n");
        // #[path] files behave as mod-rs files
        write(&dir, "impls/buffer.rs", "pub struct Buffer;\n");

        let program = load_program("dd", &dir).unwrap();
        assert_eq!(program.files.len(), 3);
        assert_eq!(program.files[2].rel_path, PathBuf::from("impls/buffer.rs"));
        assert!(program.manifest.is_none());
    }

    #[test]
    fn test_load_parse_error_names_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("bad");
        write(&dir, "main.rs", "mod broken;\nfn main() {}\n");
        write(&dir, "broken.rs", "fn oops( {\n");

        let err = load_program("bad", &dir).unwrap_err();
        match err {
            Error::Parse { program, file, .. } => {
                assert_eq!(program, "bad");
                assert_eq!(file, PathBuf::from("broken.rs"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_parse_error_reports_position() {
        let err = parse_source("p", Path::new("main.rs"), "fn main() {}\nfn oops( {}\n").unwrap_err();
        match err {
            Error::Parse { message, .. } => assert!(message.contains("(line 2, column"), "{}", message),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_load_missing_module_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("gone");
        write(&dir, "main.rs", "mod missing;\n#[cfg(windows)]\nmod win;\nfn main() {}\n");

        let err = load_program("gone", &dir).unwrap_err();
        assert!(err.to_string().contains("file not found for module `missing`"));
    }

    #[test]
    fn test_load_cfg_gated_module_may_be_absent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("plat");
        write(&dir, "main.rs", "#[cfg(windows)]\nmod win;\nfn main() {}\n");

        let program = load_program("plat", &dir).unwrap();
        assert_eq!(program.files.len(), 1);
        assert_eq!(program.child(0, &["win".to_string()]), None);
    }

    #[test]
    fn test_load_without_crate_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("pkg");
        write(&dir, "src/lib.rs", "pub fn helper() {}\n");

        let err = load_program("pkg", &dir).unwrap_err();
        assert!(matches!(err, Error::MissingEntry { .. }));
    }

    #[test]
    fn test_load_rejects_escaping_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("esc");
        write(&dir, "main.rs", "#[path = \"../shared.rs\"]\nmod shared;\nfn main() {}\n");
        write(temp_dir.path(), "shared.rs", "pub fn s() {}\n");

        assert!(matches!(
            load_program("esc", &dir),
            Err(Error::Parse { .. })
        ));
    }
}
