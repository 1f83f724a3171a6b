// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use bbmerge::MergeConfig;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

pub const ECHO_MAIN: &str = r#"
fn main() {
    let words: Vec<String> = std::env::args().skip(1).collect();
    println!("{}", words.join(" "));
}
"#;

pub const CAT_MAIN: &str = r#"
use std::io::{self, Read, Write};

fn main() -> io::Result<()> {
    let mut input = Vec::new();
    io::stdin().read_to_end(&mut input)?;
    io::stdout().write_all(&input)
}
"#;

pub const LIB_SOURCE: &str = r#"
pub fn helper() -> u32 {
    42
}
"#;

/// A scratch workspace with one source root and an output root
///
/// Keep the value alive for as long as the paths are used.
pub struct Workspace {
    temp_dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp_dir.path().join("cmds")).unwrap();
        Self { temp_dir }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn source_root(&self) -> PathBuf {
        self.path().join("cmds")
    }

    pub fn output_root(&self) -> PathBuf {
        self.path().join("bbsh")
    }

    /// Write a program under the default source root
    pub fn add_program(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        self.add_program_in("cmds", name, files)
    }

    /// Write a program under `<workspace>/<root>/<name>`
    pub fn add_program_in(&self, root: &str, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.path().join(root).join(name);
        for (rel_path, text) in files {
            let path = dir.join(rel_path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, text).unwrap();
        }
        dir
    }

    /// Merge configuration pointing at this workspace
    pub fn config(&self) -> MergeConfig {
        MergeConfig::new(self.path())
            .with_source_roots(vec![self.source_root()])
            .with_output_root(self.output_root())
            .with_runtime_path(env!("CARGO_MANIFEST_DIR"))
    }

    pub fn output(&self, rel_path: &str) -> PathBuf {
        self.output_root().join(rel_path)
    }

    pub fn read_output(&self, rel_path: &str) -> String {
        fs::read_to_string(self.output(rel_path)).unwrap()
    }

    /// Every file under the output root, keyed by relative path
    pub fn snapshot(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        let root = self.output_root();
        WalkDir::new(&root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| {
                let rel = entry.path().strip_prefix(&root).unwrap().to_path_buf();
                (rel, fs::read(entry.path()).unwrap())
            })
            .collect()
    }
}

pub fn patterns(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}
