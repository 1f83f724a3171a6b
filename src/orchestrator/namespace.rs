// src/orchestrator/namespace.rs

//! Single-writer namespace of the merged binary
//!
//! Claims happen in request order, one program at a time, so the first
//! claimant of a name always wins and the error always names the second.

use crate::error::{Error, Result, Stage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A program that has claimed its names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub program: String,
    pub module: String,
    pub dir: PathBuf,
}

/// Names taken so far in one merge run
#[derive(Debug)]
pub struct Namespace {
    binary_name: String,
    install_name: String,
    claims: Vec<Claim>,
    by_program: HashMap<String, usize>,
    by_module: HashMap<String, usize>,
}

impl Namespace {
    /// Create an empty namespace; the binary and install names are reserved
    pub fn new(binary_name: impl Into<String>, install_name: impl Into<String>) -> Self {
        Self {
            binary_name: binary_name.into(),
            install_name: install_name.into(),
            claims: Vec::new(),
            by_program: HashMap::new(),
            by_module: HashMap::new(),
        }
    }

    /// Claim a program name and its module identifier
    pub fn claim(&mut self, program: &str, module: &str, dir: &Path) -> Result<()> {
        if program == self.install_name {
            return Err(Error::ReservedName {
                program: program.to_string(),
                purpose: "self-install invocation".to_string(),
            });
        }
        if program == self.binary_name {
            return Err(Error::ReservedName {
                program: program.to_string(),
                purpose: "merged binary".to_string(),
            });
        }
        if let Some(&index) = self.by_program.get(program) {
            return Err(Error::DuplicateEntry {
                program: program.to_string(),
                stage: Stage::Write,
                detail: format!(
                    "{} is already registered from {}",
                    program,
                    self.claims[index].dir.display()
                ),
            });
        }
        if let Some(&index) = self.by_module.get(module) {
            return Err(Error::NamespaceCollision {
                program: program.to_string(),
                module: module.to_string(),
                existing: self.claims[index].program.clone(),
            });
        }

        let index = self.claims.len();
        self.claims.push(Claim {
            program: program.to_string(),
            module: module.to_string(),
            dir: dir.to_path_buf(),
        });
        self.by_program.insert(program.to_string(), index);
        self.by_module.insert(module.to_string(), index);
        Ok(())
    }

    /// Claims in the order they were made
    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// True if `module` has been claimed
    pub fn has_module(&self, module: &str) -> bool {
        self.by_module.contains_key(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_in_order() {
        let mut ns = Namespace::new("bb", "bbinstall");
        ns.claim("echo", "echo", Path::new("/a/echo")).unwrap();
        ns.claim("cat", "cat", Path::new("/a/cat")).unwrap();

        let names: Vec<_> = ns.claims().iter().map(|c| c.program.as_str()).collect();
        assert_eq!(names, vec!["echo", "cat"]);
        assert!(ns.has_module("cat"));
    }

    #[test]
    fn test_duplicate_program_names_second_root() {
        let mut ns = Namespace::new("bb", "bbinstall");
        ns.claim("echo", "echo", Path::new("/a/echo")).unwrap();
        let err = ns.claim("echo", "echo", Path::new("/b/echo")).unwrap_err();

        assert!(matches!(err, Error::DuplicateEntry { stage: Stage::Write, .. }));
        assert!(err.to_string().contains("/a/echo"));
        assert_eq!(ns.claims().len(), 1);
    }

    #[test]
    fn test_module_collision() {
        let mut ns = Namespace::new("bb", "bbinstall");
        ns.claim("true-cmd", "true_cmd", Path::new("/a/true-cmd")).unwrap();
        let err = ns
            .claim("true_cmd", "true_cmd", Path::new("/a/true_cmd"))
            .unwrap_err();

        match err {
            Error::NamespaceCollision { existing, .. } => assert_eq!(existing, "true-cmd"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_reserved_names() {
        let mut ns = Namespace::new("bb", "bbinstall");
        assert!(matches!(
            ns.claim("bb", "bb", Path::new("/a/bb")),
            Err(Error::ReservedName { .. })
        ));
        assert!(matches!(
            ns.claim("bbinstall", "bbinstall", Path::new("/a/bbinstall")),
            Err(Error::ReservedName { .. })
        ));
        assert!(ns.claims().is_empty());
    }
}
