// src/normalize.rs

//! Reference normalization and rendering
//!
//! After the transform a unit's `use` declarations no longer match what
//! its code needs: generated registrations refer to the runtime, and
//! `#[ctor]` or `std::env::args` may not be referenced at all any more.
//! This pass recomputes the references of every module, rewrites the
//! declarations to match, computes the unit's minimal dependency set, and
//! renders each file through `prettyplease`.
//!
//! Normalizing a normalized tree changes nothing.

use crate::error::{Error, Result};
use crate::loader::resolve::external_root;
use crate::manifest::{crate_ident, DependencyTable};
use crate::transform::{TransformedUnit, RUNTIME_ALIAS};
use proc_macro2::{TokenStream, TokenTree};
use quote::ToTokens;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use syn::visit::{self, Visit};
use syn::{Item, ItemUse, UseTree};
use tracing::debug;

/// Header of every generated Rust file
pub const GENERATED_HEADER: &str = "// Code generated by bbmerge. DO NOT EDIT.\n\n";

/// Header of every generated TOML file
pub const GENERATED_TOML_HEADER: &str = "# Code generated by bbmerge. DO NOT EDIT.\n\n";

/// Crates whose bindings the transform retires
const RETIRED_CRATES: &[&str] = &["ctor"];

/// Paths whose bindings the transform retires
const RETIRED_PATHS: &[&[&str]] = &[&["std", "env", "args"], &["std", "env", "args_os"]];

/// One rendered output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    /// Path relative to the program's output directory
    pub rel_path: PathBuf,
    /// Full file text including the generated-code header
    pub text: String,
}

/// A transformed unit ready to be written
#[derive(Debug, Clone)]
pub struct NormalizedUnit {
    pub program: String,
    pub module: String,
    pub files: Vec<RenderedFile>,
    /// `#[macro_use] extern crate` items for the merged root, as source text
    pub macro_use_crates: Vec<String>,
    /// Manifest dependencies the unit actually references
    pub dependencies: DependencyTable,
    /// Referenced target-specific dependencies, keyed by target expression
    pub target_dependencies: BTreeMap<String, DependencyTable>,
    pub var_inits: usize,
    pub inits: usize,
    pub warnings: Vec<String>,
}

/// Normalize and render a transformed unit
pub fn normalize(unit: TransformedUnit) -> Result<NormalizedUnit> {
    let mut roots = BTreeSet::new();
    let mut files = Vec::with_capacity(unit.files.len());

    for mut file in unit.files {
        normalize_items(&mut file.ast.items);
        collect_external_roots(&file.ast, &mut roots);
        let text = render(&unit.program, &file.rel_path, &file.ast)?;
        files.push(RenderedFile {
            rel_path: file.rel_path,
            text,
        });
    }
    for krate in &unit.macro_use_crates {
        roots.insert(krate.ident.to_string());
    }

    let mut dependencies = DependencyTable::new();
    let mut target_dependencies = BTreeMap::new();
    if let Some(manifest) = &unit.manifest {
        dependencies = referenced(&unit.program, &manifest.dependencies, &roots);
        for (cfg, table) in &manifest.target_dependencies {
            let kept = referenced(&unit.program, table, &roots);
            if !kept.is_empty() {
                target_dependencies.insert(cfg.clone(), kept);
            }
        }
    }

    Ok(NormalizedUnit {
        program: unit.program,
        module: unit.module,
        files,
        macro_use_crates: unit
            .macro_use_crates
            .iter()
            .map(|k| k.to_token_stream().to_string())
            .collect(),
        dependencies,
        target_dependencies,
        var_inits: unit.var_inits,
        inits: unit.inits,
        warnings: unit.warnings,
    })
}

fn referenced(program: &str, table: &DependencyTable, roots: &BTreeSet<String>) -> DependencyTable {
    let mut kept = DependencyTable::new();
    for (name, spec) in table {
        if roots.contains(&crate_ident(name)) {
            kept.insert(name.clone(), spec.clone());
        } else {
            debug!("{}: dependency {} is not referenced; dropped", program, name);
        }
    }
    kept
}

/// Render a file with the generated-code header and check that it parses
pub fn render(program: &str, rel_path: &Path, file: &syn::File) -> Result<String> {
    let text = format!("{}{}", GENERATED_HEADER, prettyplease::unparse(file));
    syn::parse_file(&text).map_err(|e| Error::Normalize {
        program: program.to_string(),
        file: rel_path.to_path_buf(),
        message: e.to_string(),
        generated: text.clone(),
    })?;
    Ok(text)
}

/// Fix the `use` declarations of one module and, recursively, of its
/// inline submodules
pub fn normalize_items(items: &mut Vec<Item>) {
    for item in items.iter_mut() {
        if let Item::Mod(module) = item {
            if let Some((_, content)) = &mut module.content {
                normalize_items(content);
            }
        }
    }

    items.retain(|item| !is_runtime_use(item));

    let refs = references(items);
    let mut seen = HashSet::new();
    let mut output = Vec::with_capacity(items.len() + 1);

    for item in std::mem::take(items) {
        let item = match item {
            Item::Use(mut use_item) => {
                match prune_tree(&use_item.tree, &mut Vec::new(), &refs) {
                    Some(tree) => {
                        use_item.tree = tree;
                        Item::Use(use_item)
                    }
                    None => continue,
                }
            }
            Item::ExternCrate(krate)
                if RETIRED_CRATES.iter().any(|c| krate.ident == c)
                    && !refs.contains(
                        &krate
                            .rename
                            .as_ref()
                            .map(|(_, r)| r)
                            .unwrap_or(&krate.ident)
                            .to_string(),
                    ) =>
            {
                continue;
            }
            other => other,
        };
        if matches!(item, Item::Use(_)) && !seen.insert(item.to_token_stream().to_string()) {
            continue;
        }
        output.push(item);
    }

    if refs.contains(RUNTIME_ALIAS) {
        output.insert(0, runtime_use());
    }
    *items = output;
}

fn runtime_use() -> Item {
    let alias = syn::Ident::new(RUNTIME_ALIAS, proc_macro2::Span::call_site());
    syn::parse_quote!(use ::bbmerge::registry as #alias;)
}

fn is_runtime_use(item: &Item) -> bool {
    let Item::Use(ItemUse { tree, .. }) = item else {
        return false;
    };
    fn binds_alias(tree: &UseTree) -> bool {
        match tree {
            UseTree::Path(p) => binds_alias(&p.tree),
            UseTree::Rename(r) => r.rename == RUNTIME_ALIAS,
            _ => false,
        }
    }
    binds_alias(tree)
}

fn is_retired(path: &[String]) -> bool {
    let Some(first) = path.first() else {
        return false;
    };
    RETIRED_CRATES.contains(&first.as_str())
        || RETIRED_PATHS
            .iter()
            .any(|p| p.iter().copied().eq(path.iter().map(String::as_str)))
}

/// Drop retired leaves whose bound name is unreferenced; `None` if nothing
/// is left of the tree
fn prune_tree(tree: &UseTree, prefix: &mut Vec<String>, refs: &BTreeSet<String>) -> Option<UseTree> {
    match tree {
        UseTree::Path(p) => {
            prefix.push(p.ident.to_string());
            let sub = prune_tree(&p.tree, prefix, refs);
            prefix.pop();
            let mut p = p.clone();
            *p.tree = sub?;
            Some(UseTree::Path(p))
        }
        UseTree::Name(n) => {
            let (full, bound) = if n.ident == "self" {
                (prefix.clone(), prefix.last().cloned().unwrap_or_default())
            } else {
                let mut full = prefix.clone();
                full.push(n.ident.to_string());
                (full, n.ident.to_string())
            };
            (!is_retired(&full) || refs.contains(&bound)).then(|| tree.clone())
        }
        UseTree::Rename(r) => {
            let mut full = prefix.clone();
            if r.ident != "self" {
                full.push(r.ident.to_string());
            }
            (!is_retired(&full) || refs.contains(&r.rename.to_string())).then(|| tree.clone())
        }
        UseTree::Glob(_) => {
            let retired = prefix
                .first()
                .is_some_and(|first| RETIRED_CRATES.contains(&first.as_str()));
            (!retired || RETIRED_CRATES.iter().any(|c| refs.contains(*c))).then(|| tree.clone())
        }
        UseTree::Group(g) => {
            let mut g = g.clone();
            let items = std::mem::take(&mut g.items);
            for item in items {
                if let Some(kept) = prune_tree(&item, prefix, refs) {
                    g.items.push(kept);
                }
            }
            (!g.items.is_empty()).then_some(UseTree::Group(g))
        }
    }
}

/// Names the module's own non-`use` items refer to, plus the roots of
/// `use` trees that are not retired
fn references(items: &[Item]) -> BTreeSet<String> {
    let mut collector = ReferenceCollector::default();
    for item in items {
        match item {
            Item::Use(use_item) => {
                if let Some(root) = use_root(&use_item.tree) {
                    if !RETIRED_CRATES.contains(&root.as_str()) {
                        collector.names.insert(root);
                    }
                }
            }
            _ => collector.visit_item(item),
        }
    }
    collector.names
}

fn use_root(tree: &UseTree) -> Option<String> {
    match tree {
        UseTree::Path(p) => Some(p.ident.to_string()),
        UseTree::Name(n) => Some(n.ident.to_string()),
        UseTree::Rename(r) => Some(r.ident.to_string()),
        _ => None,
    }
}

#[derive(Default)]
struct ReferenceCollector {
    names: BTreeSet<String>,
}

impl ReferenceCollector {
    fn tokens(&mut self, tokens: &TokenStream) {
        let trees: Vec<TokenTree> = tokens.clone().into_iter().collect();
        for (i, tree) in trees.iter().enumerate() {
            match tree {
                TokenTree::Ident(ident) => {
                    let qualified = i > 0
                        && matches!(
                            &trees[i - 1],
                            TokenTree::Punct(p) if p.as_char() == ':' || p.as_char() == '.'
                        );
                    if !qualified {
                        self.names.insert(ident.to_string());
                    }
                }
                TokenTree::Group(group) => self.tokens(&group.stream()),
                _ => {}
            }
        }
    }
}

impl<'ast> Visit<'ast> for ReferenceCollector {
    // Only the first segment of a path can name a binding of this module
    fn visit_path(&mut self, path: &'ast syn::Path) {
        if path.leading_colon.is_none() {
            if let Some(first) = path.segments.first() {
                self.names.insert(first.ident.to_string());
            }
        }
        for segment in &path.segments {
            self.visit_path_arguments(&segment.arguments);
        }
    }

    fn visit_macro(&mut self, mac: &'ast syn::Macro) {
        self.visit_path(&mac.path);
        self.tokens(&mac.tokens);
    }

    fn visit_meta_list(&mut self, list: &'ast syn::MetaList) {
        self.visit_path(&list.path);
        self.tokens(&list.tokens);
    }

    fn visit_item_mod(&mut self, module: &'ast syn::ItemMod) {
        for attr in &module.attrs {
            self.visit_attribute(attr);
        }
    }
}

/// Roots of paths that may name an external crate
pub fn collect_external_roots(file: &syn::File, roots: &mut BTreeSet<String>) {
    let mut collector = RootCollector { roots };
    collector.visit_file(file);
}

struct RootCollector<'a> {
    roots: &'a mut BTreeSet<String>,
}

impl RootCollector<'_> {
    fn tokens(&mut self, tokens: &TokenStream) {
        let trees: Vec<TokenTree> = tokens.clone().into_iter().collect();
        for (i, tree) in trees.iter().enumerate() {
            match tree {
                TokenTree::Ident(ident) => {
                    let after_sep = i > 0
                        && matches!(&trees[i - 1], TokenTree::Punct(p) if p.as_char() == ':');
                    let before_sep = matches!(
                        trees.get(i + 1),
                        Some(TokenTree::Punct(p)) if p.as_char() == ':'
                    ) && matches!(
                        trees.get(i + 2),
                        Some(TokenTree::Punct(p)) if p.as_char() == ':'
                    );
                    if before_sep && !after_sep {
                        self.roots.insert(ident.to_string());
                    }
                }
                TokenTree::Group(group) => self.tokens(&group.stream()),
                _ => {}
            }
        }
    }
}

impl<'ast> Visit<'ast> for RootCollector<'_> {
    fn visit_path(&mut self, path: &'ast syn::Path) {
        if let Some(root) = external_root(path) {
            self.roots.insert(root);
        }
        visit::visit_path(self, path);
    }

    fn visit_item_use(&mut self, item: &'ast ItemUse) {
        fn roots(tree: &UseTree, out: &mut BTreeSet<String>) {
            match tree {
                UseTree::Path(p) => {
                    out.insert(p.ident.to_string());
                }
                UseTree::Name(n) => {
                    out.insert(n.ident.to_string());
                }
                UseTree::Rename(r) => {
                    out.insert(r.ident.to_string());
                }
                UseTree::Glob(_) => {}
                UseTree::Group(g) => g.items.iter().for_each(|t| roots(t, out)),
            }
        }
        roots(&item.tree, self.roots);
    }

    fn visit_item_extern_crate(&mut self, item: &'ast syn::ItemExternCrate) {
        self.roots.insert(item.ident.to_string());
    }

    fn visit_macro(&mut self, mac: &'ast syn::Macro) {
        self.visit_path(&mac.path);
        self.tokens(&mac.tokens);
    }

    fn visit_meta_list(&mut self, list: &'ast syn::MetaList) {
        self.visit_path(&list.path);
        self.tokens(&list.tokens);
    }
}
