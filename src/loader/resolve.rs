// src/loader/resolve.rs

//! Module-level name resolution
//!
//! Builds a symbol table for one module (its local items plus every `use`
//! binding) and answers the questions the transformer asks:
//!
//! - can the type of a `#[ctor]` static be named outside its initializer?
//! - does an attribute path mean `ctor::ctor`?
//! - does a call path mean `std::env::args`?
//!
//! Resolution is purely syntactic. Anything that cannot be decided from the
//! module's own items is reported as unresolved, and callers fall back to
//! leaving the code alone.

use std::collections::BTreeMap;
use syn::{GenericArgument, Item, PathArguments, ReturnType, Type, TypeParamBound, UseTree};
use thiserror::Error;

/// Primitive type names
const PRIMITIVES: &[&str] = &[
    "bool", "char", "str", "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32",
    "u64", "u128", "usize", "f32", "f64",
];

/// Types and traits in the standard prelude
const PRELUDE: &[&str] = &[
    "Option", "Result", "String", "Vec", "Box", "Some", "None", "Ok", "Err", "ToString",
    "ToOwned", "Clone", "Copy", "Send", "Sync", "Sized", "Unpin", "Drop", "Fn", "FnMut",
    "FnOnce", "Iterator", "IntoIterator", "Extend", "Default", "Eq", "PartialEq", "Ord",
    "PartialOrd", "AsRef", "AsMut", "Into", "From", "TryFrom", "TryInto", "FromIterator",
];

/// Path roots that never name an external crate
const RELATIVE_ROOTS: &[&str] = &["crate", "self", "super", "Self"];

/// What kind of item a local name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Type,
    Trait,
    Fn,
    Static,
    Const,
    Module,
    Macro,
}

/// The result of resolving a single identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Defined in this module
    Local(ItemKind),
    /// Bound by a `use` or `extern crate`; carries the full imported path
    Imported(Vec<String>),
    /// A primitive type
    Primitive,
    /// A prelude name
    Prelude,
    /// Possibly brought in by one of these glob imports
    Glob(Vec<Vec<String>>),
    /// Unknown
    Unresolved,
}

impl Resolution {
    /// True if the name definitely or possibly resolves
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }
}

/// Resolution failures for type expressions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("type `{0}` is not defined or imported in this module")]
    UnknownName(String),

    #[error("type is inferred (`_`) and cannot be written out")]
    Inferred,

    #[error("`impl Trait` cannot be named in a static declaration")]
    ImplTrait,

    #[error("type macro `{0}!` cannot be resolved")]
    Macro(String),

    #[error("`Self` has no meaning at module level")]
    SelfType,

    #[error("unsupported type syntax")]
    Unsupported,
}

/// Symbol table of one module
#[derive(Debug, Clone, Default)]
pub struct Scope {
    locals: BTreeMap<String, ItemKind>,
    imports: BTreeMap<String, Vec<String>>,
    globs: Vec<Vec<String>>,
}

impl Scope {
    /// Build the table from a module's items (inline submodules are
    /// separate scopes and only contribute their own name)
    pub fn from_items(items: &[Item]) -> Self {
        let mut scope = Self::default();
        for item in items {
            match item {
                Item::Struct(i) => scope.define(&i.ident, ItemKind::Type),
                Item::Enum(i) => scope.define(&i.ident, ItemKind::Type),
                Item::Union(i) => scope.define(&i.ident, ItemKind::Type),
                Item::Type(i) => scope.define(&i.ident, ItemKind::Type),
                Item::Trait(i) => scope.define(&i.ident, ItemKind::Trait),
                Item::TraitAlias(i) => scope.define(&i.ident, ItemKind::Trait),
                Item::Fn(i) => scope.define(&i.sig.ident, ItemKind::Fn),
                Item::Static(i) => scope.define(&i.ident, ItemKind::Static),
                Item::Const(i) => scope.define(&i.ident, ItemKind::Const),
                Item::Mod(i) => scope.define(&i.ident, ItemKind::Module),
                Item::Macro(i) => {
                    if let Some(ident) = &i.ident {
                        scope.define(ident, ItemKind::Macro);
                    }
                }
                Item::Use(i) => scope.add_use_tree(&mut Vec::new(), &i.tree),
                Item::ExternCrate(i) => {
                    let bound = i.rename.as_ref().map(|(_, r)| r).unwrap_or(&i.ident);
                    scope
                        .imports
                        .insert(bound.to_string(), vec![i.ident.to_string()]);
                }
                _ => {}
            }
        }
        scope
    }

    fn define(&mut self, ident: &syn::Ident, kind: ItemKind) {
        self.locals.insert(ident.to_string(), kind);
    }

    fn add_use_tree(&mut self, prefix: &mut Vec<String>, tree: &UseTree) {
        match tree {
            UseTree::Path(p) => {
                prefix.push(p.ident.to_string());
                self.add_use_tree(prefix, &p.tree);
                prefix.pop();
            }
            UseTree::Name(n) => {
                let name = n.ident.to_string();
                if name == "self" {
                    // `use a::b::{self}` binds `b`
                    if let Some(last) = prefix.last() {
                        self.imports.insert(last.clone(), prefix.clone());
                    }
                } else {
                    let mut full = prefix.clone();
                    full.push(name.clone());
                    self.imports.insert(name, full);
                }
            }
            UseTree::Rename(r) => {
                let mut full = prefix.clone();
                if r.ident != "self" {
                    full.push(r.ident.to_string());
                }
                if r.rename != "_" {
                    self.imports.insert(r.rename.to_string(), full);
                }
            }
            UseTree::Glob(_) => self.globs.push(prefix.clone()),
            UseTree::Group(g) => {
                for tree in &g.items {
                    self.add_use_tree(prefix, tree);
                }
            }
        }
    }

    /// Glob import sources, in declaration order
    pub fn globs(&self) -> &[Vec<String>] {
        &self.globs
    }

    /// Every name bound by a `use` or `extern crate`, with its full path
    pub fn imports(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.imports.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Resolve a single identifier
    pub fn resolve_ident(&self, name: &str) -> Resolution {
        if let Some(kind) = self.locals.get(name) {
            return Resolution::Local(*kind);
        }
        if let Some(path) = self.imports.get(name) {
            return Resolution::Imported(path.clone());
        }
        if PRIMITIVES.contains(&name) {
            return Resolution::Primitive;
        }
        if PRELUDE.contains(&name) {
            return Resolution::Prelude;
        }
        if !self.globs.is_empty() {
            return Resolution::Glob(self.globs.clone());
        }
        Resolution::Unresolved
    }

    /// The path with its first segment expanded through `use` bindings
    ///
    /// `use std::env; env::args` gives `["std", "env", "args"]`. Local
    /// names and unknown roots are returned as written.
    pub fn canonical_path(&self, path: &syn::Path) -> Vec<String> {
        let segments: Vec<String> = path.segments.iter().map(|s| s.ident.to_string()).collect();
        if path.leading_colon.is_some() {
            return segments;
        }
        let Some(first) = segments.first() else {
            return segments;
        };
        if self.locals.contains_key(first) {
            return segments;
        }
        match self.imports.get(first) {
            Some(expanded) => expanded
                .iter()
                .cloned()
                .chain(segments.into_iter().skip(1))
                .collect(),
            None => segments,
        }
    }

    /// True if `path` refers to `target` (given as segments), either
    /// through imports or through a glob import of the target's parent
    pub fn path_refers_to(&self, path: &syn::Path, target: &[&str]) -> bool {
        let canonical = self.canonical_path(path);
        if canonical.iter().map(String::as_str).eq(target.iter().copied()) {
            return true;
        }
        if path.leading_colon.is_none() && path.segments.len() == 1 && !target.is_empty() {
            let name = canonical[0].as_str();
            let (module, leaf) = target.split_at(target.len() - 1);
            return name == leaf[0]
                && !self.locals.contains_key(name)
                && !self.imports.contains_key(name)
                && self
                    .globs
                    .iter()
                    .any(|g| g.iter().map(String::as_str).eq(module.iter().copied()));
        }
        false
    }

    /// Check that every name in a type can be written at module level
    pub fn resolve_type(&self, ty: &Type) -> Result<(), ResolveError> {
        match ty {
            Type::Path(p) => {
                if let Some(qself) = &p.qself {
                    self.resolve_type(&qself.ty)?;
                }
                self.resolve_type_path(&p.path, p.qself.is_none())
            }
            Type::Reference(r) => self.resolve_type(&r.elem),
            Type::Ptr(p) => self.resolve_type(&p.elem),
            Type::Slice(s) => self.resolve_type(&s.elem),
            Type::Array(a) => self.resolve_type(&a.elem),
            Type::Paren(p) => self.resolve_type(&p.elem),
            Type::Group(g) => self.resolve_type(&g.elem),
            Type::Tuple(t) => t.elems.iter().try_for_each(|e| self.resolve_type(e)),
            Type::Never(_) => Ok(()),
            Type::BareFn(f) => {
                for input in &f.inputs {
                    self.resolve_type(&input.ty)?;
                }
                match &f.output {
                    ReturnType::Default => Ok(()),
                    ReturnType::Type(_, ty) => self.resolve_type(ty),
                }
            }
            Type::TraitObject(t) => t.bounds.iter().try_for_each(|b| self.resolve_bound(b)),
            Type::Infer(_) => Err(ResolveError::Inferred),
            Type::ImplTrait(_) => Err(ResolveError::ImplTrait),
            Type::Macro(m) => Err(ResolveError::Macro(path_string(&m.mac.path))),
            _ => Err(ResolveError::Unsupported),
        }
    }

    fn resolve_bound(&self, bound: &TypeParamBound) -> Result<(), ResolveError> {
        match bound {
            TypeParamBound::Trait(t) => self.resolve_type_path(&t.path, true),
            _ => Ok(()),
        }
    }

    fn resolve_type_path(&self, path: &syn::Path, check_root: bool) -> Result<(), ResolveError> {
        for segment in &path.segments {
            match &segment.arguments {
                PathArguments::None => {}
                PathArguments::AngleBracketed(args) => {
                    for arg in &args.args {
                        match arg {
                            GenericArgument::Type(ty) => self.resolve_type(ty)?,
                            GenericArgument::AssocType(assoc) => self.resolve_type(&assoc.ty)?,
                            GenericArgument::Constraint(c) => {
                                c.bounds.iter().try_for_each(|b| self.resolve_bound(b))?
                            }
                            _ => {}
                        }
                    }
                }
                PathArguments::Parenthesized(args) => {
                    for input in &args.inputs {
                        self.resolve_type(input)?;
                    }
                    if let ReturnType::Type(_, ty) = &args.output {
                        self.resolve_type(ty)?;
                    }
                }
            }
        }

        if !check_root || path.leading_colon.is_some() {
            return Ok(());
        }
        let Some(first) = path.segments.first() else {
            return Err(ResolveError::Unsupported);
        };
        let root = first.ident.to_string();
        if root == "Self" {
            return Err(ResolveError::SelfType);
        }
        // A qualified path with an unknown root names an external crate
        if path.segments.len() > 1 {
            return Ok(());
        }
        if self.resolve_ident(&root).is_resolved() {
            Ok(())
        } else {
            Err(ResolveError::UnknownName(root))
        }
    }

    /// True if the attribute is `#[ctor]` from the `ctor` crate
    pub fn is_ctor_attr(&self, attr: &syn::Attribute) -> bool {
        self.is_ctor_crate_attr(attr, "ctor")
    }

    /// True if the attribute is `#[dtor]` from the `ctor` crate
    pub fn is_dtor_attr(&self, attr: &syn::Attribute) -> bool {
        self.is_ctor_crate_attr(attr, "dtor")
    }

    fn is_ctor_crate_attr(&self, attr: &syn::Attribute, name: &str) -> bool {
        let path = attr.path();
        if self.path_refers_to(path, &["ctor", name]) {
            return true;
        }
        // `#[ctor]` needs the name in scope; `ctor::ctor` with `ctor` bare is the crate itself
        path.segments.len() == 2
            && path.leading_colon.is_none()
            && path.segments[0].ident == "ctor"
            && path.segments[1].ident == name
            && !self.locals.contains_key("ctor")
    }
}

/// First segment of every path that may name an external crate
pub fn external_root(path: &syn::Path) -> Option<String> {
    let first = path.segments.first()?.ident.to_string();
    if RELATIVE_ROOTS.contains(&first.as_str()) {
        return None;
    }
    if path.leading_colon.is_some() || path.segments.len() > 1 {
        Some(first)
    } else {
        None
    }
}

/// Render a path as written, without generic arguments
pub fn path_string(path: &syn::Path) -> String {
    let joined = path
        .segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect::<Vec<_>>()
        .join("::");
    if path.leading_colon.is_some() {
        format!("::{}", joined)
    } else {
        joined
    }
}
