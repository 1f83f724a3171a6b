// src/transform/mod.rs

//! Program transformer
//!
//! Rewrites one loaded program so it can live as a module of the merged
//! crate and hand its lifecycle to the registry:
//!
//! ```text
//! fn main() -> R { body }            fn __bbmerge_entry() -> R { body }
//! #[ctor] fn setup() { .. }    ==>   fn __bbmerge_init_0() { .. }
//! #[ctor] static T: Ty = expr;       static T: Deferred<Ty> = Deferred::new();
//!                                    fn __bbmerge_var_init() { Deferred::set(&T, expr); }
//!                                    pub(super) fn __bbmerge_register(registry) { .. }
//! ```
//!
//! Every module that owns registrations gets its own `__bbmerge_register`
//! and the parent calls it, so private items never need to become visible
//! outside the module that declares them.

mod rewrite;

pub use rewrite::RUNTIME_ALIAS;

use crate::error::{Error, Result, Stage};
use crate::loader::{Program, Scope, SourceFile};
use crate::manifest::ProgramManifest;
use proc_macro2::Span;
use quote::{format_ident, quote};
use rewrite::PathRewriter;
use std::path::PathBuf;
use syn::visit::{self, Visit};
use syn::visit_mut::VisitMut;
use syn::{Attribute, Expr, Ident, Item, ItemExternCrate, Stmt};
use tracing::{debug, warn};

/// Inner attributes that only mean something at a crate root
const CRATE_ONLY_ATTRS: &[&str] = &[
    "no_std",
    "no_main",
    "crate_type",
    "crate_name",
    "windows_subsystem",
    "feature",
    "recursion_limit",
    "type_length_limit",
];

const ENTRY_FN: &str = "__bbmerge_entry";
const INIT_PREFIX: &str = "__bbmerge_init_";
const VAR_INIT_FN: &str = "__bbmerge_var_init";
const REGISTER_FN: &str = "__bbmerge_register";

/// A program rewritten for the merged crate
#[derive(Debug, Clone)]
pub struct TransformedUnit {
    /// Program name, the dispatch key
    pub program: String,
    /// Module identifier in the merged crate
    pub module: String,
    /// Rewritten files; index 0 is the module root (`mod.rs`)
    pub files: Vec<SourceFile>,
    /// `#[macro_use] extern crate` items that must live at the merged root
    pub macro_use_crates: Vec<ItemExternCrate>,
    /// The program's manifest, carried for dependency computation
    pub manifest: Option<ProgramManifest>,
    /// Statics moved into the var-init stage
    pub var_inits: usize,
    /// Init procedures registered
    pub inits: usize,
    /// Non-fatal diagnostics
    pub warnings: Vec<String>,
}

/// Module identifier for a program name
///
/// Non-identifier characters become `_`, a leading digit is prefixed with
/// `_`, and keywords get a trailing `_` (`true-cmd` -> `true_cmd`,
/// `2to3` -> `_2to3`, `type` -> `type_`).
pub fn module_ident(program: &str) -> String {
    let mut ident: String = program
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    if ident == "_" || syn::parse_str::<Ident>(&ident).is_err() {
        ident.push('_');
    }
    ident
}

/// Rewrite a loaded program
///
/// Fails with [`Error::MissingEntry`] when the crate root has no `fn main`
/// and with [`Error::DuplicateEntry`] when it has several that are not all
/// `#[cfg]`-gated.
pub fn transform(program: &Program) -> Result<TransformedUnit> {
    let module = module_ident(&program.name);
    let mut transformer = Transformer {
        program,
        module: &module,
        files: program.files.clone(),
        macro_use_crates: Vec::new(),
        init_count: 0,
        var_init_count: 0,
        warnings: Vec::new(),
    };

    transformer.strip_crate_attrs();
    let mut items = std::mem::take(&mut transformer.files[0].ast.items);
    transformer.module_items(0, &mut Vec::new(), &mut items, true)?;
    transformer.files[0].ast.items = items;

    let Transformer {
        mut files,
        macro_use_crates,
        init_count,
        var_init_count,
        warnings,
        ..
    } = transformer;
    files[0].rel_path = PathBuf::from("mod.rs");

    debug!(
        "Transformed {}: {} var-init, {} init, {} file(s)",
        program.name,
        var_init_count,
        init_count,
        files.len()
    );

    Ok(TransformedUnit {
        program: program.name.clone(),
        module,
        files,
        macro_use_crates,
        manifest: program.manifest.clone(),
        var_inits: var_init_count,
        inits: init_count,
        warnings,
    })
}

/// What a processed module exposes to its parent
#[derive(Debug, Default, Clone, Copy)]
struct ModuleOutcome {
    register: bool,
    var_init: bool,
}

struct Transformer<'a> {
    program: &'a Program,
    module: &'a str,
    files: Vec<SourceFile>,
    macro_use_crates: Vec<ItemExternCrate>,
    init_count: usize,
    var_init_count: usize,
    warnings: Vec<String>,
}

impl Transformer<'_> {
    fn warn(&mut self, message: String) {
        warn!("{}: {}", self.program.name, message);
        self.warnings.push(message);
    }

    fn error(&self, message: String) -> Error {
        Error::Transform {
            program: self.program.name.clone(),
            message,
        }
    }

    fn strip_crate_attrs(&mut self) {
        let attrs = std::mem::take(&mut self.files[0].ast.attrs);
        let mut kept = Vec::with_capacity(attrs.len());
        for attr in attrs {
            match crate_only_attr(&attr) {
                Some(name) => self.warn(format!(
                    "crate attribute #![{}] has no meaning in a merged module; dropped",
                    name
                )),
                None => kept.push(attr),
            }
        }
        self.files[0].ast.attrs = kept;
    }

    /// Process one module's items in place; `inline` is the path of inline
    /// modules inside file `file`
    fn module_items(
        &mut self,
        file: usize,
        inline: &mut Vec<String>,
        items: &mut Vec<Item>,
        is_root: bool,
    ) -> Result<ModuleOutcome> {
        let scope = Scope::from_items(items);

        let mut rewriter = PathRewriter::new(&scope, self.module);
        for item in items.iter_mut() {
            rewriter.visit_item_mut(item);
        }
        if rewriter.argv_rewrites > 0 {
            debug!(
                "{}: redirected {} argument-vector call(s)",
                self.program.name, rewriter.argv_rewrites
            );
        }
        for var in std::mem::take(&mut rewriter.package_env) {
            self.warn(format!("env!(\"{}\") now expands to the merged crate's value", var));
        }

        let mut var_init_stmts: Vec<Stmt> = Vec::new();
        let mut registrations: Vec<Stmt> = Vec::new();
        let mut mains = Vec::new();
        let mut output = Vec::with_capacity(items.len());

        for mut item in std::mem::take(items) {
            match &mut item {
                Item::Mod(module) => {
                    let outcome = self.child_module(file, inline, module)?;
                    let ident = &module.ident;
                    let cfgs = cfg_attrs(&module.attrs);
                    let var_init = format_ident!("{}", VAR_INIT_FN);
                    let register = format_ident!("{}", REGISTER_FN);
                    if outcome.var_init {
                        var_init_stmts.push(syn::parse_quote! {
                            #(#cfgs)* #ident::#var_init();
                        });
                    }
                    if outcome.register {
                        registrations.push(syn::parse_quote! {
                            #(#cfgs)* #ident::#register(registry);
                        });
                    }
                }
                Item::Fn(function) if is_root && function.sig.ident == "main" => {
                    if !function.sig.inputs.is_empty() || !function.sig.generics.params.is_empty()
                    {
                        return Err(self.error(
                            "fn main must take no arguments and have no generics".to_string(),
                        ));
                    }
                    function.sig.ident = Ident::new(ENTRY_FN, function.sig.ident.span());
                    mains.push(!cfg_attrs(&function.attrs).is_empty());
                }
                Item::Fn(function) if has_ctor(&scope, &function.attrs) => {
                    if !function.sig.inputs.is_empty() || !function.sig.generics.params.is_empty()
                    {
                        return Err(self.error(format!(
                            "#[ctor] fn {} must take no arguments",
                            function.sig.ident
                        )));
                    }
                    function.attrs.retain(|a| !scope.is_ctor_attr(a));
                    let name = format_ident!("{}{}", INIT_PREFIX, self.init_count);
                    self.init_count += 1;
                    function.sig.ident = name.clone();

                    let program = &self.program.name;
                    let cfgs = cfg_attrs(&function.attrs);
                    registrations.push(if function.sig.unsafety.is_some() {
                        syn::parse_quote! {
                            #(#cfgs)* registry.register_init(#program, || unsafe { #name() });
                        }
                    } else {
                        syn::parse_quote! {
                            #(#cfgs)* registry.register_init(#program, #name);
                        }
                    });
                }
                Item::Static(stat) if has_ctor(&scope, &stat.attrs) => {
                    if let Some(stmt) = self.split_static(&scope, stat) {
                        var_init_stmts.push(stmt);
                    }
                }
                Item::Const(konst) if konst.ident == "_" && !declares_items(&konst.expr) => {
                    konst.ty = Box::new(syn::parse_quote!(()));
                    konst.expr = Box::new(syn::parse_quote!(()));
                }
                Item::Fn(function) if function.attrs.iter().any(|a| scope.is_dtor_attr(a)) => {
                    self.warn(format!(
                        "#[dtor] fn {} runs at exit of every merged program",
                        function.sig.ident
                    ));
                }
                Item::Macro(mac) if mac.attrs.iter().any(|a| a.path().is_ident("macro_export")) => {
                    let name = mac
                        .ident
                        .as_ref()
                        .map(|i| i.to_string())
                        .unwrap_or_default();
                    self.warn(format!(
                        "#[macro_export] macro {}! is exported at the merged crate root",
                        name
                    ));
                }
                Item::ExternCrate(krate)
                    if is_root && krate.attrs.iter().any(|a| a.path().is_ident("macro_use")) =>
                {
                    self.macro_use_crates.push(krate.clone());
                    continue;
                }
                _ => {}
            }
            output.push(item);
        }
        *items = output;

        if is_root {
            match mains.len() {
                0 => {
                    return Err(Error::MissingEntry {
                        program: self.program.name.clone(),
                    });
                }
                1 => {}
                n if mains.iter().all(|gated| *gated) => {
                    debug!("{}: {} cfg-gated entry procedures", self.program.name, n);
                }
                n => {
                    return Err(Error::DuplicateEntry {
                        program: self.program.name.clone(),
                        stage: Stage::Transform,
                        detail: format!("fn main is declared {} times without #[cfg]", n),
                    });
                }
            }
        }

        let var_init = format_ident!("{}", VAR_INIT_FN);
        let register = format_ident!("{}", REGISTER_FN);
        let has_var_init = !var_init_stmts.is_empty();
        if has_var_init {
            items.push(if is_root {
                syn::parse_quote! {
                    fn #var_init() {
                        #(#var_init_stmts)*
                    }
                }
            } else {
                syn::parse_quote! {
                    pub(super) fn #var_init() {
                        #(#var_init_stmts)*
                    }
                }
            });
        }

        if is_root {
            let program = &self.program.name;
            let entry = format_ident!("{}", ENTRY_FN);
            let alias = Ident::new(RUNTIME_ALIAS, Span::call_site());
            let var_init_registration = has_var_init.then(|| {
                quote! { registry.register_var_init(#program, #var_init); }
            });
            items.push(syn::parse_quote! {
                pub(super) fn #register(registry: &mut #alias::Registry) {
                    #var_init_registration
                    #(#registrations)*
                    registry.register_entry(
                        #program,
                        || ::std::process::Termination::report(#entry()),
                    );
                }
            });
            return Ok(ModuleOutcome {
                register: true,
                var_init: has_var_init,
            });
        }

        let has_register = !registrations.is_empty();
        if has_register {
            let alias = Ident::new(RUNTIME_ALIAS, Span::call_site());
            items.push(syn::parse_quote! {
                pub(super) fn #register(registry: &mut #alias::Registry) {
                    #(#registrations)*
                }
            });
        }
        Ok(ModuleOutcome {
            register: has_register,
            var_init: has_var_init,
        })
    }

    fn child_module(
        &mut self,
        file: usize,
        inline: &mut Vec<String>,
        module: &mut syn::ItemMod,
    ) -> Result<ModuleOutcome> {
        let ident = module.ident.to_string();

        if let Some((_, content)) = &mut module.content {
            inline.push(ident);
            let outcome = self.module_items(file, inline, content, false);
            inline.pop();
            return outcome;
        }

        let mut key = inline.clone();
        key.push(ident);
        let Some(child) = self.program.child(file, &key) else {
            // cfg-gated module without a source file on this host
            return Ok(ModuleOutcome::default());
        };

        let mut items = std::mem::take(&mut self.files[child].ast.items);
        let outcome = self.module_items(child, &mut Vec::new(), &mut items, false);
        self.files[child].ast.items = items;
        outcome
    }

    /// Split `#[ctor] static NAME: T = expr;` into a deferred declaration and
    /// its assignment; `None` leaves the declaration as written
    fn split_static(&mut self, scope: &Scope, stat: &mut syn::ItemStatic) -> Option<Stmt> {
        if matches!(stat.mutability, syn::StaticMutability::Mut(_)) {
            self.warn(format!(
                "#[ctor] static mut {} cannot be deferred; initializer kept inline",
                stat.ident
            ));
            return None;
        }
        if let Err(e) = scope.resolve_type(&stat.ty) {
            self.warn(format!(
                "cannot resolve the type of static {}: {}; initializer kept inline",
                stat.ident, e
            ));
            return None;
        }

        let alias = Ident::new(RUNTIME_ALIAS, Span::call_site());
        let ident = &stat.ident;
        let ty = &stat.ty;
        let expr = &stat.expr;
        let cfgs = cfg_attrs(&stat.attrs);
        let stmt: Stmt = syn::parse_quote! {
            #(#cfgs)* #alias::Deferred::set(&#ident, #expr);
        };

        stat.attrs.retain(|a| !scope.is_ctor_attr(a));
        stat.ty = Box::new(syn::parse_quote!(#alias::Deferred<#ty>));
        stat.expr = Box::new(syn::parse_quote!(#alias::Deferred::new()));
        self.var_init_count += 1;
        Some(stmt)
    }
}

/// True if a `const _` initializer declares items or expands statement
/// macros; those are kept as written
fn declares_items(expr: &Expr) -> bool {
    struct Finder {
        found: bool,
    }

    impl<'ast> Visit<'ast> for Finder {
        fn visit_stmt(&mut self, stmt: &'ast Stmt) {
            if matches!(stmt, Stmt::Item(_) | Stmt::Macro(_)) {
                self.found = true;
                return;
            }
            visit::visit_stmt(self, stmt);
        }
    }

    let mut finder = Finder { found: false };
    finder.visit_expr(expr);
    finder.found
}

fn has_ctor(scope: &Scope, attrs: &[Attribute]) -> bool {
    attrs.iter().any(|a| scope.is_ctor_attr(a))
}

fn cfg_attrs(attrs: &[Attribute]) -> Vec<Attribute> {
    attrs
        .iter()
        .filter(|a| a.path().is_ident("cfg"))
        .cloned()
        .collect()
}

/// The crate-only attribute named by `attr`, looking through `cfg_attr`
fn crate_only_attr(attr: &Attribute) -> Option<String> {
    let path = attr.path();
    if let Some(name) = CRATE_ONLY_ATTRS.iter().find(|n| path.is_ident(n)) {
        return Some(name.to_string());
    }
    if path.is_ident("cfg_attr") {
        let tokens = attr.meta.require_list().ok()?.tokens.clone();
        return tokens.into_iter().find_map(|tree| match tree {
            proc_macro2::TokenTree::Ident(ident) => CRATE_ONLY_ATTRS
                .iter()
                .find(|n| ident == **n)
                .map(|n| n.to_string()),
            _ => None,
        });
    }
    None
}
