// src/transform/rewrite.rs

//! Path rewriting inside one module
//!
//! Two rewrites run over every item of a module (nested modules are
//! visited on their own, with their own scope):
//!
//! - `crate::…` becomes `crate::cmd_<m>::<m>::…`, since the program's crate
//!   root is now a module of the merged crate
//! - calls of `std::env::args`/`args_os` go to the registry's versions,
//!   which see the dispatched program's own argument vector
//!
//! Macro bodies are token streams, so both rewrites also run at token level.

use crate::loader::Scope;
use proc_macro2::{Delimiter, Group, Ident, Punct, Spacing, Span, TokenStream, TokenTree};
use std::collections::BTreeSet;
use syn::visit_mut::{self, VisitMut};
use syn::{Expr, ExprCall, ItemMod, Path, PathSegment, UseTree, VisRestricted};

/// `std::env` functions redirected to the registry
const ARGV_FUNCTIONS: &[&str] = &["args", "args_os"];

/// Cargo variables that describe the package being compiled
const PACKAGE_ENV_PREFIXES: &[&str] = &["CARGO_PKG_", "CARGO_CRATE_NAME", "CARGO_BIN_NAME"];

/// Alias the normalizer binds to `::bbmerge::registry`
pub const RUNTIME_ALIAS: &str = "__bbmerge";

pub(crate) struct PathRewriter<'a> {
    scope: &'a Scope,
    stub: Ident,
    module: Ident,
    /// Number of argument-vector calls redirected
    pub argv_rewrites: usize,
    /// Package variables read through `env!`/`option_env!`
    pub package_env: BTreeSet<String>,
}

impl<'a> PathRewriter<'a> {
    pub(crate) fn new(scope: &'a Scope, module: &str) -> Self {
        Self {
            scope,
            stub: Ident::new(&format!("cmd_{}", module), Span::call_site()),
            module: Ident::new(module, Span::call_site()),
            argv_rewrites: 0,
            package_env: BTreeSet::new(),
        }
    }

    fn argv_target(&self, path: &Path) -> Option<&'static str> {
        ARGV_FUNCTIONS
            .iter()
            .copied()
            .find(|f| self.scope.path_refers_to(path, &["std", "env", f]))
    }

    fn redirect(&mut self, path: &mut Path, function: &str) {
        *path = runtime_path(function);
        self.argv_rewrites += 1;
    }

    fn rewrite_tokens(&mut self, tokens: TokenStream) -> TokenStream {
        let input: Vec<TokenTree> = tokens.into_iter().collect();
        let mut output = Vec::with_capacity(input.len());
        let mut i = 0;

        while i < input.len() {
            match &input[i] {
                TokenTree::Group(group) => {
                    let mut rewritten =
                        Group::new(group.delimiter(), self.rewrite_tokens(group.stream()));
                    rewritten.set_span(group.span());
                    output.push(TokenTree::Group(rewritten));
                    i += 1;
                }
                TokenTree::Ident(ident) if ident == "crate" && is_path_sep(&input, i + 1) => {
                    output.push(input[i].clone());
                    output.extend(path_sep());
                    output.push(TokenTree::Ident(self.stub.clone()));
                    output.extend(path_sep());
                    output.push(TokenTree::Ident(self.module.clone()));
                    i += 1;
                }
                TokenTree::Ident(_) | TokenTree::Punct(_) => {
                    let (segments, leading, end) = token_path(&input, i);
                    // `x.args()` is a method; `a::env::args` is someone else's path
                    let after_dot = i > 0
                        && matches!(
                            &input[i - 1],
                            TokenTree::Punct(p) if p.as_char() == '.' || p.as_char() == ':'
                        );
                    let called = matches!(
                        input.get(end),
                        Some(TokenTree::Group(g)) if g.delimiter() == Delimiter::Parenthesis
                    );

                    let target = match syn::parse_str::<Path>(&format_path(&segments, leading)) {
                        Ok(path) if !segments.is_empty() && !after_dot => {
                            self.argv_target(&path).filter(|_| segments.len() > 1 || called)
                        }
                        _ => None,
                    };

                    match target {
                        Some(function) => {
                            output.push(TokenTree::Ident(Ident::new(
                                RUNTIME_ALIAS,
                                Span::call_site(),
                            )));
                            output.extend(path_sep());
                            output.push(TokenTree::Ident(Ident::new(function, Span::call_site())));
                            self.argv_rewrites += 1;
                            i = end;
                        }
                        None => {
                            output.push(input[i].clone());
                            i += 1;
                        }
                    }
                }
                TokenTree::Literal(_) => {
                    output.push(input[i].clone());
                    i += 1;
                }
            }
        }

        output.into_iter().collect()
    }
}

impl VisitMut for PathRewriter<'_> {
    fn visit_item_mod_mut(&mut self, _module: &mut ItemMod) {}

    fn visit_path_mut(&mut self, path: &mut Path) {
        if path.leading_colon.is_none()
            && path.segments.len() > 1
            && path.segments[0].ident == "crate"
        {
            let stub = PathSegment::from(self.stub.clone());
            let module = PathSegment::from(self.module.clone());
            path.segments.insert(1, stub);
            path.segments.insert(2, module);
        } else if path.segments.len() > 1 {
            if let Some(function) = self.argv_target(path) {
                self.redirect(path, function);
                return;
            }
        }
        visit_mut::visit_path_mut(self, path);
    }

    fn visit_expr_call_mut(&mut self, call: &mut ExprCall) {
        if let Expr::Path(callee) = call.func.as_mut() {
            if callee.qself.is_none() && callee.path.segments.len() == 1 {
                if let Some(function) = self.argv_target(&callee.path) {
                    self.redirect(&mut callee.path, function);
                }
            }
        }
        visit_mut::visit_expr_call_mut(self, call);
    }

    fn visit_use_tree_mut(&mut self, tree: &mut UseTree) {
        if let UseTree::Path(p) = tree {
            if p.ident == "crate" {
                let rest = std::mem::replace(
                    p.tree.as_mut(),
                    UseTree::Glob(syn::UseGlob {
                        star_token: Default::default(),
                    }),
                );
                let module = UseTree::Path(syn::UsePath {
                    ident: self.module.clone(),
                    colon2_token: Default::default(),
                    tree: Box::new(rest),
                });
                *p.tree = UseTree::Path(syn::UsePath {
                    ident: self.stub.clone(),
                    colon2_token: Default::default(),
                    tree: Box::new(module),
                });
                return;
            }
        }
        visit_mut::visit_use_tree_mut(self, tree);
    }

    fn visit_vis_restricted_mut(&mut self, vis: &mut VisRestricted) {
        // `pub(crate)` still means the merged crate; only `pub(in crate::…)` moves
        if vis.in_token.is_some() {
            self.visit_path_mut(&mut vis.path);
        }
    }

    fn visit_macro_mut(&mut self, mac: &mut syn::Macro) {
        let name = mac.path.segments.last().map(|s| s.ident.to_string());
        if let Some(var) = name.and_then(|n| package_env_var(&n, &mac.tokens)) {
            self.package_env.insert(var);
        }
        collect_package_env(&mac.tokens, &mut self.package_env);
        self.visit_path_mut(&mut mac.path);
        let tokens = std::mem::take(&mut mac.tokens);
        mac.tokens = self.rewrite_tokens(tokens);
    }
}

/// The variable read by `env!("CARGO_PKG_…")` and friends
fn package_env_var(name: &str, args: &TokenStream) -> Option<String> {
    if name != "env" && name != "option_env" {
        return None;
    }
    let Some(TokenTree::Literal(literal)) = args.clone().into_iter().next() else {
        return None;
    };
    let var = syn::parse_str::<syn::LitStr>(&literal.to_string()).ok()?.value();
    PACKAGE_ENV_PREFIXES
        .iter()
        .any(|prefix| var.starts_with(prefix))
        .then_some(var)
}

/// Package variables read by `env!` calls nested in macro arguments
fn collect_package_env(tokens: &TokenStream, out: &mut BTreeSet<String>) {
    let trees: Vec<TokenTree> = tokens.clone().into_iter().collect();
    for (i, tree) in trees.iter().enumerate() {
        match tree {
            TokenTree::Ident(ident) => {
                let bang = matches!(
                    trees.get(i + 1),
                    Some(TokenTree::Punct(p)) if p.as_char() == '!'
                );
                if let (true, Some(TokenTree::Group(args))) = (bang, trees.get(i + 2)) {
                    if let Some(var) = package_env_var(&ident.to_string(), &args.stream()) {
                        out.insert(var);
                    }
                }
            }
            TokenTree::Group(group) => collect_package_env(&group.stream(), out),
            _ => {}
        }
    }
}

/// `__bbmerge::<function>`
fn runtime_path(function: &str) -> Path {
    let mut path = Path::from(Ident::new(RUNTIME_ALIAS, Span::call_site()));
    path.segments
        .push(PathSegment::from(Ident::new(function, Span::call_site())));
    path
}

fn path_sep() -> [TokenTree; 2] {
    [
        TokenTree::Punct(Punct::new(':', Spacing::Joint)),
        TokenTree::Punct(Punct::new(':', Spacing::Alone)),
    ]
}

fn is_path_sep(tokens: &[TokenTree], at: usize) -> bool {
    matches!(
        (tokens.get(at), tokens.get(at + 1)),
        (Some(TokenTree::Punct(a)), Some(TokenTree::Punct(b)))
            if a.as_char() == ':' && a.spacing() == Spacing::Joint && b.as_char() == ':'
    )
}

/// Read `[::]a::b::c` starting at `start`; returns the segments, whether a
/// leading `::` was present, and the index after the path
fn token_path(tokens: &[TokenTree], start: usize) -> (Vec<String>, bool, usize) {
    let mut segments = Vec::new();
    let mut i = start;
    let leading = is_path_sep(tokens, i);
    if leading {
        i += 2;
    }
    while let Some(TokenTree::Ident(ident)) = tokens.get(i) {
        segments.push(ident.to_string());
        i += 1;
        if is_path_sep(tokens, i) && matches!(tokens.get(i + 2), Some(TokenTree::Ident(_))) {
            i += 2;
        } else {
            break;
        }
    }
    (segments, leading, i)
}

fn format_path(segments: &[String], leading: bool) -> String {
    let joined = segments.join("::");
    if leading {
        format!("::{}", joined)
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quote::ToTokens;

    fn rewrite(src: &str) -> (String, usize) {
        let mut file = syn::parse_file(src).unwrap();
        let scope = Scope::from_items(&file.items);
        let mut rewriter = PathRewriter::new(&scope, "echo");
        for item in &mut file.items {
            rewriter.visit_item_mut(item);
        }
        let count = rewriter.argv_rewrites;
        (file.to_token_stream().to_string(), count)
    }

    #[test]
    fn test_crate_paths_move_under_module() {
        let (out, _) = rewrite(
            r#"
            use crate::util::{join, split};
            pub(crate) fn f(x: crate::Config) -> crate::Result<()> { crate::util::run(x) }
            pub(in crate::util) struct Hidden;
            "#,
        );
        assert!(out.contains("use crate :: cmd_echo :: echo :: util :: { join , split }"));
        assert!(out.contains("pub (crate) fn f"));
        assert!(out.contains("x : crate :: cmd_echo :: echo :: Config"));
        assert!(out.contains("crate :: cmd_echo :: echo :: Result < () >"));
        assert!(out.contains("crate :: cmd_echo :: echo :: util :: run (x)"));
        assert!(out.contains("pub (in crate :: cmd_echo :: echo :: util) struct Hidden"));
    }

    #[test]
    fn test_nested_modules_are_skipped() {
        let (out, _) = rewrite("mod inner { fn g() { crate::f() } } fn f() {}");
        assert!(out.contains("crate :: f ()"));
    }

    #[test]
    fn test_argv_calls_redirected() {
        let (out, count) = rewrite(
            r#"
            use std::env;
            use std::env::args_os;
            fn main() {
                let a: Vec<String> = env::args().collect();
                let b = args_os().count();
                let c = std::env::args().skip(1);
                let args_os = 3;
                let d = args_os + 1;
            }
            "#,
        );
        assert_eq!(count, 3);
        assert!(out.contains("__bbmerge :: args ()"));
        assert!(out.contains("__bbmerge :: args_os ()"));
        assert!(out.contains("let d = args_os + 1"));
        assert!(!out.contains("std :: env :: args ()"));
    }

    #[test]
    fn test_macro_tokens_rewritten() {
        let (out, count) = rewrite(
            r#"
            use std::env;
            fn main() {
                println!("{:?} {}", env::args().nth(1), crate::NAME);
                foo.args();
            }
            macro_rules! helper { () => { $crate::util::f() }; }
            "#,
        );
        assert_eq!(count, 1);
        assert!(out.contains("__bbmerge :: args ()"));
        assert!(out.contains("crate :: cmd_echo :: echo :: NAME"));
        assert!(out.contains("$ crate :: cmd_echo :: echo :: util :: f ()"));
        assert!(out.contains("foo . args ()"));
    }

    #[test]
    fn test_package_env_reads_collected() {
        let file = syn::parse_file(
            r#"
            const VERSION: &str = env!("CARGO_PKG_VERSION");
            fn main() {
                println!("{}", option_env!("CARGO_PKG_NAME").unwrap_or("?"));
                let home = env!("HOME");
            }
            "#,
        )
        .unwrap();
        let scope = Scope::from_items(&file.items);
        let mut rewriter = PathRewriter::new(&scope, "echo");
        let mut items = file.items;
        for item in &mut items {
            rewriter.visit_item_mut(item);
        }
        let vars: Vec<_> = rewriter.package_env.iter().map(String::as_str).collect();
        assert_eq!(vars, vec!["CARGO_PKG_NAME", "CARGO_PKG_VERSION"]);
    }
}
