//! Two-pass symbol resolution.
//!
//! Pass 1 collects every declaration (and import binding) across all files
//! of a run; pass 2 links references against the completed scope table.
//! Import cycles are safe by construction: no linking happens until every
//! declaration is registered. Lookup order for a name is local scope, then
//! enclosing scopes, then module level, then imported bindings; ambiguous
//! import bindings are broken by the lexicographically first module.

use indexmap::{IndexMap, IndexSet};

use crate::errors::GraphResult;
use crate::ingest::extract::python::module_name;
use crate::ingest::extract::{RawNode, RawNodeKind, SymbolTree};
use crate::ingest::identity::{assign, IdentityTable};
use crate::ingest::walker::Language;
use crate::models::{
    Artifact, ArtifactKind, Edge, EdgeKind, Provenance, RunWarning, EXTERNAL_PREFIX,
    EXTRACTOR_VERSION,
};

/// Output of a resolution pass: artifacts in declaration order and
/// deduplicated edges.
#[derive(Debug, Default)]
pub struct Resolution {
    pub artifacts: Vec<Artifact>,
    pub edges: Vec<Edge>,
    pub warnings: Vec<RunWarning>,
    pub unresolved_count: usize,
}

fn artifact_kind(kind: RawNodeKind) -> Option<ArtifactKind> {
    match kind {
        RawNodeKind::Module => Some(ArtifactKind::Module),
        RawNodeKind::ClassDef => Some(ArtifactKind::Class),
        RawNodeKind::FunctionDef => Some(ArtifactKind::Function),
        RawNodeKind::MethodDef => Some(ArtifactKind::Method),
        RawNodeKind::TestDef => Some(ArtifactKind::Test),
        RawNodeKind::Document => Some(ArtifactKind::Document),
        RawNodeKind::Adr => Some(ArtifactKind::Adr),
        RawNodeKind::Import | RawNodeKind::Call | RawNodeKind::Inheritance => None,
    }
}

/// Normalize a possibly-relative import module against the importing file.
/// `from ..util import x` inside `pkg/sub/mod.py` resolves to `pkg.util`.
fn normalize_module(file_path: &str, raw: &str) -> String {
    if !raw.starts_with('.') {
        return raw.to_string();
    }
    let dots = raw.chars().take_while(|&c| c == '.').count();
    let rest = &raw[dots..];

    let own = module_name(file_path);
    let mut package: Vec<&str> = own.split('.').filter(|s| !s.is_empty()).collect();
    // For a plain module the first dot refers to its containing package;
    // an __init__.py already names the package itself.
    if !file_path.ends_with("__init__.py") && !package.is_empty() {
        package.pop();
    }
    for _ in 1..dots {
        package.pop();
    }
    if !rest.is_empty() {
        package.push(rest);
    }
    package.join(".")
}

/// What a local binding introduced by an import points at.
#[derive(Clone, Debug)]
enum BindingTarget {
    /// A symbol declared somewhere in this run.
    Symbol(String),
    /// A module file in this run (canonical id is its relative path).
    Module(String),
    /// Not declared in this run; dotted name kept for the placeholder.
    External(String),
}

#[derive(Clone, Debug)]
struct Binding {
    target: BindingTarget,
    /// Dotted module the binding came from, used for the tie-break.
    module: String,
}

enum Outcome {
    Resolved(String),
    External(String),
}

struct ResolveCtx {
    /// canonical id -> artifact kind, for every declaration in the run.
    decl_index: IndexMap<String, ArtifactKind>,
    /// dotted module name -> relative file path, Python modules only.
    module_index: IndexMap<String, String>,
    edges: IndexSet<Edge>,
    warnings: Vec<RunWarning>,
    unresolved_count: usize,
}

impl ResolveCtx {
    fn declared(&self, file: &str, path: &[String]) -> Option<String> {
        let id = assign(file, path);
        self.decl_index.contains_key(&id).then_some(id)
    }

    fn push_edge(&mut self, kind: EdgeKind, source: &str, target: &str) {
        self.edges.insert(Edge::new(kind, source, target));
    }

    fn push_unresolved(&mut self, source: &str, name: &str, file: &str) {
        self.push_edge(
            EdgeKind::UnresolvedReference,
            source,
            &format!("{EXTERNAL_PREFIX}{name}"),
        );
        self.unresolved_count += 1;
        self.warnings.push(RunWarning::UnresolvedReference {
            name: name.to_string(),
            file_path: file.to_string(),
        });
    }

    /// Innermost enclosing declaration of a reference, falling back to the
    /// file itself.
    fn enclosing_decl(&self, file: &str, scope: &[String]) -> String {
        for end in (0..=scope.len()).rev() {
            if let Some(id) = self.declared(file, &scope[..end]) {
                return id;
            }
        }
        file.to_string()
    }

    /// Resolve a plain or dotted name seen in `file` within `scope`.
    fn resolve_name(
        &self,
        file: &str,
        scope: &[String],
        name: &str,
        bindings: &IndexMap<String, Binding>,
    ) -> Outcome {
        let segments: Vec<&str> = name.split('.').collect();

        // `self.attr` resolves against the innermost enclosing class.
        if segments.len() == 2 && segments[0] == "self" {
            let attr = segments[1].to_string();
            for end in (1..=scope.len()).rev() {
                let prefix = &scope[..end];
                if let Some(class_id) = self.declared(file, prefix) {
                    if self.decl_index.get(&class_id) == Some(&ArtifactKind::Class) {
                        let mut candidate = prefix.to_vec();
                        candidate.push(attr.clone());
                        if let Some(id) = self.declared(file, &candidate) {
                            return Outcome::Resolved(id);
                        }
                        break;
                    }
                }
            }
            return Outcome::External(name.to_string());
        }

        if segments.len() == 1 {
            // Local, then enclosing, then module scope.
            for end in (0..=scope.len()).rev() {
                let mut candidate: Vec<String> = scope[..end].to_vec();
                candidate.push(name.to_string());
                if let Some(id) = self.declared(file, &candidate) {
                    return Outcome::Resolved(id);
                }
            }
            // Imported bindings.
            if let Some(binding) = bindings.get(name) {
                return match &binding.target {
                    BindingTarget::Symbol(id) | BindingTarget::Module(id) => {
                        Outcome::Resolved(id.clone())
                    }
                    BindingTarget::External(dotted) => Outcome::External(dotted.clone()),
                };
            }
            return Outcome::External(name.to_string());
        }

        // Dotted name: longest binding prefix first.
        for split in (1..segments.len()).rev() {
            let prefix = segments[..split].join(".");
            let rest: Vec<String> = segments[split..].iter().map(|s| s.to_string()).collect();
            if let Some(binding) = bindings.get(&prefix) {
                match &binding.target {
                    BindingTarget::Module(module_file) => {
                        if let Some(id) = self.declared(module_file, &rest) {
                            return Outcome::Resolved(id);
                        }
                        return Outcome::External(name.to_string());
                    }
                    BindingTarget::Symbol(symbol_id) => {
                        let candidate = format!("{}.{}", symbol_id, rest.join("."));
                        if self.decl_index.contains_key(&candidate) {
                            return Outcome::Resolved(candidate);
                        }
                        return Outcome::External(name.to_string());
                    }
                    BindingTarget::External(dotted) => {
                        return Outcome::External(format!("{}.{}", dotted, rest.join(".")));
                    }
                }
            }
        }

        // Qualified access to a class declared in the same file.
        let local_path: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
        if let Some(id) = self.declared(file, &local_path) {
            return Outcome::Resolved(id);
        }

        Outcome::External(name.to_string())
    }
}

/// Resolve all symbol trees of a run into artifacts and edges.
///
/// Fails with `IdentityConflict` when two declarations claim the same
/// canonical id; every other resolution miss degrades to an
/// `UNRESOLVED_REFERENCE` edge, never an error.
pub fn resolve(repo_id: &str, trees: &[SymbolTree]) -> GraphResult<Resolution> {
    let mut identity = IdentityTable::new();
    let mut artifacts: Vec<Artifact> = Vec::new();
    let mut ctx = ResolveCtx {
        decl_index: IndexMap::new(),
        module_index: IndexMap::new(),
        edges: IndexSet::new(),
        warnings: Vec::new(),
        unresolved_count: 0,
    };

    // ── Pass 1: collect declarations ────────────────────────────────────
    for tree in trees {
        if tree.language == Language::Python {
            ctx.module_index
                .insert(module_name(&tree.relative_path), tree.relative_path.clone());
        }
        for node in &tree.nodes {
            let Some(kind) = artifact_kind(node.kind) else {
                continue;
            };
            let canonical_id = assign(&tree.relative_path, &node.scope_path);
            identity.claim(&canonical_id, &tree.relative_path, node.span)?;
            ctx.decl_index.insert(canonical_id.clone(), kind);
            artifacts.push(Artifact {
                repo_id: repo_id.to_string(),
                canonical_id,
                kind,
                name: node.name.clone(),
                content_hash: node.content_hash.clone().unwrap_or_default(),
                provenance: Provenance {
                    file_path: tree.relative_path.clone(),
                    span: node.span,
                    extractor_version: EXTRACTOR_VERSION.to_string(),
                },
            });
        }
    }

    // Containment follows directly from scope nesting.
    for artifact in &artifacts {
        let path: Vec<String> = match artifact.canonical_id.split_once('#') {
            Some((_, symbol)) => symbol.split('.').map(str::to_string).collect(),
            None => continue,
        };
        let parent = assign(&artifact.provenance.file_path, &path[..path.len() - 1]);
        ctx.push_edge(EdgeKind::Contains, &parent, &artifact.canonical_id);
    }

    // ── Pass 2: link references ─────────────────────────────────────────
    for tree in trees {
        let file = tree.relative_path.as_str();
        let bindings = collect_bindings(&ctx, file, &tree.nodes);

        for node in &tree.nodes {
            match node.kind {
                RawNodeKind::Import => link_import(&mut ctx, file, node),
                RawNodeKind::Call => link_call(&mut ctx, file, node, &bindings),
                RawNodeKind::Inheritance => link_inheritance(&mut ctx, file, node, &bindings),
                _ => {}
            }
        }
    }

    let edges: Vec<Edge> = ctx.edges.into_iter().collect();
    tracing::debug!(
        repo_id,
        artifacts = artifacts.len(),
        edges = edges.len(),
        unresolved = ctx.unresolved_count,
        "resolution complete"
    );

    Ok(Resolution {
        artifacts,
        edges,
        warnings: ctx.warnings,
        unresolved_count: ctx.unresolved_count,
    })
}

/// Build the local binding table for one file from its import nodes.
/// When two imports bind the same local name, the lexicographically first
/// module wins (the fixed ambiguity tie-break).
fn collect_bindings(
    ctx: &ResolveCtx,
    file: &str,
    nodes: &[RawNode],
) -> IndexMap<String, Binding> {
    let mut bindings: IndexMap<String, Binding> = IndexMap::new();

    let mut bind = |bindings: &mut IndexMap<String, Binding>, local: String, binding: Binding| {
        match bindings.get(&local) {
            Some(existing) if existing.module <= binding.module => {}
            _ => {
                bindings.insert(local, binding);
            }
        }
    };

    for node in nodes {
        if node.kind != RawNodeKind::Import {
            continue;
        }
        let Some(raw_module) = node.import_module.as_deref() else {
            continue;
        };
        let module = normalize_module(file, raw_module);
        let is_member = node.name != *raw_module && node.name != "*";

        if is_member {
            // from M import name [as alias]
            let local = node.alias.clone().unwrap_or_else(|| node.name.clone());
            let target = match ctx.module_index.get(&module) {
                Some(module_file) => {
                    let symbol_path = vec![node.name.clone()];
                    match ctx.declared(module_file, &symbol_path) {
                        Some(id) => BindingTarget::Symbol(id),
                        // `from pkg import sub` may name a submodule.
                        None => {
                            let submodule = format!("{}.{}", module, node.name);
                            match ctx.module_index.get(&submodule) {
                                Some(sub_file) => BindingTarget::Module(sub_file.clone()),
                                None => {
                                    BindingTarget::External(format!("{}.{}", module, node.name))
                                }
                            }
                        }
                    }
                }
                None => BindingTarget::External(format!("{}.{}", module, node.name)),
            };
            bind(
                &mut bindings,
                local,
                Binding {
                    target,
                    module: module.clone(),
                },
            );
        } else {
            // import M [as alias] — without an alias the full dotted path
            // stays visible, which is how qualified calls reach it.
            let local = node.alias.clone().unwrap_or_else(|| module.clone());
            let target = match ctx.module_index.get(&module) {
                Some(module_file) => BindingTarget::Module(module_file.clone()),
                None => BindingTarget::External(module.clone()),
            };
            bind(
                &mut bindings,
                local,
                Binding {
                    target,
                    module: module.clone(),
                },
            );
        }
    }

    bindings
}

fn link_import(ctx: &mut ResolveCtx, file: &str, node: &RawNode) {
    let Some(raw_module) = node.import_module.as_deref() else {
        return;
    };
    let module = normalize_module(file, raw_module);
    let is_member = node.name != *raw_module && node.name != "*";

    match ctx.module_index.get(&module).cloned() {
        Some(module_file) => {
            ctx.push_edge(EdgeKind::Imports, file, &module_file);
            if is_member {
                let symbol_path = vec![node.name.clone()];
                if let Some(id) = ctx.declared(&module_file, &symbol_path) {
                    ctx.push_edge(EdgeKind::References, file, &id);
                } else if !ctx
                    .module_index
                    .contains_key(&format!("{}.{}", module, node.name))
                {
                    let dotted = format!("{}.{}", module, node.name);
                    ctx.push_unresolved(file, &dotted, file);
                }
            }
        }
        None => {
            let dotted = if is_member {
                format!("{}.{}", module, node.name)
            } else {
                module
            };
            ctx.push_unresolved(file, &dotted, file);
        }
    }
}

fn link_call(
    ctx: &mut ResolveCtx,
    file: &str,
    node: &RawNode,
    bindings: &IndexMap<String, Binding>,
) {
    let source = ctx.enclosing_decl(file, &node.scope_path);
    match ctx.resolve_name(file, &node.scope_path, &node.name, bindings) {
        Outcome::Resolved(target) => {
            ctx.push_edge(EdgeKind::Calls, &source, &target);
            if ctx.decl_index.get(&source) == Some(&ArtifactKind::Test) {
                ctx.push_edge(EdgeKind::Tests, &source, &target);
            }
        }
        Outcome::External(dotted) => ctx.push_unresolved(&source, &dotted, file),
    }
}

fn link_inheritance(
    ctx: &mut ResolveCtx,
    file: &str,
    node: &RawNode,
    bindings: &IndexMap<String, Binding>,
) {
    // The scope path of an inheritance node names the class itself; the base
    // expression is evaluated in the class's enclosing scope.
    let class_id = assign(file, &node.scope_path);
    let enclosing = &node.scope_path[..node.scope_path.len().saturating_sub(1)];
    match ctx.resolve_name(file, enclosing, &node.name, bindings) {
        Outcome::Resolved(target) => ctx.push_edge(EdgeKind::Inherits, &class_id, &target),
        Outcome::External(dotted) => ctx.push_unresolved(&class_id, &dotted, file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::extract::extract_file;
    use crate::ingest::walker::{detect_language, SourceFile};

    fn tree(path: &str, source: &str) -> SymbolTree {
        let file = SourceFile {
            relative_path: path.to_string(),
            bytes: source.as_bytes().to_vec(),
            language: detect_language(path),
        };
        extract_file(&file).unwrap()
    }

    fn edge_set(resolution: &Resolution) -> Vec<(EdgeKind, &str, &str)> {
        resolution
            .edges
            .iter()
            .map(|e| (e.kind, e.source_id.as_str(), e.target_id.as_str()))
            .collect()
    }

    #[test]
    fn normalize_module_handles_relative_imports() {
        assert_eq!(normalize_module("pkg/sub/mod.py", "os.path"), "os.path");
        assert_eq!(normalize_module("pkg/sub/mod.py", ".util"), "pkg.sub.util");
        assert_eq!(normalize_module("pkg/sub/mod.py", "..util"), "pkg.util");
        assert_eq!(normalize_module("pkg/__init__.py", ".util"), "pkg.util");
    }

    #[test]
    fn resolves_cross_file_call_through_import() {
        let trees = vec![
            tree(
                "payments/stripe.py",
                "from payments.utils import validate_amount\n\nclass StripeClient:\n    def charge(self, amount):\n        validate_amount(amount)\n",
            ),
            tree("payments/utils.py", "def validate_amount(amount):\n    pass\n"),
        ];
        let resolution = resolve("repo-1", &trees).unwrap();

        let ids: Vec<&str> = resolution
            .artifacts
            .iter()
            .map(|a| a.canonical_id.as_str())
            .collect();
        assert!(ids.contains(&"payments/stripe.py"));
        assert!(ids.contains(&"payments/stripe.py#StripeClient"));
        assert!(ids.contains(&"payments/stripe.py#StripeClient.charge"));
        assert!(ids.contains(&"payments/utils.py#validate_amount"));

        let edges = edge_set(&resolution);
        assert!(edges.contains(&(
            EdgeKind::Contains,
            "payments/stripe.py",
            "payments/stripe.py#StripeClient"
        )));
        assert!(edges.contains(&(
            EdgeKind::Contains,
            "payments/stripe.py#StripeClient",
            "payments/stripe.py#StripeClient.charge"
        )));
        assert!(edges.contains(&(
            EdgeKind::Calls,
            "payments/stripe.py#StripeClient.charge",
            "payments/utils.py#validate_amount"
        )));
        assert!(edges.contains(&(
            EdgeKind::Imports,
            "payments/stripe.py",
            "payments/utils.py"
        )));
        assert!(edges.contains(&(
            EdgeKind::References,
            "payments/stripe.py",
            "payments/utils.py#validate_amount"
        )));
    }

    #[test]
    fn self_calls_resolve_to_methods() {
        let trees = vec![tree(
            "svc.py",
            "class Service:\n    def run(self):\n        self.step()\n    def step(self):\n        pass\n",
        )];
        let resolution = resolve("r", &trees).unwrap();
        assert!(edge_set(&resolution).contains(&(
            EdgeKind::Calls,
            "svc.py#Service.run",
            "svc.py#Service.step"
        )));
    }

    #[test]
    fn unresolved_reference_becomes_placeholder_edge() {
        let trees = vec![tree("app.py", "import requests\n\ndef fetch():\n    requests.get('x')\n")];
        let resolution = resolve("r", &trees).unwrap();
        let edges = edge_set(&resolution);
        assert!(edges.contains(&(
            EdgeKind::UnresolvedReference,
            "app.py",
            "external:requests"
        )));
        assert!(edges.contains(&(
            EdgeKind::UnresolvedReference,
            "app.py#fetch",
            "external:requests.get"
        )));
        assert_eq!(resolution.unresolved_count, 2);
        assert!(!resolution.warnings.is_empty());
    }

    #[test]
    fn circular_imports_resolve_both_directions() {
        let trees = vec![
            tree("a.py", "import b\n\ndef fa():\n    b.fb()\n"),
            tree("b.py", "import a\n\ndef fb():\n    a.fa()\n"),
        ];
        let resolution = resolve("r", &trees).unwrap();
        let edges = edge_set(&resolution);
        assert!(edges.contains(&(EdgeKind::Calls, "a.py#fa", "b.py#fb")));
        assert!(edges.contains(&(EdgeKind::Calls, "b.py#fb", "a.py#fa")));
        assert!(edges.contains(&(EdgeKind::Imports, "a.py", "b.py")));
        assert!(edges.contains(&(EdgeKind::Imports, "b.py", "a.py")));
        assert_eq!(resolution.unresolved_count, 0);
    }

    #[test]
    fn local_scope_shadows_import() {
        let trees = vec![
            tree(
                "m.py",
                "from lib import helper\n\ndef helper():\n    pass\n\ndef use():\n    helper()\n",
            ),
            tree("lib.py", "def helper():\n    pass\n"),
        ];
        let resolution = resolve("r", &trees).unwrap();
        // Module-level declaration wins over the imported binding.
        assert!(edge_set(&resolution).contains(&(EdgeKind::Calls, "m.py#use", "m.py#helper")));
    }

    #[test]
    fn ambiguous_binding_prefers_lexicographically_first_module() {
        let trees = vec![
            tree(
                "m.py",
                "from zeta import helper\nfrom alpha import helper\n\ndef use():\n    helper()\n",
            ),
            tree("alpha.py", "def helper():\n    pass\n"),
            tree("zeta.py", "def helper():\n    pass\n"),
        ];
        let resolution = resolve("r", &trees).unwrap();
        assert!(edge_set(&resolution).contains(&(EdgeKind::Calls, "m.py#use", "alpha.py#helper")));
    }

    #[test]
    fn inheritance_links_to_base_class() {
        let trees = vec![
            tree(
                "clients.py",
                "from base import Client\n\nclass StripeClient(Client):\n    pass\n",
            ),
            tree("base.py", "class Client:\n    pass\n"),
        ];
        let resolution = resolve("r", &trees).unwrap();
        assert!(edge_set(&resolution).contains(&(
            EdgeKind::Inherits,
            "clients.py#StripeClient",
            "base.py#Client"
        )));
    }

    #[test]
    fn test_defs_emit_tests_edges() {
        let trees = vec![
            tree(
                "tests/test_utils.py",
                "from payments.utils import validate_amount\n\ndef test_validate():\n    validate_amount(1)\n",
            ),
            tree("payments/utils.py", "def validate_amount(amount):\n    pass\n"),
        ];
        let resolution = resolve("r", &trees).unwrap();
        let edges = edge_set(&resolution);
        assert!(edges.contains(&(
            EdgeKind::Tests,
            "tests/test_utils.py#test_validate",
            "payments/utils.py#validate_amount"
        )));
        assert!(edges.contains(&(
            EdgeKind::Calls,
            "tests/test_utils.py#test_validate",
            "payments/utils.py#validate_amount"
        )));
    }

    #[test]
    fn duplicate_definition_is_identity_conflict() {
        let trees = vec![tree("m.py", "def f():\n    pass\n\ndef f():\n    pass\n")];
        let err = resolve("r", &trees).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::RepoGraphError::IdentityConflict { .. }
        ));
    }

    #[test]
    fn resolution_is_deterministic() {
        let build = || {
            let trees = vec![
                tree("a.py", "import b\n\ndef fa():\n    b.fb()\n"),
                tree("b.py", "def fb():\n    missing()\n"),
            ];
            resolve("r", &trees).unwrap()
        };
        let first = build();
        let second = build();
        assert_eq!(first.edges, second.edges);
        let ids: Vec<String> = first
            .artifacts
            .iter()
            .map(|a| a.canonical_id.clone())
            .collect();
        let ids2: Vec<String> = second
            .artifacts
            .iter()
            .map(|a| a.canonical_id.clone())
            .collect();
        assert_eq!(ids, ids2);
    }
}
