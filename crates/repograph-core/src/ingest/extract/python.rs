//! Python language backend built on tree-sitter-python.
//!
//! Emits module, class, function, method, and test definitions with their
//! spans and docstrings, plus import, call, and inheritance references for
//! the resolver to link.

use tree_sitter::Node;

use crate::ingest::extract::{
    LanguageBackend, RawNode, RawNodeKind, SymbolTree, TEST_FILE_RE,
};
use crate::ingest::walker::{Language, SourceFile};
use crate::models::{content_hash, ExtractionError, Span};

pub struct PythonBackend;

/// One entry of the lexical scope chain during tree walking.
struct Scope {
    name: String,
    is_class: bool,
}

struct Walker<'a> {
    source: &'a [u8],
    scope: Vec<Scope>,
    nodes: Vec<RawNode>,
    in_test_file: bool,
}

/// Convert a relative path to a dotted module name.
/// `payments/stripe.py` -> `payments.stripe`; `payments/__init__.py` -> `payments`.
pub fn module_name(rel_path: &str) -> String {
    let trimmed = rel_path.strip_suffix(".py").unwrap_or(rel_path);
    let parts: Vec<&str> = trimmed
        .split('/')
        .filter(|s| !s.is_empty() && *s != "__init__")
        .collect();
    parts.join(".")
}

fn node_span(node: Node) -> Span {
    Span {
        byte_start: node.start_byte(),
        byte_end: node.end_byte(),
        line_start: node.start_position().row as i64 + 1,
        line_end: node.end_position().row as i64 + 1,
    }
}

/// Render a callee or base-class expression as a dotted name, if it is one.
/// Returns `None` for anything more dynamic (subscripts, calls, lambdas).
fn dotted_text(node: Node, source: &[u8]) -> Option<String> {
    match node.kind() {
        "identifier" | "dotted_name" => node.utf8_text(source).ok().map(str::to_string),
        "attribute" => {
            let object = dotted_text(node.child_by_field_name("object")?, source)?;
            let attr = node
                .child_by_field_name("attribute")?
                .utf8_text(source)
                .ok()?;
            Some(format!("{object}.{attr}"))
        }
        _ => None,
    }
}

/// Strip string quoting from a docstring literal.
fn clean_docstring(raw: &str) -> String {
    let trimmed = raw
        .trim_start_matches(['r', 'R', 'b', 'B', 'u', 'U', 'f', 'F']);
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if trimmed.starts_with(quote) && trimmed.ends_with(quote) && trimmed.len() >= 2 * quote.len()
        {
            return trimmed[quote.len()..trimmed.len() - quote.len()]
                .trim()
                .to_string();
        }
    }
    trimmed.trim().to_string()
}

/// First statement of a block, if it is a bare string literal.
fn block_docstring(body: Node, source: &[u8]) -> Option<String> {
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = first.named_child(0)?;
    if expr.kind() != "string" {
        return None;
    }
    expr.utf8_text(source)
        .ok()
        .map(|raw| clean_docstring(raw))
        .filter(|s| !s.is_empty())
}

impl<'a> Walker<'a> {
    fn scope_names(&self) -> Vec<String> {
        self.scope.iter().map(|s| s.name.clone()).collect()
    }

    fn definition(&mut self, kind: RawNodeKind, name: &str, node: Node, docstring: Option<String>) {
        let mut scope_path = self.scope_names();
        scope_path.push(name.to_string());
        let span = node_span(node);
        self.nodes.push(RawNode {
            kind,
            name: name.to_string(),
            scope_path,
            span,
            content_hash: Some(content_hash(&self.source[span.byte_start..span.byte_end])),
            docstring,
            import_module: None,
            alias: None,
        });
    }

    fn import(&mut self, name: String, module: String, alias: Option<String>, node: Node) {
        self.nodes.push(RawNode {
            kind: RawNodeKind::Import,
            name,
            scope_path: self.scope_names(),
            span: node_span(node),
            content_hash: None,
            docstring: None,
            import_module: Some(module),
            alias,
        });
    }

    fn visit(&mut self, node: Node) {
        match node.kind() {
            "decorated_definition" => {
                if let Some(inner) = node.child_by_field_name("definition") {
                    self.visit(inner);
                }
            }
            "class_definition" => self.visit_class(node),
            "function_definition" => self.visit_function(node),
            "import_statement" => self.visit_import(node),
            "import_from_statement" => self.visit_import_from(node),
            "call" => {
                self.visit_call(node);
                self.visit_children(node);
            }
            _ => self.visit_children(node),
        }
    }

    fn visit_children(&mut self, node: Node) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child);
        }
    }

    fn visit_class(&mut self, node: Node) {
        let name = match node
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(self.source).ok())
        {
            Some(n) => n.to_string(),
            None => return,
        };
        let docstring = node
            .child_by_field_name("body")
            .and_then(|b| block_docstring(b, self.source));
        self.definition(RawNodeKind::ClassDef, &name, node, docstring);

        // Base classes reference outward from the class itself.
        let class_scope = {
            let mut s = self.scope_names();
            s.push(name.clone());
            s
        };
        if let Some(supers) = node.child_by_field_name("superclasses") {
            let mut cursor = supers.walk();
            for base in supers.named_children(&mut cursor) {
                if let Some(text) = dotted_text(base, self.source) {
                    self.nodes.push(RawNode::reference(
                        RawNodeKind::Inheritance,
                        text,
                        &class_scope,
                        node_span(base),
                    ));
                }
            }
        }

        self.scope.push(Scope {
            name,
            is_class: true,
        });
        if let Some(body) = node.child_by_field_name("body") {
            self.visit_children(body);
        }
        self.scope.pop();
    }

    fn visit_function(&mut self, node: Node) {
        let name = match node
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(self.source).ok())
        {
            Some(n) => n.to_string(),
            None => return,
        };
        let in_class = self.scope.last().map(|s| s.is_class).unwrap_or(false);
        let is_test =
            name.starts_with("test_") || (self.in_test_file && name.starts_with("test"));
        let kind = if is_test {
            RawNodeKind::TestDef
        } else if in_class {
            RawNodeKind::MethodDef
        } else {
            RawNodeKind::FunctionDef
        };
        let docstring = node
            .child_by_field_name("body")
            .and_then(|b| block_docstring(b, self.source));
        self.definition(kind, &name, node, docstring);

        self.scope.push(Scope {
            name,
            is_class: false,
        });
        if let Some(body) = node.child_by_field_name("body") {
            self.visit_children(body);
        }
        self.scope.pop();
    }

    /// `import a.b` / `import a.b as c`
    fn visit_import(&mut self, node: Node) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "dotted_name" => {
                    if let Ok(module) = child.utf8_text(self.source) {
                        self.import(module.to_string(), module.to_string(), None, child);
                    }
                }
                "aliased_import" => {
                    let module = child
                        .child_by_field_name("name")
                        .and_then(|n| n.utf8_text(self.source).ok());
                    let alias = child
                        .child_by_field_name("alias")
                        .and_then(|n| n.utf8_text(self.source).ok());
                    if let Some(module) = module {
                        self.import(
                            module.to_string(),
                            module.to_string(),
                            alias.map(str::to_string),
                            child,
                        );
                    }
                }
                _ => {}
            }
        }
    }

    /// `from a.b import x, y as z` / `from . import x` / `from a import *`
    fn visit_import_from(&mut self, node: Node) {
        let module = match node
            .child_by_field_name("module_name")
            .and_then(|n| n.utf8_text(self.source).ok())
        {
            Some(m) => m.to_string(),
            None => return,
        };
        let mut cursor = node.walk();
        let mut saw_name = false;
        for child in node.children_by_field_name("name", &mut cursor) {
            saw_name = true;
            match child.kind() {
                "dotted_name" | "identifier" => {
                    if let Ok(name) = child.utf8_text(self.source) {
                        self.import(name.to_string(), module.clone(), None, child);
                    }
                }
                "aliased_import" => {
                    let name = child
                        .child_by_field_name("name")
                        .and_then(|n| n.utf8_text(self.source).ok());
                    let alias = child
                        .child_by_field_name("alias")
                        .and_then(|n| n.utf8_text(self.source).ok());
                    if let Some(name) = name {
                        self.import(
                            name.to_string(),
                            module.clone(),
                            alias.map(str::to_string),
                            child,
                        );
                    }
                }
                _ => {}
            }
        }
        if !saw_name {
            // `from a import *` — record the module import itself.
            self.import("*".to_string(), module, None, node);
        }
    }

    fn visit_call(&mut self, node: Node) {
        let callee = match node.child_by_field_name("function") {
            Some(f) => f,
            None => return,
        };
        if let Some(text) = dotted_text(callee, self.source) {
            let scope = self.scope_names();
            self.nodes
                .push(RawNode::reference(RawNodeKind::Call, text, &scope, node_span(node)));
        }
    }
}

impl LanguageBackend for PythonBackend {
    fn language(&self) -> Language {
        Language::Python
    }

    fn extract(&self, file: &SourceFile) -> Result<SymbolTree, ExtractionError> {
        let path = file.relative_path.clone();
        if std::str::from_utf8(&file.bytes).is_err() {
            return Err(ExtractionError {
                path,
                reason: "file is not valid UTF-8".to_string(),
            });
        }

        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| ExtractionError {
                path: path.clone(),
                reason: format!("failed to load Python grammar: {e}"),
            })?;
        let tree = parser
            .parse(&file.bytes, None)
            .ok_or_else(|| ExtractionError {
                path: path.clone(),
                reason: "parser returned no tree".to_string(),
            })?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(ExtractionError {
                path,
                reason: "syntax error".to_string(),
            });
        }

        let line_count = file.bytes.iter().filter(|&&b| b == b'\n').count() as i64 + 1;
        let module_node = RawNode {
            kind: RawNodeKind::Module,
            name: module_name(&file.relative_path),
            scope_path: Vec::new(),
            span: Span {
                byte_start: 0,
                byte_end: file.bytes.len(),
                line_start: 1,
                line_end: line_count,
            },
            content_hash: Some(content_hash(&file.bytes)),
            docstring: block_docstring(root, &file.bytes),
            import_module: None,
            alias: None,
        };

        let mut walker = Walker {
            source: &file.bytes,
            scope: Vec::new(),
            nodes: vec![module_node],
            in_test_file: TEST_FILE_RE.is_match(&file.relative_path),
        };
        walker.visit_children(root);

        Ok(SymbolTree {
            relative_path: file.relative_path.clone(),
            language: Language::Python,
            nodes: walker.nodes,
        })
    }
}
