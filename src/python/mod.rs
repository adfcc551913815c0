//! Static inspection of Python sources with tree-sitter.
//!
//! Scripts in the library and candidates coming back from the model are only
//! ever parsed here, never executed. Everything the rest of the crate needs
//! (top-level names, function names, imports, literal values) is read off the
//! syntax tree.

mod literal;

pub use literal::{decode_string_literal, literal_value, string_value};

use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use tree_sitter::{Node, Parser, Tree};

thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // Ignore error here - will be caught at parse time if language fails
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });
}

/// Location and description of the first syntax problem in a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (line {}, column {})",
            self.message, self.line, self.column
        )
    }
}

/// One target of a top-level assignment statement.
///
/// `value` is the right-hand side when the target is a plain name bound
/// directly to it; destructuring targets carry no value.
#[derive(Debug, Clone, Copy)]
pub struct Binding<'t> {
    pub name: &'t str,
    pub value: Option<Node<'t>>,
}

/// A parsed Python module borrowing its source text.
pub struct Module<'a> {
    source: &'a str,
    tree: Tree,
}

impl<'a> Module<'a> {
    /// Parse `source` with the thread-local Python parser.
    ///
    /// tree-sitter recovers from errors, so a returned module may still contain
    /// error nodes; check [`Module::syntax_issue`] before trusting it.
    pub fn parse(source: &'a str) -> Option<Self> {
        let tree = PYTHON_PARSER.with(|p| p.borrow_mut().parse(source, None))?;
        Some(Self { source, tree })
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn text(&self, node: Node<'_>) -> &'a str {
        &self.source[node.start_byte()..node.end_byte()]
    }

    /// First error or missing node in document order.
    pub fn syntax_issue(&self) -> Option<SyntaxIssue> {
        let root = self.root();
        if !root.has_error() {
            return None;
        }

        let mut found = None;
        walk(root, |node| {
            if found.is_some() {
                return false;
            }
            if node.is_missing() {
                found = Some(issue_at(node, format!("expected '{}'", node.kind())));
                return false;
            }
            if node.is_error() {
                found = Some(issue_at(node, "invalid syntax".to_string()));
                return false;
            }
            node.has_error()
        });

        found.or_else(|| Some(issue_at(root, "invalid syntax".to_string())))
    }

    /// Statements the grammar accepts but CPython refuses to compile:
    /// Python 2 `print`/`exec` statements, `return`/`yield` outside a
    /// function, `await` outside an async function and `break`/`continue`
    /// outside a loop body.
    pub fn compile_issue(&self) -> Option<SyntaxIssue> {
        let mut found = None;
        walk(self.root(), |node| {
            if found.is_some() {
                return false;
            }
            let message = match node.kind() {
                "print_statement" => Some("Missing parentheses in call to 'print'"),
                "exec_statement" => Some("Missing parentheses in call to 'exec'"),
                "return_statement" if !inside(node, &["function_definition"], &[]) => {
                    Some("'return' outside function")
                }
                "yield" if !inside(node, &["function_definition", "lambda"], &[]) => {
                    Some("'yield' outside function")
                }
                "await" if !in_async_function(node) => Some("'await' outside async function"),
                "break_statement" if !in_loop_body(node) => Some("'break' outside loop"),
                "continue_statement" if !in_loop_body(node) => {
                    Some("'continue' not properly in loop")
                }
                _ => None,
            };
            if let Some(message) = message {
                found = Some(issue_at(node, message.to_string()));
                return false;
            }
            true
        });
        found
    }

    /// Names bound by assignment statements directly in the module body.
    pub fn top_level_bindings(&self) -> Vec<Binding<'_>> {
        let mut bindings = Vec::new();
        let root = self.root();
        let mut cursor = root.walk();
        for statement in root.named_children(&mut cursor) {
            if statement.kind() != "expression_statement" {
                continue;
            }
            let mut inner = statement.walk();
            for expr in statement.named_children(&mut inner) {
                if expr.kind() == "assignment" {
                    self.collect_assignment(expr, &mut bindings);
                }
            }
        }
        bindings
    }

    fn collect_assignment<'t>(&'t self, node: Node<'t>, out: &mut Vec<Binding<'t>>) {
        // `X: int` without a value binds nothing
        let Some(right) = node.child_by_field_name("right") else {
            return;
        };

        // `a = b = value` nests the second assignment on the right
        let mut value = right;
        let mut targets = Vec::new();
        if let Some(left) = node.child_by_field_name("left") {
            targets.push(left);
        }
        while value.kind() == "assignment" {
            if let Some(left) = value.child_by_field_name("left") {
                targets.push(left);
            }
            match value.child_by_field_name("right") {
                Some(next) => value = next,
                None => return,
            }
        }

        for target in targets {
            if target.kind() == "identifier" {
                out.push(Binding {
                    name: self.text(target),
                    value: Some(value),
                });
            } else {
                walk(target, |n| {
                    if n.kind() == "identifier" {
                        out.push(Binding {
                            name: self.text(n),
                            value: None,
                        });
                    }
                    // attribute/subscript targets bind no module-level name
                    !matches!(n.kind(), "attribute" | "subscript")
                });
            }
        }
    }

    /// Names of functions defined directly in the module body, decorated or not.
    pub fn top_level_functions(&self) -> Vec<&'a str> {
        let mut names = Vec::new();
        let root = self.root();
        let mut cursor = root.walk();
        for statement in root.named_children(&mut cursor) {
            let definition = match statement.kind() {
                "function_definition" => Some(statement),
                "decorated_definition" => statement.child_by_field_name("definition"),
                _ => None,
            };
            if let Some(def) = definition.filter(|d| d.kind() == "function_definition") {
                if let Some(name) = def.child_by_field_name("name") {
                    names.push(self.text(name));
                }
            }
        }
        names
    }

    /// Top-level package of every absolute import anywhere in the module.
    ///
    /// `import a.b.c` and `from a.b import c` both yield `a`; relative imports
    /// and `from __future__` are skipped.
    pub fn import_roots(&self) -> Vec<&'a str> {
        let mut roots = Vec::new();
        walk(self.root(), |node| {
            match node.kind() {
                "import_statement" => {
                    let mut cursor = node.walk();
                    for name in node.children_by_field_name("name", &mut cursor) {
                        let dotted = if name.kind() == "aliased_import" {
                            name.child_by_field_name("name")
                        } else {
                            Some(name)
                        };
                        if let Some(root) = dotted.and_then(|d| self.dotted_root(d)) {
                            roots.push(root);
                        }
                    }
                    false
                }
                "import_from_statement" => {
                    if let Some(module) = node.child_by_field_name("module_name") {
                        if module.kind() == "dotted_name" {
                            if let Some(root) = self.dotted_root(module) {
                                roots.push(root);
                            }
                        }
                    }
                    false
                }
                "future_import_statement" => false,
                _ => true,
            }
        });
        roots
    }

    fn dotted_root(&self, node: Node<'_>) -> Option<&'a str> {
        let text = self.text(node);
        text.split('.')
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Literal values of top-level bindings, keyed by name.
    ///
    /// A later literal assignment replaces an earlier one; non-literal
    /// assignments are ignored.
    pub fn literal_bindings(&self) -> HashMap<String, Value> {
        let mut values = HashMap::new();
        let root = self.root();
        let mut cursor = root.walk();
        for statement in root.named_children(&mut cursor) {
            if statement.kind() != "expression_statement" {
                continue;
            }
            let mut inner = statement.walk();
            for expr in statement.named_children(&mut inner) {
                if expr.kind() != "assignment" {
                    continue;
                }
                let mut bindings = Vec::new();
                self.collect_assignment(expr, &mut bindings);
                for binding in bindings {
                    if let Some(value) = binding.value.and_then(|v| literal_value(v, self.source))
                    {
                        values.insert(binding.name.to_string(), value);
                    }
                }
            }
        }
        values
    }
}

/// Pre-order traversal; `visit` returns whether to descend into the node.
pub fn walk<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>) -> bool) {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if visit(node) && cursor.goto_first_child() {
            continue;
        }

        loop {
            if cursor.node() == root {
                return;
            }
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

fn issue_at(node: Node<'_>, message: String) -> SyntaxIssue {
    let pos = node.start_position();
    SyntaxIssue {
        line: pos.row + 1,
        column: pos.column + 1,
        message,
    }
}

/// Whether `node` has an ancestor of one of `kinds` before hitting a `barrier`.
fn inside(node: Node<'_>, kinds: &[&str], barriers: &[&str]) -> bool {
    let mut current = node.parent();
    while let Some(parent) = current {
        let kind = parent.kind();
        if kinds.contains(&kind) {
            return true;
        }
        if barriers.contains(&kind) {
            return false;
        }
        current = parent.parent();
    }
    false
}

/// Whether `node` sits in the body of a `for`/`while` loop in the same scope.
///
/// The loop's `else` clause runs after the loop and does not count.
fn in_loop_body(node: Node<'_>) -> bool {
    let mut child = node;
    let mut current = node.parent();
    while let Some(parent) = current {
        match parent.kind() {
            "for_statement" | "while_statement" if child.kind() != "else_clause" => return true,
            "function_definition" | "class_definition" | "lambda" => return false,
            _ => {}
        }
        child = parent;
        current = parent.parent();
    }
    false
}

/// Whether the nearest enclosing function of `node` is declared `async`.
fn in_async_function(node: Node<'_>) -> bool {
    let mut current = node.parent();
    while let Some(parent) = current {
        match parent.kind() {
            "function_definition" => {
                let mut cursor = parent.walk();
                let is_async = parent.children(&mut cursor).any(|c| c.kind() == "async");
                return is_async;
            }
            "lambda" | "class_definition" => return false,
            _ => {}
        }
        current = parent.parent();
    }
    false
}
