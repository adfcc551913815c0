//! Structural checks for candidate scripts.
//!
//! Nothing here executes the candidate. The anti-pattern scan is textual;
//! everything else reads the tree-sitter syntax tree. Every entry point is
//! total: malformed input produces a failing [`ValidationResult`] or the
//! documented defaults, never an error.

use crate::packages::distribution_for;
use crate::python::{string_value, Module};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Module-level variables every script must define.
pub const REQUIRED_VARIABLES: [&str; 4] = ["NAME", "DESCRIPTION", "INPUT_TYPES", "PARAMETERS"];

/// Module-level functions every script must define.
pub const REQUIRED_FUNCTIONS: [&str; 2] = ["main", "process_files"];

pub const DEFAULT_NAME: &str = "Generated Script";
pub const DEFAULT_DESCRIPTION: &str = "No description";

/// Forbidden textual patterns, checked in order. Only the first hit is reported.
const ANTI_PATTERNS: &[(&str, &str)] = &[
    (
        r#"["'](?:\./)?static/"#,
        "Hardcoded output directory 'static/' found. Save outputs under ~/Downloads/<script_name_slug>/<timestamp>_output/ instead.",
    ),
    (
        r#"["'](?:\./)?output/"#,
        "Hardcoded output directory 'output/' found. Save outputs under ~/Downloads/<script_name_slug>/<timestamp>_output/ instead.",
    ),
    (
        r#"["'](?:\./)?outputs/"#,
        "Hardcoded output directory 'outputs/' found. Save outputs under ~/Downloads/<script_name_slug>/<timestamp>_output/ instead.",
    ),
    (
        r#"["'](?:\./)?temp/"#,
        "Hardcoded directory 'temp/' found. Use the tempfile module or the Downloads output folder instead.",
    ),
    (
        r#"["'](?:\./)?tmp/"#,
        "Hardcoded directory 'tmp/' found. Use the tempfile module or the Downloads output folder instead.",
    ),
    (
        r#"["'](?:\./)?data/"#,
        "Hardcoded directory 'data/' found. Read from the input file paths and write to the Downloads output folder instead.",
    ),
    (
        r"\bstatic_folder\s*=",
        "Web framework static folder configuration (static_folder=) found. Scripts must not serve files or write into a static folder.",
    ),
    (
        r#"\burl_for\(\s*["']static["']"#,
        "Web framework static URL (url_for('static', ...)) found. Scripts must not serve files or write into a static folder.",
    ),
    (
        r#"\bopen\(\s*[rRbBuUfF]{0,2}["']\.{1,2}[/\\]"#,
        "Relative-path file open found (open('./...')). Build paths from the input files or the Downloads output folder.",
    ),
];

fn anti_patterns() -> &'static [(Regex, &'static str)] {
    static COMPILED: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        ANTI_PATTERNS
            .iter()
            .filter_map(|(pattern, description)| {
                Regex::new(pattern).ok().map(|re| (re, *description))
            })
            .collect()
    })
}

/// Python standard library top-level modules never reported as external.
const STDLIB_MODULES: &[&str] = &[
    "__future__", "abc", "argparse", "array", "ast", "asyncio", "base64", "binascii", "bisect",
    "builtins", "bz2", "calendar", "cmath", "codecs", "collections", "colorsys", "concurrent",
    "configparser", "contextlib", "copy", "csv", "ctypes", "dataclasses", "datetime", "decimal",
    "difflib", "email", "enum", "errno", "fnmatch", "fractions", "functools", "gc", "getpass",
    "glob", "gzip", "hashlib", "heapq", "hmac", "html", "http", "imghdr", "importlib", "inspect",
    "io", "ipaddress", "itertools", "json", "logging", "lzma", "math", "mimetypes",
    "multiprocessing", "numbers", "operator", "os", "pathlib", "pickle", "platform", "pprint",
    "queue", "random", "re", "secrets", "select", "shlex", "shutil", "signal", "socket",
    "sqlite3", "stat", "statistics", "string", "struct", "subprocess", "sys", "tarfile",
    "tempfile", "textwrap", "threading", "time", "timeit", "tkinter", "traceback", "types",
    "typing", "unicodedata", "unittest", "urllib", "uuid", "warnings", "wave", "weakref",
    "xml", "zipfile", "zlib",
];

/// Packages the application environment already ships with.
const PREINSTALLED_PACKAGES: &[&str] = &["PIL", "customtkinter"];

/// Outcome of a single validation pass.
///
/// The error message is empty exactly when the result is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    is_valid: bool,
    error_message: String,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            error_message: String::new(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "Validation failed".to_string()
        } else {
            message
        };
        Self {
            is_valid: false,
            error_message: message,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }
}

/// Safe metadata read from literal `NAME`/`DESCRIPTION` assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptMetadata {
    pub name: String,
    pub description: String,
}

impl Default for ScriptMetadata {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }
}

/// Checks candidate scripts against the library's structural contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl StructuralValidator {
    pub fn new() -> Self {
        Self
    }

    /// Scan for forbidden output-path conventions.
    pub fn check_anti_patterns(&self, code: &str) -> ValidationResult {
        for (re, description) in anti_patterns() {
            if re.is_match(code) {
                return ValidationResult::invalid(*description);
            }
        }
        ValidationResult::valid()
    }

    /// Full structural validation: anti-patterns, syntax, required symbols,
    /// then the compile-only checks.
    pub fn validate_structure(&self, code: &str) -> ValidationResult {
        let anti = self.check_anti_patterns(code);
        if !anti.is_valid() {
            return anti;
        }

        let Some(module) = Module::parse(code) else {
            return ValidationResult::invalid("Syntax error: source could not be parsed");
        };
        if let Some(issue) = module.syntax_issue() {
            return ValidationResult::invalid(format!("Syntax error: {}", issue));
        }

        let assigned: BTreeSet<&str> = module
            .top_level_bindings()
            .iter()
            .map(|b| b.name)
            .collect();
        let defined: BTreeSet<&str> = module.top_level_functions().into_iter().collect();

        let mut missing: Vec<String> = REQUIRED_VARIABLES
            .iter()
            .filter(|name| !assigned.contains(*name))
            .map(|name| name.to_string())
            .collect();
        missing.extend(
            REQUIRED_FUNCTIONS
                .iter()
                .filter(|name| !defined.contains(*name))
                .map(|name| format!("{}()", name)),
        );
        if !missing.is_empty() {
            return ValidationResult::invalid(format!(
                "Missing required definitions: {}",
                missing.join(", ")
            ));
        }

        if let Some(issue) = module.compile_issue() {
            return ValidationResult::invalid(format!("Syntax error: {}", issue));
        }

        ValidationResult::valid()
    }

    /// Read `NAME` and `DESCRIPTION` from top-level string literal assignments.
    ///
    /// Computed values are ignored. Falls back to the defaults for anything
    /// missing and for sources that do not parse.
    pub fn extract_metadata(&self, code: &str) -> ScriptMetadata {
        let mut metadata = ScriptMetadata::default();
        let Some(module) = Module::parse(code) else {
            return metadata;
        };
        if module.syntax_issue().is_some() {
            return metadata;
        }

        for binding in module.top_level_bindings() {
            let Some(value) = binding.value else {
                continue;
            };
            let Some(text) = string_value(value, module.source()) else {
                continue;
            };
            match binding.name {
                "NAME" => metadata.name = text,
                "DESCRIPTION" => metadata.description = text,
                _ => {}
            }
        }
        metadata
    }

    /// Whether `package` (an import or distribution name) ships with the
    /// application environment.
    pub fn is_preinstalled(&self, package: &str) -> bool {
        let wanted = distribution_for(package.trim());
        PREINSTALLED_PACKAGES
            .iter()
            .any(|p| distribution_for(p).eq_ignore_ascii_case(wanted))
    }

    /// Third-party top-level packages imported anywhere in the source,
    /// sorted and deduplicated.
    pub fn detect_external_packages(&self, code: &str) -> Vec<String> {
        let Some(module) = Module::parse(code) else {
            return Vec::new();
        };
        if module.syntax_issue().is_some() {
            return Vec::new();
        }

        module
            .import_roots()
            .into_iter()
            .filter(|root| !STDLIB_MODULES.contains(root))
            .filter(|root| !PREINSTALLED_PACKAGES.contains(root))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
