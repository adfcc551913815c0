//! Script library: discovery, metadata, and persistence of generated scripts.
//!
//! Metadata is read statically from the literal module-level variables each
//! script defines; scripts are never imported or executed to list them.

use crate::generate::GeneratedArtifact;
use crate::python::Module;
use anyhow::{anyhow, bail, Context};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

const FALLBACK_DESCRIPTION: &str = "No description available.";
const FALLBACK_SLUG: &str = "generated_script";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Int,
    Float,
    Str,
    Bool,
}

impl ParameterKind {
    /// Map a PARAMETERS `type` string; unknown types are treated as text.
    pub fn from_type_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => ParameterKind::Int,
            "float" | "number" => ParameterKind::Float,
            "bool" | "boolean" => ParameterKind::Bool,
            _ => ParameterKind::Str,
        }
    }

    /// Parse a user-supplied value for this kind.
    pub fn parse_value(&self, raw: &str) -> anyhow::Result<Value> {
        let raw = raw.trim();
        match self {
            ParameterKind::Int => raw
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| anyhow!("'{}' is not an integer", raw)),
            ParameterKind::Float => raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| anyhow!("'{}' is not a number", raw)),
            ParameterKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                _ => Err(anyhow!("'{}' is not a boolean", raw)),
            },
            ParameterKind::Str => Ok(Value::String(raw.to_string())),
        }
    }
}

/// One entry of a script's PARAMETERS list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptParameter {
    pub name: String,
    pub kind: ParameterKind,
    pub default: Value,
    pub description: String,
}

impl ScriptParameter {
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let name = object.get("name")?.as_str()?.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            kind: ParameterKind::from_type_name(
                object.get("type").and_then(Value::as_str).unwrap_or("str"),
            ),
            default: object.get("default").cloned().unwrap_or(Value::Null),
            description: object
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

/// A script in the library.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Script {
    pub name: String,
    /// File stem, unique within the library.
    pub filename: String,
    pub path: PathBuf,
    pub description: String,
    pub input_types: String,
    pub parameters: Vec<ScriptParameter>,
    pub accepts_multiple_files: bool,
}

impl Script {
    /// Read a script's metadata from its source.
    pub fn from_source(path: &Path, source: &str) -> anyhow::Result<Self> {
        let filename = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("Invalid script file name: {}", path.display()))?
            .to_string();

        let module = Module::parse(source)
            .ok_or_else(|| anyhow!("Failed to parse {}", path.display()))?;
        if let Some(issue) = module.syntax_issue() {
            bail!("Syntax error in {}: {}", path.display(), issue);
        }
        let values = module.literal_bindings();
        let text = |key: &str| values.get(key).and_then(Value::as_str).map(str::to_string);

        let parameters = match values.get("PARAMETERS") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(ScriptParameter::from_value)
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            name: text("NAME")
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| filename.clone()),
            description: text("DESCRIPTION").unwrap_or_else(|| FALLBACK_DESCRIPTION.to_string()),
            input_types: text("INPUT_TYPES").unwrap_or_default(),
            parameters,
            accepts_multiple_files: values
                .get("ACCEPTS_MULTIPLE_FILES")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            filename,
            path: path.to_path_buf(),
        })
    }

    pub fn parameter(&self, name: &str) -> Option<&ScriptParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// File extensions from INPUT_TYPES, e.g. `Images (*.png *.jpg)` → `[".png", ".jpg"]`.
    pub fn input_extensions(&self) -> Vec<String> {
        let Some((_, rest)) = self.input_types.split_once('(') else {
            return Vec::new();
        };
        rest.replace([')', '*', ','], " ")
            .split_whitespace()
            .filter(|ext| ext.starts_with('.'))
            .map(str::to_lowercase)
            .collect()
    }
}

/// Scripts found in one directory.
#[derive(Debug, Clone)]
pub struct ScriptLibrary {
    dir: PathBuf,
    scripts: Vec<Script>,
}

impl ScriptLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            scripts: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scan the directory (creating it if needed). Scripts that fail to load
    /// are skipped with a warning.
    pub fn load(&mut self) -> anyhow::Result<&[Script]> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create scripts directory {}", self.dir.display()))?;

        let mut paths: Vec<PathBuf> = WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_script_file(p))
            .collect();
        paths.sort();

        let mut scripts = Vec::with_capacity(paths.len());
        for path in paths {
            let loaded = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))
                .and_then(|source| Script::from_source(&path, &source));
            match loaded {
                Ok(script) => scripts.push(script),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping script"),
            }
        }

        self.scripts = scripts;
        Ok(&self.scripts)
    }

    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Script> {
        self.scripts.iter().find(|s| s.name == name)
    }

    pub fn find_by_filename(&self, filename: &str) -> Option<&Script> {
        let stem = filename.strip_suffix(".py").unwrap_or(filename);
        self.scripts.iter().find(|s| s.filename == stem)
    }

    /// Look up by filename first, then by display name.
    pub fn find(&self, key: &str) -> Option<&Script> {
        self.find_by_filename(key).or_else(|| self.find_by_name(key))
    }

    /// Case-insensitive substring match over name and description.
    pub fn filter(&self, query: &str) -> Vec<&Script> {
        let query = query.trim().to_lowercase();
        self.scripts
            .iter()
            .filter(|s| {
                query.is_empty()
                    || s.name.to_lowercase().contains(&query)
                    || s.description.to_lowercase().contains(&query)
            })
            .collect()
    }

    /// Path a generated artifact would be written to.
    pub fn artifact_path(&self, artifact: &GeneratedArtifact) -> PathBuf {
        self.dir.join(format!("{}.py", slug(&artifact.name)))
    }
}

fn is_script_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".py") && !name.starts_with("__")
}

/// Filesystem-safe name: lowercase, spaces to underscores, only `[a-z0-9_]`.
pub fn slug(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect();
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// Write an accepted artifact into `dir` as `<slug>.py`.
pub fn save_artifact(dir: &Path, artifact: &GeneratedArtifact) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create scripts directory {}", dir.display()))?;
    let path = dir.join(format!("{}.py", slug(&artifact.name)));
    let mut code = artifact.code.clone();
    if !code.ends_with('\n') {
        code.push('\n');
    }
    fs::write(&path, code).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), name = %artifact.name, "saved generated script");
    Ok(path)
}
