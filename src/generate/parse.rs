//! Normalising model responses into a candidate script.
//!
//! Two shapes come back from the model: the structured JSON object asked for
//! in the system prompt, and plain code (optionally fenced) from models that
//! ignore the format instruction.

use super::error::ResponseFormatError;
use super::validator::StructuralValidator;
use super::GeneratedArtifact;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StructuredResponse {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponse {
    Structured(StructuredResponse),
    Legacy { code: String },
}

impl ParsedResponse {
    pub fn code(&self) -> &str {
        match self {
            ParsedResponse::Structured(structured) => &structured.code,
            ParsedResponse::Legacy { code } => code,
        }
    }

    /// Build the artifact, filling whatever the response did not state from
    /// the code itself.
    pub fn into_artifact(self, validator: &StructuralValidator) -> GeneratedArtifact {
        match self {
            ParsedResponse::Structured(structured) => {
                let metadata = validator.extract_metadata(&structured.code);
                let mut packages: Vec<String> = Vec::new();
                for package in structured.packages {
                    let package = package.trim();
                    if package.is_empty() || validator.is_preinstalled(package) {
                        continue;
                    }
                    if !packages.iter().any(|p| p == package) {
                        packages.push(package.to_string());
                    }
                }
                GeneratedArtifact {
                    name: non_empty(structured.name).unwrap_or(metadata.name),
                    description: non_empty(structured.description)
                        .unwrap_or(metadata.description),
                    external_packages: packages,
                    code: structured.code,
                }
            }
            ParsedResponse::Legacy { code } => {
                let metadata = validator.extract_metadata(&code);
                GeneratedArtifact {
                    name: metadata.name,
                    description: metadata.description,
                    external_packages: validator.detect_external_packages(&code),
                    code,
                }
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a raw model response, preferring the structured form.
pub fn parse_response(raw: &str) -> Result<ParsedResponse, ResponseFormatError> {
    if let Some(structured) = parse_structured(raw) {
        // The code field itself is sometimes fenced.
        let code = extract_code_block(&structured.code);
        if !code.is_empty() {
            return Ok(ParsedResponse::Structured(StructuredResponse {
                code,
                ..structured
            }));
        }
    }

    let code = extract_code_block(raw);
    if code.is_empty() {
        return Err(ResponseFormatError);
    }
    Ok(ParsedResponse::Legacy { code })
}

fn parse_structured(raw: &str) -> Option<StructuredResponse> {
    let mut candidates = Vec::new();
    push_unique_candidate(&mut candidates, raw);
    if let Some(stripped) = strip_markdown_fences(raw) {
        push_unique_candidate(&mut candidates, stripped);
    }
    if let Some(start) = raw.find('{') {
        if let Some(object) = extract_balanced_object(raw, start) {
            push_unique_candidate(&mut candidates, object);
        }
    }

    candidates
        .iter()
        .find_map(|candidate| serde_json::from_str::<StructuredResponse>(candidate).ok())
}

fn push_unique_candidate(candidates: &mut Vec<String>, candidate: impl Into<String>) {
    let candidate = candidate.into();
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return;
    }
    if !candidates.iter().any(|existing| existing == trimmed) {
        candidates.push(trimmed.to_string());
    }
}

/// Body of a response that is entirely one fenced block, whatever its label.
fn strip_markdown_fences(content: &str) -> Option<String> {
    let trimmed = content.trim();
    let without_open = trimmed.strip_prefix("```")?;
    let after_header = match without_open.find('\n') {
        Some(newline_idx) => &without_open[newline_idx + 1..],
        None => without_open,
    };
    let end_idx = after_header.rfind("```")?;
    Some(after_header[..end_idx].trim().to_string())
}

fn extract_balanced_object(content: &str, start: usize) -> Option<String> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(content[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// First ```python (or unlabeled) fenced block, or the whole text.
fn extract_code_block(raw: &str) -> String {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:python3?|py)?[ \t]*\r?\n(.*?)\r?\n?```").ok()
    });

    if let Some(captures) = fence.as_ref().and_then(|re| re.captures(raw)) {
        if let Some(body) = captures.get(1) {
            return body.as_str().trim().to_string();
        }
    }
    raw.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "import cv2\nimport numpy\nNAME = \"Edge Finder\"\nDESCRIPTION = \"Finds edges\"\nINPUT_TYPES = \"*.png\"\nPARAMETERS = []\n\ndef main():\n    pass\n\ndef process_files(file_paths, **kwargs):\n    pass";

    #[test]
    fn test_structured_response() {
        let raw = r#"{"name":"Foo","description":"Bar","packages":["opencv-python"],"code":"NAME=\"Foo\"\n..."}"#;
        let parsed = parse_response(raw).unwrap();
        let ParsedResponse::Structured(structured) = &parsed else {
            panic!("expected structured response, got {:?}", parsed);
        };
        assert_eq!(structured.name.as_deref(), Some("Foo"));
        assert_eq!(parsed.code(), "NAME=\"Foo\"\n...");

        let artifact = parsed.into_artifact(&StructuralValidator::new());
        assert_eq!(artifact.name, "Foo");
        assert_eq!(artifact.description, "Bar");
        assert_eq!(artifact.external_packages, vec!["opencv-python"]);
    }

    #[test]
    fn test_structured_response_inside_fence_with_chatter() {
        let body = serde_json::json!({
            "name": "Edge Finder",
            "description": "Finds edges",
            "packages": ["opencv-python", " opencv-python ", ""],
            "code": SCRIPT,
        });
        let raw = format!("Here you go:\n```json\n{}\n```\nEnjoy!", body);
        let parsed = parse_response(&raw).unwrap();
        assert!(matches!(parsed, ParsedResponse::Structured(_)));

        let artifact = parsed.into_artifact(&StructuralValidator::new());
        assert_eq!(artifact.code, SCRIPT);
        assert_eq!(artifact.external_packages, vec!["opencv-python"]);
    }

    #[test]
    fn test_structured_code_field_inside_fence() {
        let raw = serde_json::json!({
            "name": "Edge Finder",
            "packages": [],
            "code": format!("```python\n{}\n```", SCRIPT),
        })
        .to_string();
        let parsed = parse_response(&raw).unwrap();
        assert!(matches!(parsed, ParsedResponse::Structured(_)));
        assert_eq!(parsed.code(), SCRIPT);
        assert!(StructuralValidator::new()
            .validate_structure(parsed.code())
            .is_valid());
    }

    #[test]
    fn test_structured_packages_skip_preinstalled() {
        let raw = serde_json::json!({
            "name": "Edge Finder",
            "packages": ["Pillow", "opencv-python", "PIL", "customtkinter", "numpy"],
            "code": SCRIPT,
        })
        .to_string();
        let artifact = parse_response(&raw)
            .unwrap()
            .into_artifact(&StructuralValidator::new());
        assert_eq!(artifact.external_packages, vec!["opencv-python", "numpy"]);
    }

    #[test]
    fn test_structured_response_missing_metadata_falls_back_to_code() {
        let raw = serde_json::json!({ "code": SCRIPT, "name": "  " }).to_string();
        let artifact = parse_response(&raw)
            .unwrap()
            .into_artifact(&StructuralValidator::new());
        assert_eq!(artifact.name, "Edge Finder");
        assert_eq!(artifact.description, "Finds edges");
        assert!(artifact.external_packages.is_empty());
    }

    #[test]
    fn test_legacy_fenced_python() {
        let raw = format!("Sure! Here is the script:\n\n```python\n{}\n```\n", SCRIPT);
        let parsed = parse_response(&raw).unwrap();
        assert_eq!(
            parsed,
            ParsedResponse::Legacy {
                code: SCRIPT.to_string()
            }
        );

        let artifact = parsed.into_artifact(&StructuralValidator::new());
        assert_eq!(artifact.name, "Edge Finder");
        assert_eq!(artifact.description, "Finds edges");
        assert_eq!(artifact.external_packages, vec!["cv2", "numpy"]);
    }

    #[test]
    fn test_legacy_unfenced_and_unlabeled() {
        let parsed = parse_response(&format!("  {}  \n", SCRIPT)).unwrap();
        assert_eq!(parsed.code(), SCRIPT);

        let parsed = parse_response(&format!("```\n{}\n```", SCRIPT)).unwrap();
        assert_eq!(parsed.code(), SCRIPT);
    }

    #[test]
    fn test_malformed_json_falls_back_to_legacy() {
        let raw = r#"{"name": "Broken", "code": "NAME = 1"#;
        let parsed = parse_response(raw).unwrap();
        assert!(matches!(parsed, ParsedResponse::Legacy { .. }));
    }

    #[test]
    fn test_empty_response_is_a_format_error() {
        assert!(parse_response("   \n").is_err());
        assert!(parse_response("```python\n\n```").is_err());
    }
}
