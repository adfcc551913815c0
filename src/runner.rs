//! Running library scripts against input files.

use crate::library::{ParameterKind, Script};
use anyhow::{anyhow, Context};
use chrono::Local;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{mpsc, OnceLock};
use std::thread;
use tracing::debug;

/// Directory a script writes its outputs to: `~/Downloads/<name>`.
pub fn output_dir_for(script: &Script) -> PathBuf {
    let base = dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("Downloads"));
    base.join(script.name.to_lowercase().replace(' ', "_"))
}

/// Merge `--param name=value` overrides into the script's declared defaults.
///
/// Unknown parameter names and values that do not parse as the declared kind
/// are rejected.
pub fn resolve_params(
    script: &Script,
    overrides: &[(String, String)],
) -> anyhow::Result<Vec<(String, Value)>> {
    let mut given: HashMap<&str, &str> = HashMap::new();
    for (name, value) in overrides {
        if script.parameter(name).is_none() {
            return Err(anyhow!(
                "'{}' has no parameter named '{}'",
                script.name,
                name
            ));
        }
        given.insert(name.as_str(), value.as_str());
    }

    script
        .parameters
        .iter()
        .map(|param| {
            let value = match given.get(param.name.as_str()) {
                Some(raw) => param
                    .kind
                    .parse_value(raw)
                    .with_context(|| format!("Invalid value for --{}", param.name))?,
                None => param.default.clone(),
            };
            Ok((param.name.clone(), value))
        })
        .collect()
}

/// Argument vector for running `script` on `files`.
///
/// Scripts that take one file get the first file plus an output path in
/// `output_dir`; multi-file scripts get every file.
pub fn build_command(
    interpreter: &str,
    script: &Script,
    files: &[PathBuf],
    params: &[(String, Value)],
    output_dir: &Path,
) -> Vec<String> {
    let mut argv = vec![
        interpreter.to_string(),
        script.path.to_string_lossy().to_string(),
    ];

    if script.accepts_multiple_files {
        argv.extend(files.iter().map(|f| f.to_string_lossy().to_string()));
    } else if let Some(first) = files.first() {
        argv.push(first.to_string_lossy().to_string());
        let output = output_dir.join(format!("{}.jpg", Local::now().format("%Y%m%d_%H%M%S")));
        argv.push(output.to_string_lossy().to_string());
    }

    for (name, value) in params {
        let is_bool = script
            .parameter(name)
            .map(|p| p.kind == ParameterKind::Bool)
            .unwrap_or(matches!(value, Value::Bool(_)));
        if is_bool {
            if value.as_bool().unwrap_or(false) {
                argv.push(format!("--{}", name));
            }
            continue;
        }
        match value {
            Value::Null => {}
            Value::String(s) => {
                argv.push(format!("--{}", name));
                argv.push(s.clone());
            }
            other => {
                argv.push(format!("--{}", name));
                argv.push(other.to_string());
            }
        }
    }

    argv
}

/// Spawn `argv`, forwarding each output line (indented two spaces) to
/// `on_line` as it arrives. Returns the exit code, `-1` when killed by a signal.
pub fn run_streaming(argv: &[String], mut on_line: impl FnMut(&str)) -> anyhow::Result<i32> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("Empty command"))?;

    debug!(?argv, "running script");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to start {}", program))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("Failed to capture stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("Failed to capture stderr"))?;

    let (tx, rx) = mpsc::channel::<String>();
    let readers = [forward_lines(stdout, tx.clone()), forward_lines(stderr, tx)];

    for line in rx {
        on_line(&format!("  {}", line));
    }
    for reader in readers {
        let _ = reader.join();
    }

    let status = child.wait().context("Failed to wait for script")?;
    Ok(status.code().unwrap_or(-1))
}

fn forward_lines<R: Read + Send + 'static>(
    stream: R,
    tx: mpsc::Sender<String>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    // Output need not be UTF-8; the pipe must keep draining.
                    let line = String::from_utf8_lossy(&buf);
                    let _ = tx.send(line.trim_end_matches(['\r', '\n']).to_string());
                }
            }
        }
    })
}

fn missing_module_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"ModuleNotFoundError: No module named ['"]([\w.]+)['"]"#).ok())
        .as_ref()
}

/// Top-level module named in a `ModuleNotFoundError` line.
pub fn missing_module(line: &str) -> Option<String> {
    let caps = missing_module_pattern()?.captures(line)?;
    let name = caps.get(1)?.as_str();
    name.split('.').next().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::ScriptParameter;
    use serde_json::json;

    fn script(multi: bool) -> Script {
        Script {
            name: "Film Grain".to_string(),
            filename: "film_grain".to_string(),
            path: PathBuf::from("/lib/film_grain.py"),
            description: String::new(),
            input_types: String::new(),
            parameters: vec![
                ScriptParameter {
                    name: "strength".to_string(),
                    kind: ParameterKind::Float,
                    default: json!(0.5),
                    description: String::new(),
                },
                ScriptParameter {
                    name: "mono".to_string(),
                    kind: ParameterKind::Bool,
                    default: json!(false),
                    description: String::new(),
                },
                ScriptParameter {
                    name: "suffix".to_string(),
                    kind: ParameterKind::Str,
                    default: json!("_grain"),
                    description: String::new(),
                },
            ],
            accepts_multiple_files: multi,
        }
    }

    #[test]
    fn test_resolve_params_applies_overrides() {
        let s = script(true);
        let params = resolve_params(&s, &[("mono".into(), "true".into())]).unwrap();
        assert_eq!(
            params,
            vec![
                ("strength".to_string(), json!(0.5)),
                ("mono".to_string(), json!(true)),
                ("suffix".to_string(), json!("_grain")),
            ]
        );
        assert!(resolve_params(&s, &[("nope".into(), "1".into())]).is_err());
        assert!(resolve_params(&s, &[("strength".into(), "lots".into())]).is_err());
    }

    #[test]
    fn test_build_command_multi_file() {
        let s = script(true);
        let params = resolve_params(&s, &[]).unwrap();
        let files = vec![PathBuf::from("a.png"), PathBuf::from("b.png")];
        let argv = build_command("python3", &s, &files, &params, Path::new("/out"));
        assert_eq!(
            argv,
            vec![
                "python3",
                "/lib/film_grain.py",
                "a.png",
                "b.png",
                "--strength",
                "0.5",
                "--suffix",
                "_grain"
            ]
        );
    }

    #[test]
    fn test_build_command_single_file_adds_output_path() {
        let s = script(false);
        let params = resolve_params(&s, &[("mono".into(), "yes".into())]).unwrap();
        let files = vec![PathBuf::from("a.png"), PathBuf::from("b.png")];
        let argv = build_command("python3", &s, &files, &params, Path::new("/out"));
        assert_eq!(argv[2], "a.png");
        assert!(argv[3].starts_with("/out/") && argv[3].ends_with(".jpg"));
        assert!(argv.contains(&"--mono".to_string()));
        assert!(!argv.contains(&"b.png".to_string()));
    }

    #[test]
    fn test_output_dir_uses_lowercase_name() {
        let dir = output_dir_for(&script(true));
        assert!(dir.ends_with("film_grain"));
    }

    #[test]
    fn test_missing_module() {
        assert_eq!(
            missing_module("ModuleNotFoundError: No module named 'cv2'"),
            Some("cv2".to_string())
        );
        assert_eq!(
            missing_module("  ModuleNotFoundError: No module named 'google.cloud'"),
            Some("google".to_string())
        );
        assert_eq!(missing_module("ImportError: cannot import name 'x'"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_streaming_forwards_output_and_exit_code() {
        let argv: Vec<String> = ["sh", "-c", "echo out; echo err 1>&2; exit 3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut lines = Vec::new();
        let code = run_streaming(&argv, |line| lines.push(line.to_string())).unwrap();
        assert_eq!(code, 3);
        lines.sort();
        assert_eq!(lines, vec!["  err", "  out"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_streaming_survives_invalid_utf8() {
        let argv: Vec<String> = [
            "sh",
            "-c",
            "printf 'ok\\n\\377\\n'; head -c 300000 /dev/zero | tr '\\0' a; echo; echo after",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let mut lines = Vec::new();
        let code = run_streaming(&argv, |line| lines.push(line.to_string())).unwrap();
        assert_eq!(code, 0);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "  ok");
        assert_eq!(lines[1], "  \u{FFFD}");
        assert_eq!(lines[2].len(), 2 + 300_000);
        assert_eq!(lines[3], "  after");
    }

    #[test]
    fn test_run_streaming_rejects_empty_command() {
        assert!(run_streaming(&[], |_| {}).is_err());
    }
}
