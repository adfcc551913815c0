//! LLM endpoint configuration
//!
//! Stores endpoint profiles in ~/.config/toolbox/llm_config.json. The store is
//! an explicit value: load it once at startup and pass it to whatever needs it.

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable that overrides the stored API key of the current profile.
pub const API_KEY_ENV: &str = "TOOLBOX_API_KEY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmProfile {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
}

impl LlmProfile {
    /// API key to send: the environment override, else the stored key.
    pub fn resolved_api_key(&self) -> String {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => self.api_key.clone(),
        }
    }

    /// Stored key with everything but the last four characters hidden.
    pub fn masked_api_key(&self) -> String {
        let count = self.api_key.chars().count();
        if count == 0 {
            return "(none)".to_string();
        }
        let visible: String = self.api_key.chars().skip(count.saturating_sub(4)).collect();
        format!("{}{}", "*".repeat(count.saturating_sub(4).min(8)), visible)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LlmFile {
    #[serde(default)]
    llms: Vec<LlmProfile>,
    #[serde(default)]
    current_llm_id: Option<String>,
}

fn default_profiles() -> Vec<LlmProfile> {
    vec![
        LlmProfile {
            id: "openai-gpt4o".to_string(),
            name: "OpenAI GPT-4o".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o".to_string(),
            api_key: String::new(),
        },
        LlmProfile {
            id: "ollama-local".to_string(),
            name: "Ollama (Local)".to_string(),
            endpoint: "http://localhost:11434/v1/chat/completions".to_string(),
            model: "llama3".to_string(),
            api_key: String::new(),
        },
    ]
}

/// The set of configured LLM profiles and which one is in use.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    path: Option<PathBuf>,
    file: LlmFile,
}

impl LlmSettings {
    /// Get the config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("toolbox").join("llm_config.json"))
    }

    /// Load from the default location, or fall back to the built-in profiles.
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(path),
            None => Self {
                path: None,
                file: Self::defaults(),
            },
        }
    }

    /// Load from `path`. A corrupt file is set aside and defaults are used.
    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut file = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<LlmFile>(&content) {
                Ok(file) => file,
                Err(err) => {
                    preserve_corrupt_config(&path, &content);
                    warn!(path = %path.display(), error = %err, "LLM config was corrupted; a backup was saved and defaults were loaded");
                    Self::defaults()
                }
            },
            Err(_) => Self::defaults(),
        };
        if file.llms.is_empty() {
            file = Self::defaults();
        }
        Self {
            path: Some(path),
            file,
        }
    }

    fn defaults() -> LlmFile {
        let llms = default_profiles();
        let current_llm_id = llms.first().map(|p| p.id.clone());
        LlmFile {
            llms,
            current_llm_id,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn all(&self) -> &[LlmProfile] {
        &self.file.llms
    }

    pub fn get(&self, id: &str) -> Option<&LlmProfile> {
        self.file.llms.iter().find(|p| p.id == id)
    }

    /// The selected profile, or the first one when the selection is stale.
    pub fn current(&self) -> Option<&LlmProfile> {
        self.file
            .current_llm_id
            .as_deref()
            .and_then(|id| self.get(id))
            .or_else(|| self.file.llms.first())
    }

    pub fn is_current(&self, id: &str) -> bool {
        self.current().map(|p| p.id == id).unwrap_or(false)
    }

    /// Add a profile (not selected) and save. Returns the new profile's id.
    pub fn add(
        &mut self,
        name: &str,
        endpoint: &str,
        model: &str,
        api_key: &str,
    ) -> anyhow::Result<String> {
        let base_id = name.trim().to_lowercase().replace([' ', '/'], "-");
        let base_id = if base_id.is_empty() {
            "llm".to_string()
        } else {
            base_id
        };
        let mut id = base_id.clone();
        let mut counter = 1;
        while self.get(&id).is_some() {
            id = format!("{}-{}", base_id, counter);
            counter += 1;
        }

        self.file.llms.push(LlmProfile {
            id: id.clone(),
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        });
        self.save()?;
        Ok(id)
    }

    pub fn update(
        &mut self,
        id: &str,
        name: &str,
        endpoint: &str,
        model: &str,
        api_key: &str,
    ) -> anyhow::Result<()> {
        let profile = self
            .file
            .llms
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| anyhow!("No LLM profile with id '{}'", id))?;
        profile.name = name.to_string();
        profile.endpoint = endpoint.to_string();
        profile.model = model.to_string();
        profile.api_key = api_key.to_string();
        self.save()
    }

    /// Remove a profile. The last remaining profile cannot be removed.
    pub fn delete(&mut self, id: &str) -> anyhow::Result<()> {
        if self.get(id).is_none() {
            bail!("No LLM profile with id '{}'", id);
        }
        if self.file.llms.len() <= 1 {
            bail!("Cannot delete the last LLM profile");
        }
        let was_current = self.is_current(id);
        self.file.llms.retain(|p| p.id != id);
        if was_current {
            self.file.current_llm_id = self.file.llms.first().map(|p| p.id.clone());
        }
        self.save()
    }

    pub fn set_current(&mut self, id: &str) -> anyhow::Result<()> {
        if self.get(id).is_none() {
            bail!("No LLM profile with id '{}'", id);
        }
        self.file.current_llm_id = Some(id.to_string());
        self.save()
    }

    /// Save to disk. A settings value without a path (no config dir) is kept in memory only.
    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }

        let mut file = self.file.clone();
        if file.current_llm_id.is_none() {
            file.current_llm_id = file.llms.first().map(|p| p.id.clone());
        }
        let content =
            serde_json::to_string_pretty(&file).context("Failed to serialize LLM config")?;
        write_config_atomic(path, &content)
            .with_context(|| format!("Failed to write config {}", path.display()))
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = LlmSettings::load_from(dir.path().join("llm_config.json"));
        assert_eq!(settings.all().len(), 2);
        assert_eq!(settings.current().unwrap().id, "openai-gpt4o");
    }

    #[test]
    fn test_add_generates_unique_ids_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("llm_config.json");
        let mut settings = LlmSettings::load_from(&path);

        let first = settings
            .add("My Server/v1", "http://x/v1/chat/completions", "m", "k")
            .unwrap();
        let second = settings
            .add("My Server/v1", "http://y/v1/chat/completions", "m", "")
            .unwrap();
        assert_eq!(first, "my-server-v1");
        assert_eq!(second, "my-server-v1-1");

        let reloaded = LlmSettings::load_from(&path);
        assert_eq!(reloaded.all().len(), 4);
        assert_eq!(reloaded.get("my-server-v1").unwrap().api_key, "k");
        assert_eq!(reloaded.current().unwrap().id, "openai-gpt4o");
    }

    #[test]
    fn test_set_current_and_delete_current() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("llm_config.json");
        let mut settings = LlmSettings::load_from(&path);

        settings.set_current("ollama-local").unwrap();
        assert_eq!(LlmSettings::load_from(&path).current().unwrap().id, "ollama-local");

        settings.delete("ollama-local").unwrap();
        assert_eq!(settings.current().unwrap().id, "openai-gpt4o");
        assert!(settings.delete("openai-gpt4o").is_err());
        assert!(settings.set_current("missing").is_err());
    }

    #[test]
    fn test_update_profile() {
        let dir = tempdir().unwrap();
        let mut settings = LlmSettings::load_from(dir.path().join("c.json"));
        settings
            .update("ollama-local", "Ollama", "http://h/v1", "qwen", "")
            .unwrap();
        assert_eq!(settings.get("ollama-local").unwrap().model, "qwen");
        assert!(settings.update("nope", "", "", "", "").is_err());
    }

    #[test]
    fn test_corrupt_file_is_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("llm_config.json");
        fs::write(&path, "{not json").unwrap();

        let settings = LlmSettings::load_from(&path);
        assert_eq!(settings.all().len(), 2);
        assert!(dir.path().join("llm_config.json.corrupt").exists());
    }

    #[test]
    fn test_masked_api_key() {
        let mut profile = default_profiles().remove(0);
        assert_eq!(profile.masked_api_key(), "(none)");
        profile.api_key = "sk-abcdef1234".to_string();
        assert_eq!(profile.masked_api_key(), "********1234");
    }
}
