use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Runtime settings, loaded from a JSON file.
///
/// Every field has a default so a partial (or missing) file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub backend: BackendSettings,
  pub capabilities: CapabilitySettings,
  pub chat: ChatSettings,
  pub sessions: SessionSettings,
}

impl Settings {
  /// Load settings from a JSON file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load settings from a JSON file, falling back to defaults when the file
  /// does not exist.
  pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
    if path.exists() {
      Self::load(path)
    } else {
      Ok(Self::default())
    }
  }
}

/// Connection settings for the OpenAI-compatible model backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
  pub base_url: String,
  /// Default model for capability steps.
  pub model: String,
  /// Name of the environment variable holding the API key.
  pub api_key_env: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_secs: Option<u64>,
}

impl Default for BackendSettings {
  fn default() -> Self {
    Self {
      base_url: "https://api.openai.com/v1".to_string(),
      model: "gpt-4.1".to_string(),
      api_key_env: "OPENAI_API_KEY".to_string(),
      timeout_secs: None,
    }
  }
}

/// Settings shared by the capability variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitySettings {
  /// Directory the filesystem capability is confined to.
  pub filesystem_root: PathBuf,
  /// Tool server spawned for the lifetime of each filesystem step.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub filesystem_server: Option<ToolServerSettings>,
}

impl Default for CapabilitySettings {
  fn default() -> Self {
    Self {
      filesystem_root: PathBuf::from("agent-files"),
      filesystem_server: None,
    }
  }
}

/// A tool-serving subprocess.
///
/// Arguments are templates; `{{ root }}` expands to the filesystem root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerSettings {
  pub command: String,
  #[serde(default)]
  pub args: Vec<String>,
}

/// Settings for the plain chat (planner) path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
  /// Planner model; falls back to the backend model.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub model: Option<String>,
  /// Replaces the built-in planner instructions.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
  /// Serialize concurrent chat turns on the same session id.
  pub serialize_turns: bool,
}

impl Default for SessionSettings {
  fn default() -> Self {
    Self {
      serialize_turns: true,
    }
  }
}
