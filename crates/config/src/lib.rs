use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── Diary behaviour ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiaryConfig {
    /// Keep empty moment slots in place so each entry always has exactly
    /// three positions. Set to `false` to reproduce the legacy behaviour
    /// that compacted entries by dropping empty slots.
    pub preserve_slot_positions: bool,
}

impl Default for DiaryConfig {
    fn default() -> Self {
        Self {
            preserve_slot_positions: true,
        }
    }
}

// ── Storage backend ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `"local"` (single JSON snapshot on disk) or `"remote"` (per-user
    /// document store over REST).
    pub backend: String,
    /// Directory holding the local snapshot files.
    pub local_dir: String,
    /// Base URL of the remote document store API.
    pub remote_base_url: String,
    /// Project the remote document paths are scoped under.
    pub project_id: String,
    /// How often the remote snapshot subscription polls, in seconds.
    pub poll_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "local".to_string(),
            local_dir: ".haru".to_string(),
            remote_base_url: "https://firestore.googleapis.com/v1".to_string(),
            project_id: String::new(),
            poll_interval_secs: 30,
        }
    }
}

// ── Feedback gateway ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Generative-language model used for feedback and analysis.
    pub model: String,
    /// API key for the generation endpoint. The `GEMINI_API_KEY` environment
    /// variable takes precedence over the config file.
    pub api_key: String,
    pub base_url: String,
    pub temperature: f32,
    /// Output budget for per-day feedback (a sentence or two).
    pub feedback_max_tokens: u32,
    /// Output budget for the cross-entry happiness analysis.
    pub analysis_max_tokens: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            temperature: 0.8,
            feedback_max_tokens: 100,
            analysis_max_tokens: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub diary: DiaryConfig,
    pub storage: StorageConfig,
    pub gateway: GatewayConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        // API key env override (takes precedence over config file).
        if let Ok(key) = env::var("GEMINI_API_KEY") {
            if !key.is_empty() {
                config.gateway.api_key = key;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn uses_remote_backend(&self) -> bool {
        self.storage.backend.eq_ignore_ascii_case("remote")
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // ── Behavioural defaults ────────────────────────────────────────────────
    // preserve_slot_positions guards positional round-trips through the edit
    // form; changing it should be a deliberate decision.

    #[test]
    fn slot_positions_preserved_by_default() {
        let cfg = AppConfig::default();
        assert!(cfg.diary.preserve_slot_positions);
    }

    #[test]
    fn cosmetic_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.storage.backend, "local");
        assert_eq!(cfg.storage.local_dir, ".haru");
        assert_eq!(cfg.storage.poll_interval_secs, 30);
        assert_eq!(cfg.gateway.model, "gemini-1.5-flash");
        assert!((cfg.gateway.temperature - 0.8).abs() < f32::EPSILON);
        assert_eq!(cfg.gateway.feedback_max_tokens, 100);
        assert_eq!(cfg.gateway.analysis_max_tokens, 300);
        assert_eq!(cfg.telemetry.log_level, "info");
        assert!(!cfg.uses_remote_backend());
    }

    // ── load_from ──────────────────────────────────────────────────────────

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg.storage.backend, "local");
    }

    #[test]
    fn load_from_partial_toml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(
            &path,
            r#"
[storage]
backend = "remote"
project_id = "haru-prod"
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert!(cfg.uses_remote_backend());
        assert_eq!(cfg.storage.project_id, "haru-prod");
        // Unspecified sections keep defaults.
        assert_eq!(cfg.gateway.model, "gemini-1.5-flash");
        assert!(cfg.diary.preserve_slot_positions);
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    // ── save_to + roundtrip ────────────────────────────────────────────────

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/config.toml");

        let mut cfg = AppConfig::default();
        cfg.diary.preserve_slot_positions = false;
        cfg.storage.backend = "remote".to_string();
        cfg.gateway.model = "gemini-1.5-pro".to_string();
        cfg.gateway.analysis_max_tokens = 512;

        cfg.save_to(&path).unwrap();
        assert!(path.exists());

        let loaded = AppConfig::load_from(&path).unwrap();
        assert!(!loaded.diary.preserve_slot_positions);
        assert_eq!(loaded.storage.backend, "remote");
        assert_eq!(loaded.gateway.model, "gemini-1.5-pro");
        assert_eq!(loaded.gateway.analysis_max_tokens, 512);
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c/config.toml");
        let cfg = AppConfig::default();
        cfg.save_to(&path).unwrap();
        assert!(path.exists());
    }

    // ── backend matching ────────────────────────────────────────────────────

    #[test]
    fn backend_match_is_case_insensitive() {
        let mut cfg = AppConfig::default();
        cfg.storage.backend = "Remote".to_string();
        assert!(cfg.uses_remote_backend());
    }

    // ── Env var overrides ──────────────────────────────────────────────────

    #[test]
    fn env_gemini_api_key_overrides_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key.toml");
        fs::write(
            &path,
            r#"
[gateway]
api_key = "from-file"
"#,
        )
        .unwrap();

        // SAFETY: test is single-threaded for this env var.
        unsafe { env::set_var("GEMINI_API_KEY", "from-env") };
        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.gateway.api_key, "from-env");
        unsafe { env::remove_var("GEMINI_API_KEY") };
    }
}
