use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{Result, DualsubError};

fn default_media_url_prefix() -> String {
    "/media".to_string()
}

fn default_soft_subtitle_codec() -> String {
    "mov_text".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub collaborator: CollaboratorConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    /// Interpreter used to launch the AI service (e.g., python3)
    pub interpreter: String,
    /// Path to the transcription/translation service script
    pub script_path: PathBuf,
    /// Extra arguments appended after the generated ones
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Upper bound on a single AI stage run; unset means wait forever
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Additional encoding options for the burn pass
    /// Common options: ["-preset", "medium", "-crf", "23", "-pix_fmt", "yuv420p"]
    /// - preset: encoding speed (ultrafast, fast, medium, slow, veryslow)
    /// - crf: quality (0-51, lower = better quality, 23 is default)
    pub burn_options: Vec<String>,
    /// Subtitle codec for the soft track (mov_text for mp4 containers)
    #[serde(default = "default_soft_subtitle_codec")]
    pub soft_subtitle_codec: String,
    /// Upper bound on a single ffmpeg invocation; unset means wait forever
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per job
    pub jobs_dir: PathBuf,
    /// Prefix for artifact references handed out in job results
    #[serde(default = "default_media_url_prefix")]
    pub media_url_prefix: String,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            script_path: PathBuf::from("server/ai_service.py"),
            extra_args: Vec::new(),
            timeout_secs: None,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            burn_options: vec![
                "-preset".to_string(), "veryfast".to_string(),
                "-crf".to_string(), "20".to_string(),
            ],
            soft_subtitle_codec: default_soft_subtitle_codec(),
            timeout_secs: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            jobs_dir: PathBuf::from("jobs"),
            media_url_prefix: default_media_url_prefix(),
        }
    }
}

impl CollaboratorConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl MediaConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DualsubError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| DualsubError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DualsubError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| DualsubError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            jobs_dir = "/srv/jobs"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.jobs_dir, PathBuf::from("/srv/jobs"));
        assert_eq!(config.storage.media_url_prefix, "/media");
        assert_eq!(config.media.binary_path, "ffmpeg");
        assert_eq!(config.collaborator.interpreter, "python3");
        assert!(config.collaborator.timeout().is_none());
    }

    #[test]
    fn test_partial_section_keeps_other_fields() {
        let config: Config = toml::from_str("[media]\ntimeout_secs = 900\n").unwrap();

        assert_eq!(config.media.timeout(), Some(Duration::from_secs(900)));
        assert_eq!(config.media.soft_subtitle_codec, "mov_text");
        assert_eq!(config.media.burn_options.len(), 4);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dualsub.toml");

        let mut config = Config::default();
        config.media.timeout_secs = Some(600);
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.media.timeout(), Some(Duration::from_secs(600)));
        assert_eq!(loaded.media.burn_options, config.media.burn_options);
    }
}
