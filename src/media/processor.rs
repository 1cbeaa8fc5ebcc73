use async_trait::async_trait;
use std::path::Path;
use std::process::Command;
use tracing::{info, debug};

use crate::config::MediaConfig;
use crate::error::{Result, DualsubError};
use crate::render::BurnStyle;
use super::{MediaProcessorTrait, MediaCommandBuilder};

/// Concrete implementation of media processor (FFmpeg-based)
pub struct MediaProcessorImpl {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl MediaProcessorImpl {
    /// Create a new media processor implementation
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.binary_path);

        Self {
            config,
            command_builder,
        }
    }
}

#[async_trait]
impl MediaProcessorTrait for MediaProcessorImpl {
    async fn mux_soft_subtitles(
        &self,
        video_path: &Path,
        subtitle_path: &Path,
        output_path: &Path,
    ) -> Result<()> {
        info!("Muxing soft subtitles from {} into {} -> {}",
              subtitle_path.display(), video_path.display(), output_path.display());

        let command = self.command_builder.mux_soft_subtitles(
            video_path,
            subtitle_path,
            output_path,
            &self.config.soft_subtitle_codec,
        );
        command.execute(self.config.timeout()).await?;

        info!("Soft subtitle mux completed successfully");
        Ok(())
    }

    async fn burn_subtitles(
        &self,
        video_path: &Path,
        subtitle_path: &Path,
        output_path: &Path,
        style: &BurnStyle,
    ) -> Result<()> {
        info!("Burning subtitles from {} into {} -> {}",
              subtitle_path.display(), video_path.display(), output_path.display());

        let command = self.command_builder.burn_subtitles(
            video_path,
            subtitle_path,
            output_path,
            style,
            &self.config.burn_options,
        );
        command.execute(self.config.timeout()).await?;

        info!("Subtitle burn-in completed successfully");
        Ok(())
    }

    /// Check if media processor is available
    fn check_availability(&self) -> Result<()> {
        let command = self.command_builder.version_check();
        let output = Command::new(&command.binary_path)
            .args(&command.args)
            .output()
            .map_err(|e| DualsubError::Launch {
                program: command.binary_path.clone(),
                source: e,
            })?;

        if output.status.success() {
            info!("Media processor is available");
            Ok(())
        } else {
            Err(DualsubError::Media("Media processor version check failed".to_string()))
        }
    }

    /// Get media processor version information
    async fn get_version_info(&self) -> Result<String> {
        debug!("Getting media processor version information");

        let command = self.command_builder.version_check();
        let output = tokio::process::Command::new(&command.binary_path)
            .args(&command.args)
            .output()
            .await
            .map_err(|e| DualsubError::Launch {
                program: command.binary_path.clone(),
                source: e,
            })?;

        if output.status.success() {
            let version_info = String::from_utf8_lossy(&output.stdout);
            // Extract the first line which typically contains the version
            let first_line = version_info.lines().next().unwrap_or("Unknown version");
            Ok(first_line.to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(DualsubError::Media(format!("Media processor version check failed: {}", stderr)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_is_reported() {
        let processor = MediaProcessorImpl::new(MediaConfig {
            binary_path: "/nonexistent/ffmpeg".to_string(),
            ..Default::default()
        });
        assert!(matches!(processor.check_availability(), Err(DualsubError::Launch { .. })));
    }
}
