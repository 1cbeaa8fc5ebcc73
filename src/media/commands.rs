use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, DualsubError};
use crate::render::BurnStyle;

/// Number of trailing stderr lines kept as a failure diagnostic
const DIAGNOSTIC_TAIL_LINES: usize = 40;

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Select a stream for the output
    pub fn map<S: Into<String>>(self, specifier: S) -> Self {
        self.arg("-map").arg(specifier)
    }

    /// Set video codec
    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Set subtitle codec
    pub fn subtitle_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:s").arg(codec)
    }

    /// Copy video stream
    pub fn copy_video(self) -> Self {
        self.video_codec("copy")
    }

    /// Copy audio stream
    pub fn copy_audio(self) -> Self {
        self.audio_codec("copy")
    }

    /// Add video filter
    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Execute the command, failing with the stderr tail on non-zero exit
    pub async fn execute(&self, timeout: Option<Duration>) -> Result<()> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let mut cmd = Command::new(&self.binary_path);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| DualsubError::Launch {
            program: self.binary_path.clone(),
            source: e,
        })?;

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| DualsubError::Timeout {
                    stage: self.description.clone(),
                    seconds: limit.as_secs(),
                })??,
            None => child.wait_with_output().await?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DualsubError::CollaboratorFailed {
                stage: self.description.clone(),
                diagnostic: format!("{} failed: {}", self.description, tail_lines(&stderr, DIAGNOSTIC_TAIL_LINES)),
            });
        }

        Ok(())
    }
}

/// Last `count` lines of `text`
pub fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}

/// Escape `value` as a filter option value, then quote it for the filter graph.
///
/// The graph parser strips one layer of quoting before the filter splits its
/// options on `:`, so the option-level escapes (`\\`, `\:`, `\'`) have to sit
/// inside graph-level single quotes, where a quote is written as `'\''`.
pub fn quote_filter_value(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');

    for c in value.chars() {
        match c {
            '\\' | ':' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\'' => quoted.push_str(r"\'\''"),
            _ => quoted.push(c),
        }
    }

    quoted.push('\'');
    quoted
}

/// Quote a subtitle path for the `subtitles` filter.
///
/// Backslash separators become `/` before quoting.
pub fn escape_filter_path<P: AsRef<Path>>(path: P) -> String {
    let normalized = path.as_ref().to_string_lossy().replace('\\', "/");
    quote_filter_value(&normalized)
}

/// Builder for the render operations
pub struct MediaCommandBuilder {
    binary_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Build the soft-subtitle mux: original streams copied, subtitle file added as a track
    pub fn mux_soft_subtitles<P: AsRef<Path>>(
        &self,
        video_path: P,
        subtitle_path: P,
        output_path: P,
        subtitle_codec: &str,
    ) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Soft subtitle mux")
            .overwrite()
            .input(&video_path)
            .input(&subtitle_path)
            .map("0:v")
            .map("0:a?")
            .map("1:0")
            .copy_video()
            .copy_audio()
            .subtitle_codec(subtitle_codec)
            .output(output_path)
    }

    /// Build the hard-burn encode
    pub fn burn_subtitles<P: AsRef<Path>>(
        &self,
        video_path: P,
        subtitle_path: P,
        output_path: P,
        style: &BurnStyle,
        additional_options: &[String],
    ) -> MediaCommand {
        let filter = format!(
            "subtitles={}:force_style={}",
            escape_filter_path(&subtitle_path),
            quote_filter_value(&style.force_style())
        );

        MediaCommand::new(&self.binary_path, "Subtitle burn-in")
            .overwrite()
            .input(&video_path)
            .video_filter(filter)
            .video_codec("libx264")
            .args(additional_options.iter().cloned())
            .copy_audio()
            .output(output_path)
    }

    /// Build version check command
    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Version check")
            .arg("-version")
    }
}
