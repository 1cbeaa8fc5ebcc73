use serde::{Deserialize, Serialize};
use tracing::debug;

/// One structured progress message emitted by the AI service on stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Service stage label (e.g., `extract_audio`, `transcribe`, `translate`, `srt`)
    pub stage: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ProgressEvent {
    /// Progress as an integer percentage in [0, 100]
    pub fn percent(&self) -> Option<u8> {
        self.progress
            .filter(|p| p.is_finite())
            .map(|p| p.clamp(0.0, 100.0) as u8)
    }
}

/// A decoded stdout line: either a protocol message or a plain log line
#[derive(Debug, Clone, PartialEq)]
pub enum CollaboratorOutput {
    Progress(ProgressEvent),
    Diagnostic(String),
}

impl CollaboratorOutput {
    /// Decode one stdout line. Anything that is not a JSON object with a
    /// `stage` field is a diagnostic, never a protocol error.
    pub fn from_line(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.starts_with('{') {
            match serde_json::from_str::<ProgressEvent>(trimmed) {
                Ok(event) => return CollaboratorOutput::Progress(event),
                Err(e) => debug!("Not a progress message ({}): {}", e, trimmed),
            }
        }
        CollaboratorOutput::Diagnostic(line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_line() {
        let output = CollaboratorOutput::from_line(
            r#"{"stage":"transcribe","progress":25,"message":"Transcribing..."}"#,
        );
        assert_eq!(
            output,
            CollaboratorOutput::Progress(ProgressEvent {
                stage: "transcribe".to_string(),
                progress: Some(25.0),
                message: Some("Transcribing...".to_string()),
            })
        );
    }

    #[test]
    fn test_non_protocol_lines_are_diagnostics() {
        for line in [
            "Downloading model...",
            "{not json",
            r#"{"progress": 10}"#,
            r#"["stage"]"#,
            "",
        ] {
            assert!(matches!(CollaboratorOutput::from_line(line), CollaboratorOutput::Diagnostic(_)), "{line}");
        }
    }

    #[test]
    fn test_percent_is_clamped() {
        let event = |p: f64| ProgressEvent { stage: "srt".into(), progress: Some(p), message: None };
        assert_eq!(event(42.7).percent(), Some(42));
        assert_eq!(event(180.0).percent(), Some(100));
        assert_eq!(event(-3.0).percent(), Some(0));
        assert_eq!(event(f64::NAN).percent(), None);
    }
}
