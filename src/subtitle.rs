use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{Result, DualsubError};

const TIME_SEPARATOR: &str = "-->";

/// One subtitle entry: a time interval plus primary and secondary language text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cue {
    /// Start timestamp in `HH:MM:SS,mmm`
    pub start: String,
    /// End timestamp in `HH:MM:SS,mmm`
    pub end: String,
    pub primary: String,
    /// May be empty
    #[serde(default)]
    pub secondary: String,
}

impl Cue {
    pub fn new(
        start: impl Into<String>,
        end: impl Into<String>,
        primary: impl Into<String>,
        secondary: impl Into<String>,
    ) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            primary: primary.into(),
            secondary: secondary.into(),
        }
    }
}

/// Which languages survive into the subtitle file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputLanguages {
    #[default]
    Bilingual,
    PrimaryOnly,
    SecondaryOnly,
}

impl OutputLanguages {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputLanguages::Bilingual => "bilingual",
            OutputLanguages::PrimaryOnly => "primary-only",
            OutputLanguages::SecondaryOnly => "secondary-only",
        }
    }
}

impl fmt::Display for OutputLanguages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputLanguages {
    type Err = DualsubError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bilingual" | "both" => Ok(OutputLanguages::Bilingual),
            "primary-only" | "primary" => Ok(OutputLanguages::PrimaryOnly),
            "secondary-only" | "secondary" => Ok(OutputLanguages::SecondaryOnly),
            other => Err(DualsubError::Config(format!("Unknown output language selection: {}", other))),
        }
    }
}

/// Parse the bilingual subtitle format.
///
/// A block is an index line, a `start --> end` line, then a primary and a
/// secondary text line. The two text slots are positional, so an empty primary
/// followed by a secondary line is read back as such. A block with fewer text
/// lines ends where the next index and time range begin. Malformed blocks are
/// dropped and parsing continues with the next block.
pub fn parse(text: &str) -> Vec<Cue> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = normalized.split('\n').collect();
    let is_blank = |i: usize| lines.get(i).is_none_or(|l| l.trim().is_empty());

    let mut cues = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if is_blank(i) {
            i += 1;
            continue;
        }

        // Fewer than two lines, or no time range on the second line
        let time_line = if is_blank(i + 1) { None } else { Some(lines[i + 1]) };
        let range = time_line.and_then(|line| line.split_once(TIME_SEPARATOR));
        let Some((start, end)) = range else {
            debug!("Skipping malformed subtitle block at line {}", i + 1);
            while i < lines.len() && !is_blank(i) {
                i += 1;
            }
            continue;
        };

        // Up to two text slots; a slot may be blank, but never the start of the next block
        let mut next = i + 2;
        let mut slots = [""; 2];
        for slot in slots.iter_mut() {
            if next >= lines.len() || starts_block(&lines, next) {
                break;
            }
            *slot = lines[next];
            next += 1;
        }

        let [primary, secondary] = slots;
        cues.push(Cue::new(start.trim(), end.trim(), primary, secondary));
        i = next;
    }

    cues
}

/// An index line directly followed by a time range line
fn starts_block(lines: &[&str], at: usize) -> bool {
    let is_index = lines.get(at).is_some_and(|line| {
        let line = line.trim();
        !line.is_empty() && line.chars().all(|c| c.is_ascii_digit())
    });
    is_index && lines.get(at + 1).is_some_and(|line| line.contains(TIME_SEPARATOR))
}

/// Serialize cues into 4-line blocks separated by one blank line.
///
/// Index labels are renumbered from 1 and the secondary line is always
/// written, even when empty.
pub fn serialize(cues: &[Cue]) -> String {
    cues.iter()
        .enumerate()
        .map(|(index, cue)| {
            format!(
                "{}\n{} {} {}\n{}\n{}\n",
                index + 1,
                cue.start,
                TIME_SEPARATOR,
                cue.end,
                single_line(&cue.primary),
                single_line(&cue.secondary),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Blank (never remove) the text of the language that was not selected.
pub fn apply_output_languages(cues: &mut [Cue], selection: OutputLanguages) {
    match selection {
        OutputLanguages::Bilingual => {}
        OutputLanguages::PrimaryOnly => cues.iter_mut().for_each(|cue| cue.secondary.clear()),
        OutputLanguages::SecondaryOnly => cues.iter_mut().for_each(|cue| cue.primary.clear()),
    }
}

/// Take the secondary text from `translated` while keeping timestamps and
/// primary text of `original` exactly. Cues are matched by position.
pub fn merge_secondary(original: &[Cue], translated: &[Cue]) -> Vec<Cue> {
    if original.len() != translated.len() {
        warn!(
            "Retranslation returned {} cues for {} originals; unmatched cues keep their text",
            translated.len(),
            original.len()
        );
    }

    original
        .iter()
        .enumerate()
        .map(|(index, cue)| {
            let mut merged = cue.clone();
            if let Some(translation) = translated.get(index) {
                merged.secondary = translation.secondary.clone();
            }
            merged
        })
        .collect()
}

/// Index of the first cue that starts before its predecessor, if any.
///
/// Fixed-width `HH:MM:SS,mmm` timestamps order correctly as strings.
pub fn first_out_of_order(cues: &[Cue]) -> Option<usize> {
    cues.windows(2)
        .position(|pair| pair[1].start < pair[0].start)
        .map(|index| index + 1)
}

/// Read and parse a subtitle file
pub async fn read_cues<P: AsRef<Path>>(path: P) -> Result<Vec<Cue>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).await?;
    let cues = parse(&content);
    debug!("Parsed {} cues from {}", cues.len(), path.display());
    Ok(cues)
}

/// Serialize cues and replace the file at `path` in one rename, so a reader
/// never sees a half-written file.
pub async fn write_cues<P: AsRef<Path>>(path: P, cues: &[Cue]) -> Result<()> {
    let path = path.as_ref().to_path_buf();
    let content = serialize(cues);

    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| DualsubError::Config(format!("Invalid subtitle path: {}", path.display())))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&path).map_err(|e| DualsubError::Io(e.error))?;
        info!("Subtitle file written: {}", path.display());
        Ok(())
    })
    .await
    .map_err(|e| DualsubError::Io(std::io::Error::other(e)))?
}
