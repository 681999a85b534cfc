//! Edit preferences: the candidate's past hand corrections, replayed into the reframer
//! prompt so later drafts lean the way the candidate edits.
//!
//! The edit log is JSON Lines, one `{before, after}` record per reviewed resume, oldest
//! first. Only the most recent records are read and unparseable lines are skipped.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::pipeline::prompts::PREFERENCES_TEMPLATE;

/// Most recent edit records read from the log.
pub const MAX_EDIT_EVENTS: usize = 20;
/// Most "changed X to Y" lines rendered into the prompt.
pub const MAX_PREFERENCE_EXAMPLES: usize = 10;
/// Longest snippet quoted from either side of an edit.
pub const MAX_SNIPPET_WORDS: usize = 50;

#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("failed to read edit log at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditedSection {
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub bullets: Vec<String>,
}

/// The reviewable text of a resume on one side of an edit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditedContent {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub sections: Vec<EditedSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanEdit {
    pub before: EditedContent,
    pub after: EditedContent,
}

/// Rendered preference lines, ready for the reframer prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditPreferences {
    pub lines: Vec<String>,
}

impl EditPreferences {
    pub fn from_edits(edits: &[HumanEdit]) -> Self {
        Self {
            lines: preference_lines(edits, MAX_PREFERENCE_EXAMPLES),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The prompt block, or an empty string when there is nothing to say.
    pub fn render(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        PREFERENCES_TEMPLATE.replace("{preferences}", &self.lines.join("\n"))
    }
}

fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        words.join(" ")
    } else {
        format!("{} ...", words[..max_words].join(" "))
    }
}

/// Parses JSON Lines edit records, keeping the last `max_events`.
pub fn parse_edit_log(raw: &str, max_events: usize) -> Vec<HumanEdit> {
    let mut edits: Vec<HumanEdit> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(edit) => Some(edit),
            Err(e) => {
                debug!("Skipping unreadable edit record: {e}");
                None
            }
        })
        .collect();
    let skip = edits.len().saturating_sub(max_events);
    edits.drain(..skip);
    edits
}

/// Reads the edit log. A missing file means no edits yet.
pub async fn load_recent_edits(path: &Path, max_events: usize) -> Result<Vec<HumanEdit>, PreferencesError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(PreferencesError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    let edits = parse_edit_log(&raw, max_events);
    info!("Loaded {} edit records from {}", edits.len(), path.display());
    Ok(edits)
}

/// "User changed ... to ..." lines for summaries and bullets that differ, compared
/// section by section and bullet by bullet.
pub fn preference_lines(edits: &[HumanEdit], max_examples: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for edit in edits {
        let (before, after) = (edit.before.summary.trim(), edit.after.summary.trim());
        if !before.is_empty() && !after.is_empty() && before != after {
            lines.push(format!(
                "User changed summary: \"{}\" to \"{}\"",
                truncate_words(before, MAX_SNIPPET_WORDS),
                truncate_words(after, MAX_SNIPPET_WORDS)
            ));
        }

        for (i, (sb, sa)) in edit.before.sections.iter().zip(&edit.after.sections).enumerate() {
            let company = [sb.company.trim(), sa.company.trim()]
                .into_iter()
                .find(|c| !c.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Role {}", i + 1));
            for (bb, ba) in sb.bullets.iter().zip(&sa.bullets) {
                let (bb, ba) = (bb.trim(), ba.trim());
                if !bb.is_empty() && !ba.is_empty() && bb != ba {
                    lines.push(format!(
                        "User changed bullet ({company}): \"{}\" to \"{}\"",
                        truncate_words(bb, MAX_SNIPPET_WORDS),
                        truncate_words(ba, MAX_SNIPPET_WORDS)
                    ));
                }
            }
        }
        if lines.len() >= max_examples {
            break;
        }
    }
    lines.truncate(max_examples);
    lines
}
