// src/progress.rs

//! Hierarchical progress model for pipeline runs.
//!
//! While a pipeline runs, stagebuild emits one [`ProgressWrapper`] document
//! per status update on the side channel. Each document is a snapshot: it is
//! decoded, rendered once, and discarded. Nesting expresses sub-tasks — a
//! stage that is itself made of steps reports a child [`Progress`] inside one
//! of its parent's units.

use serde::Deserialize;

/// One level of task completion, with an optional nested sub-task.
///
/// `total == 0` means the unit count is not known (indeterminate); such a
/// node contributes nothing to the overall fraction.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub done: u64,
    /// Progress of the sub-task currently running inside one of this node's
    /// units. The wire key is `progress`, same shape as the parent.
    #[serde(rename = "progress", default)]
    pub sub_progress: Option<Box<Progress>>,
}

impl Progress {
    /// Render this node and its children into a status string plus an
    /// overall completion fraction.
    ///
    /// The child chain renders as `"name" (done/total) -> "child" (…) -> …`.
    /// The child's fraction is added as `child_fraction / total`, weighting
    /// the child as exactly one of this node's units. That weighting (divide
    /// by `total`, not by the remaining units) is an approximation, but it is
    /// the one consumers of these percentages rely on.
    pub fn render(&self) -> (String, f64) {
        let (appendix, sub_fraction) = match &self.sub_progress {
            Some(sub) => {
                let (text, fraction) = sub.render();
                (format!(" -> {text}"), fraction)
            }
            None => (String::new(), 0.0),
        };

        let text = format!("\"{}\" ({}/{}){}", self.name, self.done, self.total, appendix);

        let mut fraction = 0.0;
        if self.total != 0 {
            fraction = self.done as f64 / self.total as f64;
            fraction += sub_fraction / self.total as f64;
        }

        (text, fraction)
    }
}

/// A single status update from the side channel: a free-text message plus a
/// progress snapshot.
///
/// Both fields are optional on the wire; a missing `progress` decodes as an
/// empty indeterminate node so message-only updates still render.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProgressWrapper {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub progress: Progress,
}

impl ProgressWrapper {
    /// Render as a one-line status string: the truncated percentage, the
    /// progress chain, and the message (one trailing newline stripped) when
    /// present.
    pub fn render(&self) -> String {
        let (mut text, fraction) = self.progress.render();

        if !self.message.is_empty() {
            let message = self.message.strip_suffix('\n').unwrap_or(&self.message);
            text.push_str(&format!(" -> \"{message}\""));
        }

        format!("{}% {}", (fraction * 100.0) as i64, text)
    }
}
