//! Queue statistics for operators and dashboards.
//!
//! Counts are always read from the store; nothing is cached, so the widget
//! and the operator API can never disagree with persisted state.

use std::sync::Arc;

use ferry_core::models::QueueStats;
use serde::{Deserialize, Serialize};

use crate::{error::Result, storage::QueueStore};

/// Read-only projection over the queue store.
#[derive(Clone)]
pub struct StatsReporter {
    store: Arc<dyn QueueStore>,
}

impl StatsReporter {
    /// Creates a reporter over `store`.
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Current pending and failed counts.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` when the store fails.
    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(self.store.stats().await?)
    }

    /// Current counts rendered as status lines.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` when the store fails.
    pub async fn status_lines(&self) -> Result<Vec<StatusLine>> {
        Ok(render_status(&self.stats().await?))
    }
}

/// Severity of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Nothing to do.
    Ok,
    /// Entries are waiting for a retry.
    Warning,
    /// Entries need operator action.
    Error,
}

/// One line of the queue status widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLine {
    /// How the line should be highlighted.
    pub severity: Severity,
    /// Human readable text.
    pub text: String,
    /// Whether the line should link to the queue view.
    pub links_to_queue: bool,
}

/// Renders counts as widget lines: one warning line for pending entries,
/// one error line for failed entries, or a single all-clear line.
pub fn render_status(stats: &QueueStats) -> Vec<StatusLine> {
    if stats.all_synced() {
        return vec![StatusLine {
            severity: Severity::Ok,
            text: "All events synced".to_string(),
            links_to_queue: false,
        }];
    }

    let mut lines = Vec::with_capacity(2);
    if stats.pending > 0 {
        lines.push(StatusLine {
            severity: Severity::Warning,
            text: format!("{} event(s) pending retry", stats.pending),
            links_to_queue: true,
        });
    }
    if stats.failed > 0 {
        lines.push(StatusLine {
            severity: Severity::Error,
            text: format!("{} event(s) failed permanently", stats.failed),
            links_to_queue: true,
        });
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_queue_renders_all_clear() {
        let lines = render_status(&QueueStats::default());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].severity, Severity::Ok);
        assert!(!lines[0].links_to_queue);
    }

    #[test]
    fn pending_and_failed_render_separate_lines() {
        let lines = render_status(&QueueStats { pending: 3, failed: 1 });
        let severities: Vec<_> = lines.iter().map(|line| line.severity).collect();

        assert_eq!(severities, vec![Severity::Warning, Severity::Error]);
        assert_eq!(lines[0].text, "3 event(s) pending retry");
        assert_eq!(lines[1].text, "1 event(s) failed permanently");
    }

    #[test]
    fn failed_only_has_no_warning() {
        let lines = render_status(&QueueStats { pending: 0, failed: 2 });
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].severity, Severity::Error);
    }
}
