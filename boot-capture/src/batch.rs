//! In-memory batch list merged by classification.

use boot_types::{Classification, LogBatch};

/// Completed lines waiting for the next flush.
///
/// At most one batch per classification is open; more lines of a
/// classification that already has a batch extend it rather than starting
/// a second one. Batches keep the order in which their classification
/// first appeared.
#[derive(Debug, Default)]
pub struct BatchList {
    batches: Vec<LogBatch>,
}

impl BatchList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `lines` into the open batch for `classification`.
    pub fn merge(&mut self, classification: Classification, lines: Vec<String>) {
        if lines.is_empty() {
            return;
        }
        match self
            .batches
            .iter_mut()
            .find(|b| b.classification == classification)
        {
            Some(batch) => batch.lines.extend(lines),
            None => self.batches.push(LogBatch::new(classification, lines)),
        }
    }

    /// Take every batch, leaving the list empty.
    pub fn take(&mut self) -> Vec<LogBatch> {
        std::mem::take(&mut self.batches)
    }

    /// Whether there is nothing to flush.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}
