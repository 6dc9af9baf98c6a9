//! Defines structures and types for progress reporting while a lexicon loads.

/// Represents a snapshot of the progress during corpus loading.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// A description of the current stage (e.g., "Parsing corpus").
    pub stage_description: String,
    /// Number of items processed in the current stage.
    pub current_item: u64,
    /// Total number of items expected in the current stage (if calculable).
    pub total_items: Option<u64>,
    /// An optional message providing more context (e.g., "4213 words, 512 roots").
    pub message: Option<String>,
}

/// Type alias for the progress callback function.
///
/// The callback receives a `ProgressUpdate` and returns `true` to continue.
/// Returning `false` aborts loading with `LensError::Internal` at the next
/// stage boundary.
pub type ProgressCallback = Box<dyn FnMut(ProgressUpdate) -> bool + Send + Sync>;

impl ProgressUpdate {
    /// Creates a new progress update for the start of a stage.
    pub fn new_stage(description: impl Into<String>, total_items: Option<u64>) -> Self {
        ProgressUpdate {
            stage_description: description.into(),
            current_item: 0,
            total_items,
            message: None,
        }
    }

    /// Creates the closing update of a stage.
    pub fn finished(description: impl Into<String>, total: u64, message: Option<String>) -> Self {
        ProgressUpdate {
            stage_description: description.into(),
            current_item: total,
            total_items: Some(total),
            message,
        }
    }
}

/// Forwards an update to the callback, if any. Returns `false` on cancellation.
pub(crate) fn report(reporter: &mut Option<ProgressCallback>, update: ProgressUpdate) -> bool {
    match reporter {
        Some(callback) => callback(update),
        None => true,
    }
}
