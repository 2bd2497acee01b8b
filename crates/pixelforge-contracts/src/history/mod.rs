mod recorder;

pub use recorder::{HistoryEntry, HistoryRecorder, HistoryStats};
