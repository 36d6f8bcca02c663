//! Bounded audit trail of commits.

mod history;

pub use history::{History, HistoryEntry};
