//! Writer-side and reader-side facades over the stores

pub mod history;
pub mod import;
pub mod scan;

pub use history::{HistoryEvent, HistoryManager};
pub use import::ImportManager;
pub use scan::{ExpandedHash, ExpandedSource, ScanManager, SizeReport};
