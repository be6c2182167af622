pub mod attribution;
pub mod forensics;
pub mod pnl_journal;

pub use attribution::Attribution;
pub use forensics::{FailureCategory, Forensics, ForensicInput};
pub use pnl_journal::PnlJournal;
