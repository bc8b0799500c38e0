pub mod prompt;
pub mod summary;

pub use prompt::ConfirmPrompt;
pub use summary::{print_check, print_report};
