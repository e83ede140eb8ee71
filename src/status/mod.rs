mod arbiter;
mod channel;
mod heuristics;
mod question;
mod watcher;

pub use arbiter::{QuestionTicket, StatusState};
pub use channel::{status_dir_for, status_file_path, HookEvent, HookState};
pub use heuristics::{OutputSignals, StatusClassifier};
pub use question::extract_question;
pub use watcher::HookWatcher;
