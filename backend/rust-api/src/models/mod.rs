pub mod exam;
pub mod practice;
pub mod question;
pub mod timer;
pub mod user;

pub use exam::{ScheduledTest, TestResult, TestStatus};
pub use practice::PracticeMode;
pub use question::Question;
pub use user::{HistoryEntry, UserProfile, UserRole};

/// Share of correct answers in percent, 0 for an empty set.
pub fn percentage(score: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (score as f64 / total as f64) * 100.0
}
