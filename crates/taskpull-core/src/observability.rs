use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::TaskStatus;

/// Number of tasks per store status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub running: u64,
    pub done: u64,
    pub error: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: TaskStatus, n: u64) {
        match status {
            TaskStatus::Pending => self.pending += n,
            TaskStatus::Running => self.running += n,
            TaskStatus::Done => self.done += n,
            TaskStatus::Error => self.error += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.running + self.done + self.error
    }

    /// Tasks not yet completed or errored.
    pub fn remaining(&self) -> u64 {
        self.pending + self.running
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pending={} running={} done={} error={} total={}",
            self.pending,
            self.running,
            self.done,
            self.error,
            self.total()
        )
    }
}
