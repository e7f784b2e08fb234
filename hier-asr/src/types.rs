//! Core types for hier-asr

use serde::Serialize;
use std::fmt;

/// Decoding task of the hierarchical model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// Word-level output
    Main,
    /// Character-level output
    Sub,
}

impl Task {
    pub const ALL: [Task; 2] = [Task::Main, Task::Sub];
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Main => f.write_str("main"),
            Task::Sub => f.write_str("sub"),
        }
    }
}

/// One value per task.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TaskPair<T> {
    pub main: T,
    pub sub: T,
}

impl<T> TaskPair<T> {
    pub fn new(main: T, sub: T) -> Self {
        Self { main, sub }
    }

    pub fn get(&self, task: Task) -> &T {
        match task {
            Task::Main => &self.main,
            Task::Sub => &self.sub,
        }
    }

    pub fn get_mut(&mut self, task: Task) -> &mut T {
        match task {
            Task::Main => &mut self.main,
            Task::Sub => &mut self.sub,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(Task, T) -> U) -> TaskPair<U> {
        TaskPair {
            main: f(Task::Main, self.main),
            sub: f(Task::Sub, self.sub),
        }
    }
}
