//! Detail navigation over the last successful description
//!
//! The navigator owns the current [`DetailSet`]. A completed capture
//! replaces it wholesale; the navigation commands move a clamped cursor and
//! return the text to narrate.

pub mod text;

use std::sync::{Arc, RwLock};

use tracing::debug;

/// Narration when there is nothing to navigate yet
pub const NO_DETAILS_MESSAGE: &str = "No details available yet. Press control plus M first.";

/// Ordered detail chunks plus a cursor
#[derive(Debug, Clone, Default)]
pub struct DetailSet {
    chunks: Vec<String>,
    cursor: usize,
    /// Whether any navigation happened since the last load
    visited: bool,
}

impl DetailSet {
    fn new(chunks: Vec<String>) -> Self {
        Self {
            chunks,
            cursor: 0,
            visited: false,
        }
    }

    #[cfg(test)]
    pub fn total(&self) -> usize {
        self.chunks.len()
    }

    #[cfg(test)]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Move the cursor by one step, clamped at both ends. The first move
    /// after a load lands on the first chunk.
    fn step(&mut self, forward: bool) -> Navigation {
        if self.chunks.is_empty() {
            return Navigation::Empty;
        }
        if self.visited {
            self.cursor = if forward {
                (self.cursor + 1).min(self.chunks.len() - 1)
            } else {
                self.cursor.saturating_sub(1)
            };
        }
        self.visited = true;

        Navigation::Detail {
            text: self.chunks[self.cursor].clone(),
            index: self.cursor,
            total: self.chunks.len(),
        }
    }
}

/// Result of a navigation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Detail {
        text: String,
        index: usize,
        total: usize,
    },
    Empty,
}

impl Navigation {
    /// The text narrated for this result
    pub fn narration(&self) -> String {
        match self {
            Navigation::Detail { text, index, total } => {
                format!("Detail {} of {}: {}", index + 1, total, text)
            }
            Navigation::Empty => NO_DETAILS_MESSAGE.to_string(),
        }
    }
}

/// Shared handle to the current detail set
#[derive(Debug, Clone, Default)]
pub struct DetailNavigator {
    details: Arc<RwLock<DetailSet>>,
}

impl DetailNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the detail set and reset the cursor
    pub fn load(&self, chunks: Vec<String>) {
        let total = chunks.len();
        *self.write() = DetailSet::new(chunks);
        debug!(total, "details loaded");
    }

    pub fn next(&self) -> Navigation {
        self.write().step(true)
    }

    pub fn previous(&self) -> Navigation {
        self.write().step(false)
    }

    #[cfg(test)]
    pub fn total(&self) -> usize {
        self.read().total()
    }

    /// Copy of the current set
    #[cfg(test)]
    pub fn snapshot(&self) -> DetailSet {
        self.read().clone()
    }

    #[cfg(test)]
    fn read(&self) -> std::sync::RwLockReadGuard<'_, DetailSet> {
        self.details.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DetailSet> {
        self.details.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(text: &str, index: usize, total: usize) -> Navigation {
        Navigation::Detail {
            text: text.to_string(),
            index,
            total,
        }
    }

    fn loaded() -> DetailNavigator {
        let nav = DetailNavigator::new();
        nav.load(vec!["A.".into(), "B.".into(), "C.".into()]);
        nav
    }

    #[test]
    fn test_empty_navigator() {
        let nav = DetailNavigator::new();
        assert_eq!(nav.next(), Navigation::Empty);
        assert_eq!(nav.previous(), Navigation::Empty);
        assert_eq!(nav.next().narration(), NO_DETAILS_MESSAGE);
    }

    #[test]
    fn test_next_walks_and_clamps() {
        let nav = loaded();
        assert_eq!(nav.next(), detail("A.", 0, 3));
        assert_eq!(nav.next(), detail("B.", 1, 3));
        assert_eq!(nav.next(), detail("C.", 2, 3));
        assert_eq!(nav.next(), detail("C.", 2, 3));
        assert_eq!(nav.snapshot().cursor(), 2);
    }

    #[test]
    fn test_previous_clamps_at_start() {
        let nav = loaded();
        assert_eq!(nav.previous(), detail("A.", 0, 3));
        assert_eq!(nav.previous(), detail("A.", 0, 3));
        assert_eq!(nav.next(), detail("B.", 1, 3));
        assert_eq!(nav.previous(), detail("A.", 0, 3));
    }

    #[test]
    fn test_load_resets_cursor() {
        let nav = loaded();
        nav.next();
        nav.next();
        nav.load(vec!["X.".into(), "Y.".into()]);
        assert_eq!(nav.snapshot().cursor(), 0);
        assert_eq!(nav.next(), detail("X.", 0, 2));
    }

    #[test]
    fn test_narration_format() {
        assert_eq!(detail("B.", 1, 3).narration(), "Detail 2 of 3: B.");
    }
}
