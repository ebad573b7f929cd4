//! The sliding windows of the text that are compared against the pattern.
use std::ops::Range;

use crate::protocol::InvalidInput;

/// All windows of a text of `text_size` bytes that have the length of the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    pattern_size: usize,
    text_size: usize,
}

impl Windows {
    /// Fails unless `0 < pattern_size < text_size`.
    pub fn new(pattern_size: usize, text_size: usize) -> Result<Self, InvalidInput> {
        if pattern_size == 0 || text_size == 0 {
            return Err(InvalidInput::Empty {
                pattern_size,
                text_size,
            });
        }
        if pattern_size >= text_size {
            return Err(InvalidInput::PatternNotShorter {
                pattern_size,
                text_size,
            });
        }
        Ok(Self {
            pattern_size,
            text_size,
        })
    }

    /// Length of the pattern and of every window.
    pub fn pattern_size(&self) -> usize {
        self.pattern_size
    }

    /// Length of the text.
    pub fn text_size(&self) -> usize {
        self.text_size
    }

    /// Number of windows, `text_size - pattern_size + 1`.
    pub fn count(&self) -> usize {
        self.text_size - self.pattern_size + 1
    }

    /// The text offsets covered by window `w`.
    pub fn offsets(&self, w: usize) -> Range<usize> {
        w..w + self.pattern_size
    }

    /// Window indices in increasing order.
    pub fn iter(&self) -> Range<usize> {
        0..self.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_cover_the_text() {
        let windows = Windows::new(2, 4).unwrap();
        assert_eq!(windows.count(), 3);
        let covered: Vec<_> = windows.iter().map(|w| windows.offsets(w)).collect();
        assert_eq!(covered, vec![0..2, 1..3, 2..4]);
    }

    #[test]
    fn two_windows_when_pattern_is_one_shorter() {
        let windows = Windows::new(4, 5).unwrap();
        assert_eq!(windows.count(), 2);
        assert_eq!(windows.offsets(1), 1..5);
    }

    #[test]
    fn rejects_invalid_sizes() {
        assert!(matches!(
            Windows::new(3, 3),
            Err(InvalidInput::PatternNotShorter { .. })
        ));
        assert!(matches!(
            Windows::new(5, 3),
            Err(InvalidInput::PatternNotShorter { .. })
        ));
        assert!(matches!(Windows::new(0, 3), Err(InvalidInput::Empty { .. })));
        assert!(matches!(Windows::new(1, 0), Err(InvalidInput::Empty { .. })));
    }
}
