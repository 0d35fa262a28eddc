//! Attribute handles and handle ranges.

use crate::error::{Error, Result};

/// A position in a peripheral's attribute table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Handle(pub u16);

impl Handle {
    /// Get the raw handle value.
    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl From<u16> for Handle {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Closed handle interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HandleRange {
    start: Handle,
    end: Handle,
}

impl HandleRange {
    /// Create a range.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandleRange` if `start > end`.
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidHandleRange { start, end });
        }
        Ok(Self {
            start: Handle(start),
            end: Handle(end),
        })
    }

    /// First handle in the range.
    pub fn start(&self) -> Handle {
        self.start
    }

    /// Last handle in the range.
    pub fn end(&self) -> Handle {
        self.end
    }

    /// True iff `start <= handle <= end`.
    #[inline]
    pub fn contains(&self, handle: Handle) -> bool {
        self.start <= handle && handle <= self.end
    }

    /// True if the two ranges share at least one handle.
    pub fn overlaps(&self, other: &HandleRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Number of handles covered.
    pub fn len(&self) -> usize {
        (self.end.0 - self.start.0) as usize + 1
    }

    /// Always false; a range covers at least one handle.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl std::fmt::Display for HandleRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_inclusive() {
        let range = HandleRange::new(1, 10).unwrap();
        assert!(range.contains(Handle(1)));
        assert!(range.contains(Handle(5)));
        assert!(range.contains(Handle(10)));
        assert!(!range.contains(Handle(0)));
        assert!(!range.contains(Handle(11)));
    }

    #[test]
    fn test_single_handle_range() {
        let range = HandleRange::new(7, 7).unwrap();
        assert!(range.contains(Handle(7)));
        assert_eq!(range.len(), 1);
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = HandleRange::new(11, 10).unwrap_err();
        assert!(matches!(err, Error::InvalidHandleRange { start: 11, end: 10 }));
    }

    #[test]
    fn test_full_range_len() {
        let range = HandleRange::new(0x0001, 0xffff).unwrap();
        assert_eq!(range.len(), 0xffff);
    }

    #[test]
    fn test_overlaps() {
        let a = HandleRange::new(1, 10).unwrap();
        let b = HandleRange::new(11, 20).unwrap();
        let c = HandleRange::new(10, 12).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn test_display() {
        let range = HandleRange::new(1, 10).unwrap();
        assert_eq!(range.to_string(), "0x0001..=0x000a");
    }
}
