// SPDX-License-Identifier: Apache-2.0
//! Half-open byte ranges with end-relative addressing.

/// A half-open byte range `[from, to)` into a content file.
///
/// A negative `from` addresses from the end of the file: the pair is fixed
/// up against the file size once it is known, so `from = -10, to = 0` means
/// "the last ten bytes". The all-zero range is not a valid request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    /// Range start, inclusive. Negative means offset from the end.
    pub from_inclusive: i64,
    /// Range end, exclusive. Must be `<= 0` when `from_inclusive` is
    /// negative.
    pub to_exclusive: i64,
}

impl ByteRange {
    /// Construct a range.
    pub fn new(from_inclusive: i64, to_exclusive: i64) -> Self {
        Self {
            from_inclusive,
            to_exclusive,
        }
    }

    /// True when the pair describes a plausible range shape, before the file
    /// size is known: either a forward range (`0 <= from < to`) or an
    /// end-relative one (`from < 0` with `from < to <= 0`).
    ///
    /// `from == 0, to == 0` is not a range.
    pub fn is_set(&self) -> bool {
        if self.from_inclusive < 0 {
            self.from_inclusive < self.to_exclusive && self.to_exclusive <= 0
        } else {
            self.from_inclusive < self.to_exclusive
        }
    }

    /// Number of bytes the range describes.
    pub fn len(&self) -> i64 {
        self.to_exclusive - self.from_inclusive
    }

    /// True for the degenerate zero-length range.
    pub fn is_empty(&self) -> bool {
        self.len() <= 0
    }

    /// Fix up against a known file size, yielding absolute `(offset, len)`.
    ///
    /// Returns `None` when the range is malformed or extends past the file:
    /// a forward range with `to > size`, or an end-relative range reaching
    /// before the first byte (`-from > size`).
    pub fn resolve(&self, size: u64) -> Option<(u64, u64)> {
        if !self.is_set() {
            return None;
        }
        let len = self.len() as u64;
        if self.from_inclusive >= 0 {
            let from = self.from_inclusive as u64;
            let to = self.to_exclusive as u64;
            if from > size || to > size {
                return None;
            }
            Some((from, len))
        } else {
            let back = self.from_inclusive.unsigned_abs();
            if back > size {
                return None;
            }
            Some((size - back, len))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ── 1. forward ranges resolve in place ───────────────────────────────

    #[test]
    fn forward_resolve() {
        let range = ByteRange::new(0, 100);
        assert!(range.is_set());
        assert_eq!(range.resolve(100), Some((0, 100)));
        assert_eq!(ByteRange::new(1, 10).resolve(100), Some((1, 9)));
    }

    // ── 2. whole-file forms, forward and tail ────────────────────────────

    #[test]
    fn whole_file_forms() {
        assert_eq!(ByteRange::new(0, 100).resolve(100), Some((0, 100)));
        assert_eq!(ByteRange::new(-100, 0).resolve(100), Some((0, 100)));
    }

    // ── 3. tail form serves the last |from| bytes ────────────────────────

    #[test]
    fn tail_form() {
        let range = ByteRange::new(-10, 0);
        assert_eq!(range.resolve(100), Some((90, 10)));
        // An end-relative window strictly inside the tail.
        assert_eq!(ByteRange::new(-10, -5).resolve(100), Some((90, 5)));
    }

    // ── 4. past-the-end is unsatisfiable ─────────────────────────────────

    #[test]
    fn past_end_rejected() {
        assert_eq!(ByteRange::new(0, 101).resolve(100), None);
        assert_eq!(ByteRange::new(100, 101).resolve(100), None);
        assert_eq!(ByteRange::new(-101, 0).resolve(100), None);
    }

    // ── 5. degenerate shapes are not set ─────────────────────────────────

    #[test]
    fn degenerate_shapes() {
        assert!(!ByteRange::new(0, 0).is_set());
        assert!(!ByteRange::new(5, 5).is_set());
        assert!(!ByteRange::new(10, 5).is_set());
        // Negative `to` with a non-negative `from` is meaningless.
        assert!(!ByteRange::new(0, -1).is_set());
        assert!(!ByteRange::new(-5, -5).is_set());
        assert_eq!(ByteRange::new(0, 0).resolve(100), None);
    }

    // ── 6. empty file accepts only nothing ───────────────────────────────

    #[test]
    fn empty_file() {
        assert_eq!(ByteRange::new(0, 1).resolve(0), None);
        assert_eq!(ByteRange::new(-1, 0).resolve(0), None);
    }
}
