//! Capacity-bounded output buffer.

/// Growable string that never holds more than `capacity - 1` bytes.
///
/// The capacity counts a terminator the way a fixed C buffer would, which
/// keeps truncation points identical to the legacy behaviour existing rule
/// sets depend on.
#[derive(Debug, Clone)]
pub struct BoundedString {
    buf: String,
    limit: usize,
    // Bytes given up when a truncated copy had to stop short of a char
    // boundary. They stay accounted as used.
    pad: usize,
}

impl BoundedString {
    pub fn new(capacity: usize) -> Self {
        let limit = capacity.saturating_sub(1);
        Self {
            buf: String::with_capacity(limit.min(4096)),
            limit,
            pad: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.buf.len() + self.pad)
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }

    /// Appends a single literal character. Returns `false`, leaving the
    /// buffer untouched, when it does not fit.
    pub fn push_char(&mut self, c: char) -> bool {
        if c.len_utf8() > self.remaining() {
            return false;
        }
        self.buf.push(c);
        true
    }

    /// Appends as much of `s` as fits. Returns `true` if `s` was cut.
    pub fn push_truncating(&mut self, s: &str) -> bool {
        let room = self.remaining();
        if s.len() <= room {
            self.buf.push_str(s);
            return false;
        }
        let mut end = room;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.push_str(&s[..end]);
        self.pad += room - end;
        true
    }

    /// Replaces everything from byte offset `start` with `f` applied to it.
    /// `f` must not lengthen its input.
    pub fn rewrite_from(&mut self, start: usize, f: impl FnOnce(&str) -> String) {
        let rewritten = f(&self.buf[start..]);
        debug_assert!(rewritten.len() <= self.buf.len() - start);
        self.buf.truncate(start);
        self.buf.push_str(&rewritten);
    }
}
