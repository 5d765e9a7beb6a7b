//! Character filtering applied to substituted values.

/// Characters accepted in attribute values in addition to ASCII
/// alphanumerics.
pub const ALLOWED_CHARS: &str = "#+-.:=@_";
pub const ALLOWED_CHARS_INPUT: &str = "#+-.:=@_/ $%?,";

/// `isspace` in the C locale.
#[inline]
pub fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0b' | '\x0c' | '\r')
}

/// Replaces characters outside `allowed` and returns the new string with the
/// number of replacements.
///
/// ASCII alphanumerics, multi-byte UTF-8 and `\x` escapes are always kept.
/// Whitespace becomes a plain space when the allow-list contains one; every
/// other character becomes `_`.
pub fn replace_chars(s: &str, allowed: &str) -> (String, usize) {
    let space_allowed = allowed.contains(' ');
    let mut out = String::with_capacity(s.len());
    let mut replaced = 0;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_alphanumeric() || allowed.contains(c) || !c.is_ascii() {
            out.push(c);
        } else if c == '\\' && chars.peek() == Some(&'x') {
            out.push(c);
            out.push('x');
            chars.next();
        } else if is_space(c) && space_allowed {
            out.push(' ');
            replaced += 1;
        } else {
            out.push('_');
            replaced += 1;
        }
    }
    (out, replaced)
}

/// Strips leading and trailing whitespace and replaces each inner run of
/// whitespace with a single `_`.
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_space = false;
    for c in s.trim_matches(is_space).chars() {
        if is_space(c) {
            in_space = true;
            continue;
        }
        if in_space {
            out.push('_');
            in_space = false;
        }
        out.push(c);
    }
    out
}
