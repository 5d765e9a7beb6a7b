//! Command-line splitting and helper path resolution.

use std::path::{Path, PathBuf};

/// Splits a command line on whitespace. A single or double quote at the
/// start of a word quotes up to the matching quote, which also ends the word;
/// an unterminated quote runs to the end of the line. Quotes inside a word
/// are ordinary characters. Backslashes are kept as written.
pub fn split_command(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => {
                args.push(std::mem::take(&mut current));
                quote = None;
            }
            Some(_) => current.push(c),
            None if !in_word && (c == '\'' || c == '"') => quote = Some(c),
            None if c.is_ascii_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word || quote.is_some() {
        args.push(current);
    }
    args
}

/// Absolute program paths are used as-is; anything else is looked up in
/// `helper_dir`.
pub fn resolve_program(helper_dir: &Path, program: &str) -> PathBuf {
    if program.starts_with('/') {
        PathBuf::from(program)
    } else {
        helper_dir.join(program)
    }
}
