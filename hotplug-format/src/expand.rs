use hotplug_core::paths::{strip_dev_root, DEV_ROOT, SYS_ROOT};
use hotplug_core::{Device, Event};
use tracing::{debug, error};

use crate::buffer::BoundedString;
use crate::chars::{collapse_whitespace, is_space, replace_chars, ALLOWED_CHARS_INPUT};
use crate::table::{self, SubstKind};

/// Longest accepted `{qualifier}`, and the working size for result tokens.
pub const PATH_SIZE: usize = 1024;

/// Longest attribute value considered before filtering.
pub const NAME_SIZE: usize = 512;

/// Expands `template` against `event`.
///
/// At most `capacity - 1` bytes are produced; the last substitution is cut
/// short when it does not fit. A missing closing brace stops expansion and
/// returns what was produced so far. Unknown substitutions are copied through
/// literally. This function never fails.
///
/// With `replace_whitespace`, every substituted value except `result` has
/// its whitespace collapsed (see [`collapse_whitespace`]).
pub fn expand<D: Device>(
    event: &Event<'_, D>,
    template: &str,
    capacity: usize,
    replace_whitespace: bool,
) -> String {
    let mut out = BoundedString::new(capacity);
    let mut pos = 0;

    while let Some(c) = template[pos..].chars().next() {
        if c == '$' || c == '%' {
            let after = &template[pos + 1..];
            if after.starts_with(c) {
                if !out.push_char(c) {
                    break;
                }
                pos += 2;
                continue;
            }

            let found = if c == '$' {
                table::by_name(after).map(|s| (s, 1 + s.name.len()))
            } else {
                after
                    .chars()
                    .next()
                    .and_then(table::by_code)
                    .map(|s| (s, 1 + s.code.len_utf8()))
            };

            match found {
                Some((subst, consumed)) => {
                    pos += consumed;
                    let mut attr = None;
                    if let Some(body) = template[pos..].strip_prefix('{') {
                        let Some(len) = body.find('}') else {
                            error!("missing closing brace for format '{template}'");
                            break;
                        };
                        if len >= PATH_SIZE {
                            debug!("format qualifier too long in '{template}'");
                            break;
                        }
                        attr = Some(&body[..len]);
                        pos += len + 2;
                    }

                    let start = out.len();
                    format_var(event, subst.kind, attr, &mut out);
                    if replace_whitespace && subst.kind != SubstKind::Result {
                        out.rewrite_from(start, collapse_whitespace);
                    }
                    continue;
                }
                None => {
                    debug!(
                        "no substitution for '{c}' at offset {pos} in '{template}', copying literally"
                    );
                }
            }
        }

        if !out.push_char(c) {
            break;
        }
        pos += c.len_utf8();
    }

    out.into_string()
}

fn format_var<D: Device>(
    event: &Event<'_, D>,
    kind: SubstKind,
    attr: Option<&str>,
    out: &mut BoundedString,
) {
    let dev = event.device();

    match kind {
        SubstKind::Devpath => {
            out.push_truncating(dev.devpath());
        }
        SubstKind::Kernel => {
            out.push_truncating(dev.sysname());
        }
        SubstKind::KernelNumber => {
            if let Some(num) = dev.sysnum() {
                out.push_truncating(num);
            }
        }
        SubstKind::Id => {
            if let Some(parent) = event.parent() {
                out.push_truncating(parent.sysname());
            }
        }
        SubstKind::Driver => {
            if let Some(driver) = event.parent().and_then(|p| p.driver()) {
                out.push_truncating(driver);
            }
        }
        SubstKind::Major => {
            out.push_truncating(&dev.devnum().major.to_string());
        }
        SubstKind::Minor => {
            out.push_truncating(&dev.devnum().minor.to_string());
        }
        SubstKind::Result => {
            if let Some(result) = event.program_result() {
                if let Some(part) = result_part(result, attr) {
                    out.push_truncating(part);
                }
            }
        }
        SubstKind::Attr => {
            let Some(attr) = attr else {
                error!("missing file parameter for attr");
                return;
            };
            if let Some(value) = attr_value(event, attr) {
                out.push_truncating(&value);
            }
        }
        SubstKind::Parent => {
            if let Some(devnode) = dev.parent().and_then(|p| p.devnode()) {
                out.push_truncating(strip_dev_root(devnode));
            }
        }
        SubstKind::Devnode => {
            if let Some(devnode) = dev.devnode() {
                out.push_truncating(devnode);
            }
        }
        SubstKind::Name => {
            if let Some(name) = event.name() {
                out.push_truncating(name);
            } else if let Some(devnode) = dev.devnode() {
                out.push_truncating(strip_dev_root(devnode));
            } else {
                out.push_truncating(dev.sysname());
            }
        }
        SubstKind::Links => {
            let links: Vec<&str> = dev.devlinks().iter().map(|l| strip_dev_root(l)).collect();
            out.push_truncating(&links.join(" "));
        }
        SubstKind::Root => {
            out.push_truncating(DEV_ROOT);
        }
        SubstKind::Sys => {
            out.push_truncating(SYS_ROOT);
        }
        SubstKind::Env => {
            if let Some(value) = attr.and_then(|key| dev.property(key)) {
                out.push_truncating(&value);
            }
        }
    }
}

/// Selects the part of a program result named by a `{N}` or `{N+}`
/// qualifier. Tokens are 1-based and separated by whitespace runs; without
/// `+` the token ends at the next space.
fn result_part<'r>(result: &'r str, attr: Option<&str>) -> Option<&'r str> {
    let (index, rest) = attr.map(parse_index).unwrap_or((0, ""));
    if index == 0 {
        return Some(result);
    }

    let result = truncate(result, PATH_SIZE - 1);
    let mut cpos = result;
    let mut missing = false;
    for _ in 1..index {
        cpos = cpos.trim_start_matches(|c| !is_space(c));
        cpos = cpos.trim_start_matches(is_space);
        if cpos.is_empty() {
            missing = true;
            break;
        }
    }
    if missing {
        error!("requested part of result string not found");
        return None;
    }

    if rest.starts_with('+') {
        Some(cpos)
    } else {
        Some(cpos.split(' ').next().unwrap_or_default())
    }
}

/// Leading decimal number of `s` and the text following it. A missing
/// number reads as zero.
fn parse_index(s: &str) -> (usize, &str) {
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    let index = s[..digits]
        .bytes()
        .fold(0usize, |n, d| n.saturating_mul(10).saturating_add(usize::from(d - b'0')));
    (index, &s[digits..])
}

fn attr_value<D: Device>(event: &Event<'_, D>, attr: &str) -> Option<String> {
    let dev = event.device();

    let value = subsystem_kernel_attr(dev, attr)
        .or_else(|| dev.sysattr_value(attr))
        .or_else(|| {
            event
                .parent()
                .filter(|p| p.devpath() != dev.devpath())
                .and_then(|p| p.sysattr_value(attr))
        })?;

    let value = truncate(&value, NAME_SIZE - 1).trim_end_matches(is_space);
    let (value, count) = replace_chars(value, ALLOWED_CHARS_INPUT);
    if count > 0 {
        debug!("{count} character(s) replaced");
    }
    Some(value)
}

/// Resolves `[subsystem/kernel]attribute` against an arbitrary device.
fn subsystem_kernel_attr<D: Device>(dev: &D, qualifier: &str) -> Option<String> {
    let (inner, attr) = qualifier.strip_prefix('[')?.split_once(']')?;
    let (subsystem, sysname) = inner.split_once('/')?;
    let attr = attr.trim_start_matches('/');
    if subsystem.is_empty() || sysname.is_empty() || attr.is_empty() {
        return None;
    }
    dev.subsystem_sysattr(subsystem, sysname, attr)
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
