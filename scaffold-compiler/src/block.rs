//! Multi-line block consumption for content, block variables and command
//! lists.
//!
//! Two block shapes exist:
//! - *delimited*: opened by `"""`/`'''` on a form line, closed by the same
//!   delimiter on a later line;
//! - *indented*: every following line that is blank or deeper than the
//!   owning line. Trailing blank lines are left for the caller.

use crate::lexer::{clean, measure_indent};

/// Lines taken by a block and the index of the first line after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub lines: Vec<String>,
    pub next: usize,
    pub closed: bool,
}

/// Consume lines starting at `start` until one ends with `delimiter`.
///
/// Text before the closing delimiter on that line is kept. When no closing
/// line exists the block runs to end of input and `closed` is false.
pub fn consume_delimited(lines: &[&str], start: usize, delimiter: &str) -> Block {
    let mut taken = Vec::new();
    for (offset, raw) in lines[start.min(lines.len())..].iter().enumerate() {
        let line = clean(raw);
        let trimmed = line.trim_end();
        if let Some(before) = trimmed.strip_suffix(delimiter) {
            if !before.trim().is_empty() {
                taken.push(before.to_string());
            }
            return Block {
                lines: taken,
                next: start + offset + 1,
                closed: true,
            };
        }
        taken.push(line);
    }
    Block {
        lines: taken,
        next: lines.len(),
        closed: false,
    }
}

/// Consume lines deeper than `owner_indent`, starting at `start`.
pub fn consume_indented(
    lines: &[&str],
    start: usize,
    owner_indent: usize,
    tab_width: usize,
) -> Block {
    let mut end = start;
    let mut last_content = start;
    while end < lines.len() {
        let line = clean(lines[end]);
        if line.trim().is_empty() {
            end += 1;
            continue;
        }
        if measure_indent(&line, tab_width) <= owner_indent {
            break;
        }
        end += 1;
        last_content = end;
    }
    Block {
        lines: lines[start..last_content].iter().map(|l| clean(l)).collect(),
        next: last_content,
        closed: true,
    }
}

/// Index of the next non-blank line at or after `start`.
pub fn next_content_line(lines: &[&str], start: usize) -> Option<usize> {
    (start..lines.len()).find(|&i| !clean(lines[i]).trim().is_empty())
}

/// Strip the common leading indentation of non-blank lines, expanding tabs.
pub fn dedent(lines: &[String], tab_width: usize) -> Vec<String> {
    let common = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| measure_indent(l, tab_width))
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|line| {
            if line.trim().is_empty() {
                return String::new();
            }
            let indent = measure_indent(line, tab_width);
            let body = line.trim_start_matches([' ', '\t']);
            format!("{}{}", " ".repeat(indent - common), body.trim_end())
        })
        .collect()
}

/// Join block lines into file content: dedented, trailing blanks trimmed,
/// one final newline.
pub fn to_content(lines: &[String], tab_width: usize) -> String {
    let mut lines = dedent(lines, tab_width);
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    if lines.is_empty() {
        return String::new();
    }
    let mut content = lines.join("\n");
    content.push('\n');
    content
}
