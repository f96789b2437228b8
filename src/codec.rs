//! Line codec for hosts-file records.
//!
//! A record line has the shape `[#]<address> <name> [# <comment>]`. The same
//! character marks a disabled line and starts a trailing comment, so a line
//! whose first non-blank character is `#` is always read as a disabled
//! record and the next `#` always starts its comment.

use crate::record::HostRecord;

/// Disable marker and comment delimiter.
pub const COMMENT_CHAR: char = '#';

pub const DEFAULT_ADDRESS_WIDTH: usize = 16;
pub const DEFAULT_NAME_WIDTH: usize = 24;

/// Parse one line of the hosts file.
///
/// Returns `None` for blank lines and for lines that hold nothing but
/// disable markers. The result is not validated: a comment line such as
/// `# see hosts(5)` parses into a record whose address is `see`, and callers
/// decide whether to keep it.
pub fn parse_line(line: &str, line_index: usize) -> Option<HostRecord> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let enabled = !trimmed.starts_with(COMMENT_CHAR);
    let body = trimmed.trim_start_matches(|c: char| c == COMMENT_CHAR || c.is_whitespace());

    let address_end = body.find(char::is_whitespace).unwrap_or(body.len());
    let (address, rest) = body.split_at(address_end);
    if address.is_empty() {
        return None;
    }

    let rest = rest.trim_start();
    let name_end = rest
        .find(|c: char| c.is_whitespace() || c == COMMENT_CHAR)
        .unwrap_or(rest.len());
    let name = &rest[..name_end];

    let comment = rest
        .find(COMMENT_CHAR)
        .map(|ix| rest[ix + COMMENT_CHAR.len_utf8()..].trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    let mut record = HostRecord::new();
    record.address = address.to_string();
    record.name = name.to_string();
    record.comment = comment;
    record.enabled = enabled;
    record.source_line = Some(line_index);
    record.source_text = Some(trimmed.to_string());
    record.dirty = false;
    Some(record)
}

/// Formats records back into lines, padding the address and name columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCodec {
    pub address_width: usize,
    pub name_width: usize,
}

impl LineCodec {
    pub fn new(address_width: usize, name_width: usize) -> Self {
        Self {
            address_width,
            name_width,
        }
    }

    pub fn parse(&self, line: &str, line_index: usize) -> Option<HostRecord> {
        parse_line(line, line_index)
    }

    pub fn format(&self, record: &HostRecord) -> String {
        let mut line = String::new();
        if !record.enabled {
            line.push(COMMENT_CHAR);
        }
        line.push_str(&format!(
            "{:<width$} ",
            record.address,
            width = self.address_width
        ));

        match record.comment.as_deref().filter(|c| !c.is_empty()) {
            Some(comment) => {
                line.push_str(&format!(
                    "{:<width$} {} {}",
                    record.name,
                    COMMENT_CHAR,
                    comment,
                    width = self.name_width
                ));
            }
            None => line.push_str(&record.name),
        }
        line
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS_WIDTH, DEFAULT_NAME_WIDTH)
    }
}
