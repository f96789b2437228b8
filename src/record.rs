//! The in-memory model of one hosts-file mapping.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Opaque handle identifying a record in the [`RecordStore`](crate::store::RecordStore).
///
/// Handles are not stable across reloads: a reload discards every record and
/// assigns fresh ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub uuid::Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user edit of a single record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldEdit {
    Address(String),
    Name(String),
    Comment(Option<String>),
    Enabled(bool),
}

/// Why a record cannot be written to the hosts file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
pub enum ValidationError {
    #[error("'{0}' is not an IPv4 or IPv6 address")]
    InvalidAddress(String),
    #[error("host name is empty")]
    EmptyName,
    #[error("host name '{0}' contains whitespace or '#'")]
    MalformedName(String),
    #[error("comment contains a line break")]
    MultilineComment,
}

/// One `address name # comment` mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostRecord {
    pub id: RecordId,
    pub address: String,
    pub name: String,
    pub comment: Option<String>,
    pub enabled: bool,
    /// Zero-based line this record occupies in the backing file, if it was
    /// ever written there.
    pub source_line: Option<usize>,
    /// Trimmed text of `source_line` as of the last reload or write. Used to
    /// detect that the line was changed by someone else in the meantime.
    pub source_text: Option<String>,
    pub dirty: bool,
    pub deleted: bool,
    /// Bumped on every edit; lets a persist pass tell whether the record
    /// changed while the file was being written.
    pub revision: u64,
}

impl HostRecord {
    /// A blank, enabled record that has never been written.
    pub fn new() -> Self {
        Self {
            id: RecordId::new(),
            address: String::new(),
            name: String::new(),
            comment: None,
            enabled: true,
            source_line: None,
            source_text: None,
            dirty: true,
            deleted: false,
            revision: 0,
        }
    }

    /// A new, dirty record with the given mapping.
    pub fn with_mapping(address: &str, name: &str, comment: Option<&str>) -> Self {
        let mut record = Self::new();
        record.address = address.trim().to_string();
        record.name = name.trim().to_string();
        record.comment = normalize_comment(comment.map(str::to_string));
        record
    }

    /// Apply a field edit and mark the record dirty.
    pub fn apply(&mut self, edit: FieldEdit) {
        match edit {
            FieldEdit::Address(address) => self.address = address.trim().to_string(),
            FieldEdit::Name(name) => self.name = name.trim().to_string(),
            FieldEdit::Comment(comment) => self.comment = normalize_comment(comment),
            FieldEdit::Enabled(enabled) => self.enabled = enabled,
        }
        self.dirty = true;
        self.revision += 1;
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.address.parse::<IpAddr>().is_err() {
            return Err(ValidationError::InvalidAddress(self.address.clone()));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self
            .name
            .chars()
            .any(|c| c.is_whitespace() || c == crate::codec::COMMENT_CHAR)
        {
            return Err(ValidationError::MalformedName(self.name.clone()));
        }
        if self
            .comment
            .as_deref()
            .is_some_and(|c| c.contains(['\n', '\r']))
        {
            return Err(ValidationError::MultilineComment);
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Whether the next persist pass has work to do for this record.
    pub fn is_pending(&self) -> bool {
        self.dirty || self.deleted
    }
}

impl Default for HostRecord {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_dirty_and_unplaced() {
        let record = HostRecord::new();
        assert!(record.dirty);
        assert!(!record.deleted);
        assert!(record.enabled);
        assert_eq!(record.source_line, None);
        assert!(!record.is_valid());
    }

    #[test]
    fn test_apply_marks_dirty_and_bumps_revision() {
        let mut record = HostRecord::with_mapping("127.0.0.1", "localhost", None);
        record.dirty = false;

        record.apply(FieldEdit::Enabled(false));
        assert!(record.dirty);
        assert!(!record.enabled);
        assert_eq!(record.revision, 1);

        record.apply(FieldEdit::Comment(Some("  dev box ".to_string())));
        assert_eq!(record.comment.as_deref(), Some("dev box"));
        assert_eq!(record.revision, 2);

        record.apply(FieldEdit::Comment(Some("   ".to_string())));
        assert_eq!(record.comment, None);
    }

    #[test]
    fn test_validate() {
        assert!(HostRecord::with_mapping("10.0.0.1", "db.local", None).is_valid());
        assert!(HostRecord::with_mapping("::1", "localhost", Some("v6")).is_valid());

        assert_eq!(
            HostRecord::with_mapping("not-an-ip", "x", None).validate(),
            Err(ValidationError::InvalidAddress("not-an-ip".to_string()))
        );
        assert_eq!(
            HostRecord::with_mapping("10.0.0.1", "  ", None).validate(),
            Err(ValidationError::EmptyName)
        );

        let mut record = HostRecord::with_mapping("10.0.0.1", "a", None);
        record.apply(FieldEdit::Name("a#b".to_string()));
        assert!(matches!(
            record.validate(),
            Err(ValidationError::MalformedName(_))
        ));

        record.apply(FieldEdit::Name("a".to_string()));
        record.apply(FieldEdit::Comment(Some("one\ntwo".to_string())));
        assert_eq!(record.validate(), Err(ValidationError::MultilineComment));
    }
}
