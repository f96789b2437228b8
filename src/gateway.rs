//! Raw line access to the backing hosts file.
//!
//! The gateway never retries; the watch loop owns the retry policy for
//! reads, and persist failures go back to the caller.
//!
//! Lines are decoded leniently for parsing, but every line keeps the bytes
//! and terminator it was read with. Lines that are carried over unchanged
//! are written back exactly as found, whatever their encoding.

use crate::error::GatewayError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const BOM: &[u8] = b"\xef\xbb\xbf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// Where a line handed to [`HostsLines::rebuild`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOrigin {
    /// Carried over unchanged from this line of the file.
    Kept(usize),
    /// New text written over this line of the file.
    Replaced(usize),
    New,
}

/// One line as it sits in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawLine {
    content: Vec<u8>,
    /// `\n`, `\r\n`, or empty for a final line with no terminator.
    terminator: Vec<u8>,
}

/// The lines of the hosts file plus what is needed to write them back the
/// way they were found.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostsLines {
    /// Decoded text of each line, for parsing.
    pub lines: Vec<String>,
    /// Bytes and terminator for each entry of `lines`; `None` for new text.
    raw: Vec<Option<RawLine>>,
    /// Terminator for new lines: whichever the file uses most.
    pub line_ending: LineEnding,
    pub bom: bool,
    /// SHA-256 of the raw bytes this value was read from or written as.
    pub digest: String,
}

impl HostsLines {
    /// Decode raw file bytes.
    pub fn decode(bytes: &[u8]) -> Self {
        let bom = bytes.starts_with(BOM);
        let body = if bom { &bytes[BOM.len()..] } else { bytes };

        let mut lines = Vec::new();
        let mut raw = Vec::new();
        let (mut lf, mut crlf) = (0usize, 0usize);
        for chunk in body.split_inclusive(|b| *b == b'\n') {
            let (content, terminator) = match chunk {
                [content @ .., b'\r', b'\n'] => {
                    crlf += 1;
                    (content, &b"\r\n"[..])
                }
                [content @ .., b'\n'] => {
                    lf += 1;
                    (content, &b"\n"[..])
                }
                content => (content, &b""[..]),
            };
            lines.push(String::from_utf8_lossy(content).into_owned());
            raw.push(Some(RawLine {
                content: content.to_vec(),
                terminator: terminator.to_vec(),
            }));
        }

        Self {
            lines,
            raw,
            line_ending: if crlf > lf {
                LineEnding::CrLf
            } else {
                LineEnding::Lf
            },
            bom,
            digest: content_digest(bytes),
        }
    }

    /// Same file conventions, new line list.
    ///
    /// `origins[i]` says where `lines[i]` came from. Kept lines are written
    /// with their original bytes, replaced lines with their original
    /// terminator, and everything else with the file's usual terminator.
    pub fn rebuild(&self, lines: Vec<String>, origins: &[LineOrigin]) -> Self {
        let raw = lines
            .iter()
            .enumerate()
            .map(|(ix, text)| match origins.get(ix) {
                Some(LineOrigin::Kept(src)) => self.raw.get(*src).cloned().flatten(),
                Some(LineOrigin::Replaced(src)) => {
                    self.raw.get(*src).cloned().flatten().map(|raw| RawLine {
                        content: text.as_bytes().to_vec(),
                        terminator: raw.terminator,
                    })
                }
                Some(LineOrigin::New) | None => None,
            })
            .collect();
        Self {
            lines,
            raw,
            line_ending: self.line_ending,
            bom: self.bom,
            digest: String::new(),
        }
    }

    /// Render the lines, each followed by a line terminator.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        if self.bom {
            bytes.extend_from_slice(BOM);
        }
        for (ix, line) in self.lines.iter().enumerate() {
            match self.raw.get(ix).and_then(Option::as_ref) {
                Some(raw) => {
                    bytes.extend_from_slice(&raw.content);
                    if raw.terminator.is_empty() {
                        bytes.extend_from_slice(self.line_ending.as_str().as_bytes());
                    } else {
                        bytes.extend_from_slice(&raw.terminator);
                    }
                }
                None => {
                    bytes.extend_from_slice(line.as_bytes());
                    bytes.extend_from_slice(self.line_ending.as_str().as_bytes());
                }
            }
        }
        bytes
    }
}

/// Hex SHA-256 of file content, used to recognize our own writes.
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Reads and writes whole line lists against one file.
#[derive(Debug, Clone)]
pub struct HostsFile {
    path: PathBuf,
}

impl HostsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read_lines(&self) -> Result<HostsLines, GatewayError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| GatewayError::Read {
                path: self.path.clone(),
                source,
            })?;
        Ok(HostsLines::decode(&bytes))
    }

    /// Write the lines and return the digest of what was written.
    pub async fn write_lines(&self, lines: &HostsLines) -> Result<String, GatewayError> {
        let bytes = lines.encode();
        tokio::fs::write(&self.path, &bytes)
            .await
            .map_err(|source| GatewayError::Write {
                path: self.path.clone(),
                source,
            })?;
        Ok(content_digest(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_decode_detects_crlf_and_bom() {
        let lines = HostsLines::decode("\u{feff}127.0.0.1 localhost\r\n\r\n::1 ip6\r\n".as_bytes());
        assert_eq!(lines.lines, vec!["127.0.0.1 localhost", "", "::1 ip6"]);
        assert_eq!(lines.line_ending, LineEnding::CrLf);
        assert!(lines.bom);
    }

    #[test]
    fn test_encode_writes_trailing_terminator() {
        let lines = HostsLines::decode(b"a\nb");
        assert_eq!(lines.encode(), b"a\nb\n");
    }

    #[test]
    fn test_carried_lines_keep_their_bytes() {
        let original = HostsLines::decode(b"# caf\xe9\r\n10.0.0.1 db\n::1 ip6");
        assert_eq!(original.lines[0], "# caf\u{fffd}");
        assert_eq!(original.line_ending, LineEnding::Lf);

        let rebuilt = original.rebuild(
            vec![
                original.lines[0].clone(),
                "#10.0.0.1 db".to_string(),
                original.lines[2].clone(),
                "10.0.0.2 cache".to_string(),
            ],
            &[
                LineOrigin::Kept(0),
                LineOrigin::Replaced(1),
                LineOrigin::Kept(2),
                LineOrigin::New,
            ],
        );
        assert_eq!(
            rebuilt.encode(),
            b"# caf\xe9\r\n#10.0.0.1 db\n::1 ip6\n10.0.0.2 cache\n"
        );
    }

    #[tokio::test]
    async fn test_write_preserves_line_endings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1 localhost\r\n").unwrap();

        let file = HostsFile::new(&path);
        let read = file.read_lines().await.unwrap();
        assert_eq!(read.digest, content_digest(b"127.0.0.1 localhost\r\n"));

        let mut lines = read.lines.clone();
        lines.push("10.0.0.1 db".to_string());
        let rebuilt = read.rebuild(lines, &[LineOrigin::Kept(0), LineOrigin::New]);
        let digest = file.write_lines(&rebuilt).await.unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, b"127.0.0.1 localhost\r\n10.0.0.1 db\r\n");
        assert_eq!(digest, content_digest(&written));
    }

    #[tokio::test]
    async fn test_read_missing_file_is_busy() {
        let dir = TempDir::new().unwrap();
        let file = HostsFile::new(dir.path().join("missing"));
        let err = file.read_lines().await.unwrap_err();
        assert!(err.is_busy());
    }
}
