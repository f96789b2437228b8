//! Line-based command console: a minimal UI client for [`HostsSync`].
//!
//! Rows are addressed by their 1-based position in the current listing.

use crate::error::SyncError;
use crate::record::{FieldEdit, HostRecord, RecordId};
use crate::sync::HostsSync;
use std::fmt::Write as _;
use std::str::FromStr;

pub const HELP: &str = "\
commands:
  list                              show all records
  add <address> <name> [comment]    append a new record
  insert <row>                      insert a blank record after <row>
  set <row> address|name|comment <value>
  enable <row> | disable <row>
  delete <row> | undelete <row>
  refresh                           reload the hosts file
  persist                           write pending changes now
  status
  quit";

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("no row {0}")]
    NoSuchRow(usize),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Add {
        address: String,
        name: String,
        comment: Option<String>,
    },
    Insert(usize),
    Edit(usize, FieldEdit),
    Delete(usize, bool),
    Refresh,
    Persist,
    Status,
    Help,
    Quit,
}

fn row(arg: Option<&str>, usage: &'static str) -> Result<usize, ConsoleError> {
    arg.and_then(|a| a.parse().ok())
        .filter(|&n| n > 0)
        .ok_or(ConsoleError::Usage(usage))
}

/// Remainder of `line` after the first `n` whitespace-separated words.
fn rest_after(line: &str, n: usize) -> &str {
    let mut rest = line.trim_start();
    for _ in 0..n {
        rest = rest
            .find(char::is_whitespace)
            .map_or("", |ix| rest[ix..].trim_start());
    }
    rest.trim_end()
}

impl FromStr for Command {
    type Err = ConsoleError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default();

        match verb {
            "list" | "ls" => Ok(Command::List),
            "add" => {
                const USAGE: &str = "add <address> <name> [comment]";
                let address = words.next().ok_or(ConsoleError::Usage(USAGE))?;
                let name = words.next().ok_or(ConsoleError::Usage(USAGE))?;
                let comment = Some(rest_after(line, 3))
                    .filter(|c| !c.is_empty())
                    .map(str::to_string);
                Ok(Command::Add {
                    address: address.to_string(),
                    name: name.to_string(),
                    comment,
                })
            }
            "insert" => Ok(Command::Insert(row(words.next(), "insert <row>")?)),
            "set" => {
                const USAGE: &str = "set <row> address|name|comment <value>";
                let n = row(words.next(), USAGE)?;
                let field = words.next().ok_or(ConsoleError::Usage(USAGE))?;
                let value = rest_after(line, 3).to_string();
                let edit = match field {
                    "address" => FieldEdit::Address(value),
                    "name" => FieldEdit::Name(value),
                    "comment" => FieldEdit::Comment(Some(value)),
                    _ => return Err(ConsoleError::Usage(USAGE)),
                };
                Ok(Command::Edit(n, edit))
            }
            "enable" => Ok(Command::Edit(
                row(words.next(), "enable <row>")?,
                FieldEdit::Enabled(true),
            )),
            "disable" => Ok(Command::Edit(
                row(words.next(), "disable <row>")?,
                FieldEdit::Enabled(false),
            )),
            "delete" | "rm" => Ok(Command::Delete(row(words.next(), "delete <row>")?, true)),
            "undelete" => Ok(Command::Delete(row(words.next(), "undelete <row>")?, false)),
            "refresh" => Ok(Command::Refresh),
            "persist" | "save" => Ok(Command::Persist),
            "status" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(ConsoleError::Unknown(other.to_string())),
        }
    }
}

async fn record_at(sync: &HostsSync, n: usize) -> Result<RecordId, ConsoleError> {
    let records = sync.store().snapshot().await;
    n.checked_sub(1)
        .and_then(|ix| records.get(ix))
        .map(|r| r.id)
        .ok_or(ConsoleError::NoSuchRow(n))
}

fn render_row(n: usize, record: &HostRecord) -> String {
    let mut line = format!(
        "{:>4}  {}  {:<16} {:<24}",
        n,
        if record.enabled { "on " } else { "off" },
        record.address,
        record.name
    );
    if let Some(comment) = &record.comment {
        let _ = write!(line, " # {}", comment);
    }
    if record.deleted {
        line.push_str("  [deleted]");
    } else if record.dirty {
        line.push_str("  [pending]");
    }
    line.trim_end().to_string()
}

/// Run one command against `sync` and describe the result.
pub async fn execute(sync: &HostsSync, command: Command) -> Result<String, ConsoleError> {
    let store = sync.store();
    match command {
        Command::List => {
            let records = store.snapshot().await;
            if records.is_empty() {
                return Ok("no records".to_string());
            }
            Ok(records
                .iter()
                .enumerate()
                .map(|(ix, record)| render_row(ix + 1, record))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Add {
            address,
            name,
            comment,
        } => {
            let record = HostRecord::with_mapping(&address, &name, comment.as_deref());
            let warning = record.validate().err();
            store.push(record).await;
            Ok(match warning {
                Some(reason) => format!("added, but it will not be written until fixed: {}", reason),
                None => "added".to_string(),
            })
        }
        Command::Insert(n) => {
            let after = record_at(sync, n).await?;
            store.insert_record_after(after).await?;
            Ok(format!("inserted blank record after row {}", n))
        }
        Command::Edit(n, edit) => {
            let id = record_at(sync, n).await?;
            store.edit_field(id, edit).await?;
            Ok(format!("row {} updated", n))
        }
        Command::Delete(n, deleted) => {
            let id = record_at(sync, n).await?;
            store.mark_deleted(id, deleted).await?;
            Ok(if deleted {
                format!("row {} marked for deletion", n)
            } else {
                format!("row {} kept", n)
            })
        }
        Command::Refresh => {
            sync.request_manual_refresh();
            Ok("refresh requested".to_string())
        }
        Command::Persist => {
            let report = sync.persist().await?;
            if report.skipped {
                return Ok("nothing to write".to_string());
            }
            Ok(format!(
                "{} updated, {} appended, {} removed, {} held back",
                report.updated,
                report.appended,
                report.removed,
                report.blocked.len()
            ))
        }
        Command::Status => {
            let status = sync.status().await;
            let mut out = format!(
                "{:?}: {} records, {} pending",
                status.hosts_path, status.records, status.pending
            );
            if let Some(at) = status.last_reload {
                let _ = write!(out, "\nlast reload: {}", at.to_rfc3339());
            }
            if let Some(at) = status.last_persist {
                let _ = write!(out, "\nlast write: {}", at.to_rfc3339());
            }
            for invalid in &status.blocked {
                let _ = write!(out, "\nheld back {}: {}", invalid.id, invalid.reason);
            }
            Ok(out)
        }
        Command::Help => Ok(HELP.to_string()),
        Command::Quit => Ok(String::new()),
    }
}
