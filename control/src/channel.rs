//! File-based single-slot mailboxes.
//!
//! A sender atomically replaces the slot file (last write wins); the receiver
//! polls, claims the file by renaming it, and deletes it after reading, so
//! each command is consumed at most once. `wallch.cmd` carries
//! [`WallpaperCommand`]s to the wallpaper daemon; `control.cmd` carries
//! [`Intent`]s from the CLI to a running supervisor.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::write_json_atomic;

const FREE_SLOT_POLL: Duration = Duration::from_millis(50);

/// A message type that can travel through a [`Mailbox`].
pub trait MailboxMessage: Serialize + DeserializeOwned {
    /// Parses a bare one-word command, as written by older tools.
    fn from_plain_text(_word: &str) -> Option<Self> {
        None
    }
}

/// On-disk form: `{"type": ..., "issuedAt": ...}` plus any payload fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<K> {
    #[serde(flatten)]
    pub command: K,
    pub issued_at: DateTime<Utc>,
}

// ── Commands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WallpaperCommand {
    Pause,
    Resume,
    Toggle,
    Next,
    Reload,
    Quit,
}

impl MailboxMessage for WallpaperCommand {
    fn from_plain_text(word: &str) -> Option<Self> {
        match word {
            "pause" => Some(Self::Pause),
            "resume" => Some(Self::Resume),
            "toggle" => Some(Self::Toggle),
            "next" => Some(Self::Next),
            "reload" => Some(Self::Reload),
            "quit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// A request from the CLI to a supervisor that is already running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Intent {
    Start { app: String },
    Stop { app: String },
    Toggle { app: String },
    ApplyProfile { profile: String },
    ClearProfile,
    Reload,
}

impl MailboxMessage for Intent {}

// ── Mailbox ───────────────────────────────────────────────────────────────────

pub struct Mailbox<K> {
    path: PathBuf,
    _kind: PhantomData<fn() -> K>,
}

impl<K: MailboxMessage> Mailbox<K> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), _kind: PhantomData }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when no command is waiting.
    pub fn is_free(&self) -> bool {
        !self.path.exists()
    }

    /// Replaces whatever is in the slot with `command`.
    pub fn post(&self, command: K) -> Result<(), StoreError> {
        let envelope = Envelope { command, issued_at: Utc::now() };
        write_json_atomic(&self.path, &envelope)
    }

    /// Waits up to `timeout` for the receiver to drain the slot, then posts.
    ///
    /// Returns `false` when the slot was still occupied and the pending command
    /// got overwritten.
    pub async fn post_when_free(&self, command: K, timeout: Duration) -> Result<bool, StoreError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut free = self.is_free();
        while !free && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(FREE_SLOT_POLL).await;
            free = self.is_free();
        }
        self.post(command)?;
        Ok(free)
    }

    /// Claims and removes the pending command, if any.
    pub fn take(&self) -> Option<Envelope<K>> {
        let claimed = claimed_path(&self.path);
        match std::fs::rename(&self.path, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), "mailbox busy: {e}");
                return None;
            }
        }
        let content = std::fs::read_to_string(&claimed);
        let _ = std::fs::remove_file(&claimed);
        let content = match content {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "cannot read command: {e}");
                return None;
            }
        };
        parse(&content).or_else(|| {
            tracing::warn!(path = %self.path.display(), content = content.trim(), "unknown command");
            None
        })
    }

    /// Drops any pending command without acting on it.
    pub fn clear(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn parse<K: MailboxMessage>(content: &str) -> Option<Envelope<K>> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(envelope) = serde_json::from_str::<Envelope<K>>(trimmed) {
        return Some(envelope);
    }
    let word = trimmed.lines().next()?.trim().to_lowercase();
    K::from_plain_text(&word).map(|command| Envelope { command, issued_at: Utc::now() })
}

fn claimed_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".taken");
    path.with_file_name(name)
}
