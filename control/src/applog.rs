//! Per-app event log: `logs/<app>.log`, most recent lines only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Lines kept per app file.
pub const MAX_LINES: usize = 50;

/// Receives `(app, line)` pairs from the supervisor.
pub trait AppLog: Send {
    fn record(&mut self, app: &str, line: &str);
}

/// Appends timestamped lines to one file per app, trimming to [`MAX_LINES`].
pub struct FileAppLog {
    dir: PathBuf,
}

impl FileAppLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, app: &str) -> PathBuf {
        self.dir.join(format!("{}.log", sanitize(app)))
    }

    fn append(&self, path: &Path, line: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let existing = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let entry = format!("[{stamp}] {line}");

        let mut lines: Vec<&str> = existing.lines().collect();
        lines.push(&entry);
        let skip = lines.len().saturating_sub(MAX_LINES);
        let mut body = lines[skip..].join("\n");
        body.push('\n');
        std::fs::write(path, body)
    }
}

impl AppLog for FileAppLog {
    fn record(&mut self, app: &str, line: &str) {
        let path = self.path_for(app);
        if let Err(e) = self.append(&path, line) {
            tracing::warn!(app, path = %path.display(), "cannot write app log: {e}");
        }
    }
}

/// File-name-safe form of an app name.
fn sanitize(app: &str) -> String {
    let cleaned: String = app
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "app".to_string()
    } else {
        trimmed.to_string()
    }
}

/// In-memory log, shared so tests can inspect what the supervisor recorded.
#[derive(Clone, Default)]
pub struct MemoryAppLog {
    lines: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

impl MemoryAppLog {
    pub fn lines(&self, app: &str) -> Vec<String> {
        self.lines
            .lock()
            .map(|map| map.get(app).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl AppLog for MemoryAppLog {
    fn record(&mut self, app: &str, line: &str) {
        if let Ok(mut map) = self.lines.lock() {
            map.entry(app.to_string()).or_default().push(line.to_string());
        }
    }
}
