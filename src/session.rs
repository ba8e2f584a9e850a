//! Per-process append-only diagnostic log.
//!
//! The file is invented on first use: its name is the wall-clock time with
//! microsecond precision, which doubles as the session key. A session that
//! cannot get a writable directory is disabled for the rest of the process
//! and every write falls back to `tracing`.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use chrono::Local;
use tracing::{error, warn};

/// Errors raised while opening the session file.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The log directory is missing or read-only.
    #[error("log directory {0} is not writable")]
    NotWritable(PathBuf),

    /// The session file could not be opened.
    #[error("failed to open session log {path}: {source}")]
    Open {
        /// File that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Callback fired once when the session turns out to be unusable.
pub type DisabledNotice = Box<dyn Fn(&str) + Send + Sync>;

enum SessionState {
    Unopened,
    Open { path: PathBuf, file: File },
    Disabled,
}

/// Lazily opened per-process log file.
pub struct LogSession {
    dir: PathBuf,
    startup_lines: Vec<String>,
    state: Mutex<SessionState>,
    on_disabled: OnceLock<DisabledNotice>,
}

impl std::fmt::Debug for LogSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSession")
            .field("dir", &self.dir)
            .field("path", &self.path())
            .finish()
    }
}

impl LogSession {
    /// Create a session that will log under `dir` on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            startup_lines: Vec::new(),
            state: Mutex::new(SessionState::Unopened),
            on_disabled: OnceLock::new(),
        }
    }

    /// Extra lines written right after `Logging started`.
    #[must_use]
    pub fn with_startup_lines(mut self, lines: Vec<String>) -> Self {
        self.startup_lines = lines;
        self
    }

    /// Register the one-shot notice sent when the directory is unusable.
    ///
    /// Only the first registration wins.
    pub fn on_disabled(&self, notice: DisabledNotice) {
        if self.on_disabled.set(notice).is_err() {
            warn!("log session disabled-notice already registered");
        }
    }

    /// Path of the session file once it has been opened.
    pub fn path(&self) -> Option<PathBuf> {
        match &*self.lock() {
            SessionState::Open { path, .. } => Some(path.clone()),
            SessionState::Unopened | SessionState::Disabled => None,
        }
    }

    /// Whether a session file has been opened.
    pub fn is_active(&self) -> bool {
        matches!(&*self.lock(), SessionState::Open { .. })
    }

    /// Whether the session has been permanently disabled.
    pub fn is_disabled(&self) -> bool {
        matches!(&*self.lock(), SessionState::Disabled)
    }

    /// Append one timestamped record.
    ///
    /// Returns `false` when the message only reached the fallback logger.
    /// Never panics and never surfaces I/O errors.
    pub fn write(&self, message: &str) -> bool {
        let mut state = self.lock();

        if matches!(&*state, SessionState::Unopened) {
            match self.open() {
                Ok((path, file)) => *state = SessionState::Open { path, file },
                Err(e) => {
                    *state = SessionState::Disabled;
                    drop(state);
                    warn!(error = %e, "session log disabled");
                    self.notify_disabled(&e);
                    error!(target: "faultline::session", "{message}");
                    return false;
                }
            }
        }

        match &mut *state {
            SessionState::Open { path, file } => {
                if let Err(e) = append_line(file, message) {
                    error!(
                        path = %path.display(),
                        error = %e,
                        "session log write failed: {message}"
                    );
                    return false;
                }
                true
            }
            SessionState::Unopened | SessionState::Disabled => {
                error!(target: "faultline::session", "{message}");
                false
            }
        }
    }

    fn open(&self) -> Result<(PathBuf, File), SessionError> {
        if !is_writable_dir(&self.dir) {
            return Err(SessionError::NotWritable(self.dir.clone()));
        }

        let path = self.dir.join(session_file_name());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SessionError::Open {
                path: path.clone(),
                source,
            })?;

        let startup = std::iter::once("Logging started".to_owned())
            .chain(self.startup_lines.iter().cloned());
        for line in startup {
            if let Err(e) = append_line(&mut file, &line) {
                warn!(path = %path.display(), error = %e, "failed to write session header");
            }
        }

        Ok((path, file))
    }

    fn notify_disabled(&self, cause: &SessionError) {
        if let Some(notice) = self.on_disabled.get() {
            notice(&format!("{cause} so session log files are disabled"));
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Session file name for "now": `YYYY-mm-dd_HH:MM:SS.micros.log`.
pub fn session_file_name() -> String {
    format!("{}.log", Local::now().format("%Y-%m-%d_%H:%M:%S%.6f"))
}

/// Whether `dir` exists, is a directory and is not read-only.
pub fn is_writable_dir(dir: &Path) -> bool {
    fs::metadata(dir).is_ok_and(|meta| meta.is_dir() && !meta.permissions().readonly())
}

fn append_line(file: &mut File, message: &str) -> std::io::Result<()> {
    let line = format!("{} - {message}\n", Local::now().format("%Y-%m-%d %H:%M:%S"));
    file.write_all(line.as_bytes())
}
