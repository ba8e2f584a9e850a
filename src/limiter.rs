//! Sliding-window cap on outbound alert mail.
//!
//! State lives entirely in a directory of empty marker files, one per alert
//! sent. A marker's modification time is its only payload. Every decision
//! prunes expired markers, counts the rest and, if there is room, creates a
//! new one. Nothing is locked across those steps: two processes can both pass
//! the count check and overshoot the ceiling by a marker or two, which is
//! fine for a storm guard.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};
use tracing::{debug, warn};

/// Alerts allowed per window unless configured otherwise.
pub const DEFAULT_MAX_ALERTS: usize = 25;

/// Window length unless configured otherwise.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(86_400);

/// File extension that marks a file as limiter state.
pub const MARKER_EXTENSION: &str = "alert";

/// Why an acquisition was refused.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    /// The marker directory could not be created or made writable.
    #[error("rate limit directory {path} is not a writable directory: {source}")]
    Unavailable {
        /// Marker directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The marker directory could not be listed.
    #[error("failed to list markers in {path}: {source}")]
    List {
        /// Marker directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// An expired marker could not be removed.
    #[error("failed to prune expired marker {path}: {source}")]
    Prune {
        /// Marker that could not be removed.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The ceiling has been reached for the current window.
    #[error("at least {max} alerts have been sent in the last {window_hours} hours")]
    Exhausted {
        /// Configured ceiling.
        max: usize,
        /// Window length in hours.
        window_hours: u64,
    },

    /// The new marker could not be created (including name collisions).
    #[error("failed to create marker {path}: {source}")]
    Create {
        /// Marker that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// Decides whether one more alert may be sent.
pub trait RateLimiter: Send + Sync {
    /// Take one slot, or explain why not.
    ///
    /// # Errors
    ///
    /// Returns the reason the slot was refused. Any uncertainty about the
    /// current state is a refusal.
    fn acquire(&self) -> Result<(), LimiterError>;

    /// Take one slot; `true` only if the slot was durably recorded.
    fn try_acquire(&self) -> bool {
        match self.acquire() {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "rate limiter refused");
                false
            }
        }
    }
}

/// Marker-file rate limiter.
#[derive(Debug, Clone)]
pub struct FileRateLimiter {
    dir: PathBuf,
    max_alerts: usize,
    window: Duration,
}

impl FileRateLimiter {
    /// Limiter keeping markers in `dir` with the default 25 per 24 hours.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_alerts: DEFAULT_MAX_ALERTS,
            window: DEFAULT_WINDOW,
        }
    }

    /// Override the ceiling.
    #[must_use]
    pub fn with_max_alerts(mut self, max_alerts: usize) -> Self {
        self.max_alerts = max_alerts;
        self
    }

    /// Override the window length.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Configured ceiling.
    pub fn max_alerts(&self) -> usize {
        self.max_alerts
    }

    /// Configured window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count unexpired markers without pruning or creating anything.
    ///
    /// A missing directory counts as zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be listed.
    pub fn active_markers(&self) -> Result<usize, LimiterError> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let now = SystemTime::now();
        let markers = self.markers()?;
        Ok(markers
            .iter()
            .filter(|(_, modified)| !self.is_expired(now, *modified))
            .count())
    }

    fn ensure_dir(&self) -> Result<(), LimiterError> {
        let unavailable = |source| LimiterError::Unavailable {
            path: self.dir.clone(),
            source,
        };

        if !self.dir.is_dir() {
            create_marker_dir(&self.dir).map_err(unavailable)?;
        }

        let meta = fs::metadata(&self.dir).map_err(unavailable)?;
        if meta.permissions().readonly() {
            make_dir_writable(&self.dir).map_err(unavailable)?;
        }
        Ok(())
    }

    /// Delete expired markers and return how many remain.
    fn prune(&self, now: SystemTime) -> Result<usize, LimiterError> {
        let mut remaining: usize = 0;
        for (path, modified) in self.markers()? {
            if !self.is_expired(now, modified) {
                remaining = remaining.saturating_add(1);
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => debug!(marker = %path.display(), "pruned expired marker"),
                // Another process pruned it first.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(LimiterError::Prune { path, source }),
            }
        }
        Ok(remaining)
    }

    /// A marker with the same name already existing counts as failure.
    fn create_marker(&self, at: DateTime<Local>) -> Result<PathBuf, LimiterError> {
        let path = self.dir.join(marker_name(at));
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| LimiterError::Create {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    fn markers(&self) -> Result<Vec<(PathBuf, SystemTime)>, LimiterError> {
        let list_error = |source| LimiterError::List {
            path: self.dir.clone(),
            source,
        };
        let mut markers = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(list_error)? {
            let entry = entry.map_err(list_error)?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(MARKER_EXTENSION) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .map_err(list_error)?;
            markers.push((path, modified));
        }
        Ok(markers)
    }

    fn is_expired(&self, now: SystemTime, modified: SystemTime) -> bool {
        // Markers from the future (clock skew) are treated as fresh.
        now.duration_since(modified)
            .is_ok_and(|age| age > self.window)
    }

    fn window_hours(&self) -> u64 {
        self.window.as_secs().checked_div(3600).unwrap_or_default()
    }
}

impl RateLimiter for FileRateLimiter {
    fn acquire(&self) -> Result<(), LimiterError> {
        self.ensure_dir()?;

        let remaining = self.prune(SystemTime::now())?;
        if remaining >= self.max_alerts {
            return Err(LimiterError::Exhausted {
                max: self.max_alerts,
                window_hours: self.window_hours(),
            });
        }

        let marker = self.create_marker(Local::now())?;
        debug!(
            marker = %marker.display(),
            used = remaining.saturating_add(1),
            max = self.max_alerts,
            "alert slot acquired"
        );
        Ok(())
    }
}

fn marker_name(at: DateTime<Local>) -> String {
    format!("{}.{MARKER_EXTENSION}", at.format("%Y-%m-%d_%H:%M:%S%.6f"))
}

#[cfg(unix)]
fn create_marker_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new().recursive(true).mode(0o755).create(dir)
}

#[cfg(not(unix))]
fn create_marker_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn make_dir_writable(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    warn!(dir = %dir.display(), "rate limit directory is read-only, resetting to 0755");
    fs::set_permissions(dir, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_dir_writable(dir: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(dir)?.permissions();
    perms.set_readonly(false);
    fs::set_permissions(dir, perms)
}
