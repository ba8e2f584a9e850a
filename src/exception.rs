//! The single normalized representation of a terminating failure.
//!
//! Application code raises a [`UnifiedException`] by returning it as an
//! `Err`; the fault normalizer and the shutdown monitor build one from a raw
//! runtime fault. Once built it is never mutated, and the exception handler
//! consumes it by value.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::panic::Location;

use crate::severity::Severity;

/// User-facing failure category.
///
/// Chosen to select the wording of the failure page, independently of how
/// technically severe the failure was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Category {
    /// The visitor supplied something we cannot work with.
    User,
    /// A transient condition; retrying later may succeed.
    Temporary,
    /// A defect on our side.
    #[default]
    Permanent,
    /// A service we depend on failed.
    ThirdParty,
}

impl Category {
    /// Numeric code understood by failure page renderers.
    pub const fn code(self) -> u8 {
        match self {
            Self::User => 1,
            Self::Temporary => 2,
            Self::Permanent => 3,
            Self::ThirdParty => 4,
        }
    }

    /// Map a numeric code back to a category. Unknown codes are permanent.
    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => Self::User,
            2 => Self::Temporary,
            4 => Self::ThirdParty,
            _ => Self::Permanent,
        }
    }

    /// Upper-case name used in diagnostic records.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Temporary => "TEMPORARY",
            Self::Permanent => "PERMANENT",
            Self::ThirdParty => "THIRD_PARTY",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an exception came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Raised directly by application code.
    Application,
    /// Converted from a raw runtime fault.
    Fault,
    /// Converted from a panic that unwound to the request boundary.
    Panic,
}

impl Origin {
    /// Kind label used in diagnostic records.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Application => "ApplicationException",
            Self::Fault => "FaultException",
            Self::Panic => "PanicException",
        }
    }
}

/// File and line an exception is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Source file path as reported by the compiler or runtime.
    pub file: String,
    /// One-based line number.
    pub line: u32,
}

impl SourceLocation {
    /// Build a location from parts.
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl From<&Location<'_>> for SourceLocation {
    fn from(location: &Location<'_>) -> Self {
        Self::new(location.file(), location.line())
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Demangled symbol name.
    pub symbol: String,
    /// `file:line` when debug info was available.
    pub location: Option<String>,
}

impl Frame {
    /// Build a frame from parts.
    pub fn new(symbol: impl Into<String>, location: Option<String>) -> Self {
        Self {
            symbol: symbol.into(),
            location,
        }
    }
}

/// A terminating failure, normalized.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{category}: {message}")]
pub struct UnifiedException {
    message: String,
    category: Category,
    native_severity: Option<Severity>,
    location: SourceLocation,
    frames: Vec<Frame>,
    origin: Origin,
}

impl UnifiedException {
    /// Raise an application exception attributed to the caller's location.
    #[track_caller]
    pub fn new(category: Category, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category,
            native_severity: None,
            location: Location::caller().into(),
            frames: capture_frames(),
            origin: Origin::Application,
        }
    }

    /// Wrap any error, keeping its source chain in the message.
    #[track_caller]
    pub fn from_error(category: Category, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::new(category, message)
    }

    /// Build the exception for a raw runtime fault.
    ///
    /// Faults are always permanent: a runtime complaint is a defect on our
    /// side regardless of its severity.
    pub fn from_fault(
        severity: Severity,
        message: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        Self {
            message: message.into(),
            category: Category::Permanent,
            native_severity: Some(severity),
            location,
            frames: capture_frames(),
            origin: Origin::Fault,
        }
    }

    /// Build the exception for a panic that reached the request boundary.
    pub fn from_panic(message: impl Into<String>, location: SourceLocation, frames: Vec<Frame>) -> Self {
        Self {
            message: message.into(),
            category: Category::Permanent,
            native_severity: None,
            location,
            frames,
            origin: Origin::Panic,
        }
    }

    /// Replace the captured stack with explicit frames.
    #[must_use]
    pub fn with_frames(mut self, frames: Vec<Frame>) -> Self {
        self.frames = frames;
        self
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// User-facing category.
    pub fn category(&self) -> Category {
        self.category
    }

    /// Severity of the raw fault this was derived from, if any.
    pub fn native_severity(&self) -> Option<Severity> {
        self.native_severity
    }

    /// Source location the failure is attributed to.
    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    /// Captured stack, innermost first.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Where the exception came from.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Multi-line developer-facing description.
    ///
    /// This is the record written to the session log and mailed to the
    /// maintainers; it is never shown to visitors.
    pub fn describe(&self) -> String {
        let mut out = format!("Kind: {}\n", self.origin.as_str());
        if let Some(severity) = self.native_severity {
            out.push_str(&format!("Severity: {severity}\n"));
        }
        out.push_str(&format!("Category: {}\n", self.category));
        out.push_str(&format!("Message: {}\n", self.message));
        out.push_str(&format!("File: {}\n", self.location.file));
        out.push_str(&format!("Line: {}\n", self.location.line));
        out.push_str("Trace:");
        if self.frames.is_empty() {
            out.push_str(" (not captured)\n");
            return out;
        }
        out.push('\n');
        for (index, frame) in self.frames.iter().enumerate() {
            match &frame.location {
                Some(location) => {
                    out.push_str(&format!("#{index} {} at {location}\n", frame.symbol));
                }
                None => out.push_str(&format!("#{index} {}\n", frame.symbol)),
            }
        }
        out
    }
}

/// Capture the current stack as frames.
///
/// Respects `RUST_BACKTRACE`/`RUST_LIB_BACKTRACE`: when capture is disabled
/// the result is empty.
pub fn capture_frames() -> Vec<Frame> {
    let backtrace = Backtrace::capture();
    if backtrace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }
    parse_backtrace(&backtrace.to_string())
}

/// Parse the rendered form of a [`Backtrace`] into frames.
///
/// The rendering alternates `N: symbol` lines with optional
/// `at file:line:col` lines.
pub fn parse_backtrace(rendered: &str) -> Vec<Frame> {
    let mut frames: Vec<Frame> = Vec::new();
    for line in rendered.lines() {
        let trimmed = line.trim();
        if let Some(location) = trimmed.strip_prefix("at ") {
            if let Some(last) = frames.last_mut() {
                if last.location.is_none() {
                    last.location = Some(location.to_owned());
                }
            }
            continue;
        }
        if let Some((index, symbol)) = trimmed.split_once(": ") {
            if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) {
                frames.push(Frame::new(symbol, None));
            }
        }
    }
    frames
}
