//! Raw fault severities and the reporting mask.
//!
//! Severities are single-bit flags so a set of them fits in one `u32` mask,
//! the same shape the hosting runtime uses for its "which faults do we
//! report" setting.

use std::fmt;

/// Severity code attached to a raw runtime fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Severity(u32);

impl Severity {
    /// Fatal run-time error. Execution cannot continue.
    pub const ERROR: Self = Self(1);
    /// Run-time warning. Execution continues.
    pub const WARNING: Self = Self(2);
    /// Parse error reported while loading code.
    pub const PARSE: Self = Self(4);
    /// Run-time notice.
    pub const NOTICE: Self = Self(8);
    /// Fatal error raised during runtime start-up.
    pub const CORE_ERROR: Self = Self(16);
    /// Warning raised during runtime start-up.
    pub const CORE_WARNING: Self = Self(32);
    /// Fatal compile-time error.
    pub const COMPILE_ERROR: Self = Self(64);
    /// Compile-time warning.
    pub const COMPILE_WARNING: Self = Self(128);
    /// Application-triggered error.
    pub const USER_ERROR: Self = Self(256);
    /// Application-triggered warning.
    pub const USER_WARNING: Self = Self(512);
    /// Application-triggered notice.
    pub const USER_NOTICE: Self = Self(1024);
    /// Code-quality suggestion.
    pub const STRICT: Self = Self(2048);
    /// Catchable fatal error.
    pub const RECOVERABLE_ERROR: Self = Self(4096);
    /// Use of a deprecated feature.
    pub const DEPRECATED: Self = Self(8192);
    /// Application-triggered deprecation.
    pub const USER_DEPRECATED: Self = Self(16384);

    /// Number of distinct severity bits.
    pub const COUNT: u32 = 15;

    /// All named severities in bit order.
    pub const ALL: [Self; 15] = [
        Self::ERROR,
        Self::WARNING,
        Self::PARSE,
        Self::NOTICE,
        Self::CORE_ERROR,
        Self::CORE_WARNING,
        Self::COMPILE_ERROR,
        Self::COMPILE_WARNING,
        Self::USER_ERROR,
        Self::USER_WARNING,
        Self::USER_NOTICE,
        Self::STRICT,
        Self::RECOVERABLE_ERROR,
        Self::DEPRECATED,
        Self::USER_DEPRECATED,
    ];

    /// Wrap a raw code as reported by the runtime.
    pub const fn from_code(code: u32) -> Self {
        Self(code)
    }

    /// Raw numeric code.
    pub const fn code(self) -> u32 {
        self.0
    }

    /// Canonical name, or `None` for codes outside the known set.
    pub fn known_name(self) -> Option<&'static str> {
        let name = match self {
            Self::ERROR => "ERROR",
            Self::WARNING => "WARNING",
            Self::PARSE => "PARSE",
            Self::NOTICE => "NOTICE",
            Self::CORE_ERROR => "CORE_ERROR",
            Self::CORE_WARNING => "CORE_WARNING",
            Self::COMPILE_ERROR => "COMPILE_ERROR",
            Self::COMPILE_WARNING => "COMPILE_WARNING",
            Self::USER_ERROR => "USER_ERROR",
            Self::USER_WARNING => "USER_WARNING",
            Self::USER_NOTICE => "USER_NOTICE",
            Self::STRICT => "STRICT",
            Self::RECOVERABLE_ERROR => "RECOVERABLE_ERROR",
            Self::DEPRECATED => "DEPRECATED",
            Self::USER_DEPRECATED => "USER_DEPRECATED",
            _ => return None,
        };
        Some(name)
    }

    /// Canonical name; unknown codes render as `UNKNOWN_<code>`.
    pub fn name(self) -> String {
        match self.known_name() {
            Some(name) => name.to_owned(),
            None => format!("UNKNOWN_{}", self.0),
        }
    }

    /// Look up a severity by its canonical name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|severity| severity.known_name() == Some(wanted.as_str()))
    }

    /// Whether the runtime can never deliver this severity to a fault
    /// callback.
    ///
    /// Faults of these classes abort the unit of work before any callback
    /// runs, so only the shutdown monitor ever sees them.
    pub fn is_uncatchable(self) -> bool {
        matches!(
            self,
            Self::ERROR
                | Self::CORE_ERROR
                | Self::COMPILE_ERROR
                | Self::COMPILE_WARNING
                | Self::CORE_WARNING
                | Self::STRICT
                | Self::PARSE
        )
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known_name() {
            Some(name) => f.write_str(name),
            None => write!(f, "UNKNOWN_{}", self.0),
        }
    }
}

/// Bitmask of severities that should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeverityMask(u32);

impl SeverityMask {
    /// Report nothing.
    pub const NONE: Self = Self(0);
    /// Report every known severity.
    pub const ALL: Self = Self(0x7fff);

    /// Build a mask from raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Mask with one more severity enabled.
    #[must_use]
    pub const fn with(self, severity: Severity) -> Self {
        Self(self.0 | severity.code())
    }

    /// Mask with one severity removed.
    #[must_use]
    pub const fn without(self, severity: Severity) -> Self {
        Self(self.0 & !severity.code())
    }

    /// Whether any bit of `severity` is enabled in this mask.
    pub const fn contains(self, severity: Severity) -> bool {
        self.0 & severity.code() != 0
    }

    /// Parse a list of severity names. `"ALL"` expands to every severity.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unknown entry.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> anyhow::Result<Self> {
        names.iter().try_fold(Self::NONE, |mask, name| {
            let name = name.as_ref();
            if name.trim().eq_ignore_ascii_case("ALL") {
                return Ok(Self(mask.0 | Self::ALL.0));
            }
            Severity::from_name(name)
                .map(|severity| mask.with(severity))
                .ok_or_else(|| anyhow::anyhow!("unknown severity name: {name}"))
        })
    }

    /// Describe the mask one bit at a time, in bit order.
    ///
    /// Each of the 15 positions renders as the enabled severity's name, or
    /// `UNKNOWN_0` when the bit is clear, so the output always has the same
    /// shape and can be compared across processes.
    pub fn describe(self) -> String {
        Severity::ALL
            .iter()
            .map(|severity| Severity::from_code(self.0 & severity.code()).name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Names of the enabled severities only.
    pub fn enabled_names(self) -> Vec<&'static str> {
        Severity::ALL
            .into_iter()
            .filter(|severity| self.contains(*severity))
            .filter_map(Severity::known_name)
            .collect()
    }
}
