//! Process-wide fault-reporting state owned by the hosting runtime.
//!
//! Holds the reporting mask and the "last fault" slot. The fault normalizer
//! reads the mask; the shutdown monitor reads the last fault; the panic hook
//! and hosts write to it when a fault could not be delivered anywhere else.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use tracing::trace;

use crate::exception::SourceLocation;
use crate::severity::{Severity, SeverityMask};

/// A runtime-detected abnormal condition, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFault {
    /// Severity code reported by the runtime.
    pub severity: Severity,
    /// Runtime-supplied description.
    pub message: String,
    /// Where the runtime attributed the fault.
    pub location: SourceLocation,
}

impl RawFault {
    /// Build a fault from its four reported parts.
    pub fn new(
        severity: Severity,
        message: impl Into<String>,
        file: impl Into<String>,
        line: u32,
    ) -> Self {
        Self {
            severity,
            message: message.into(),
            location: SourceLocation::new(file, line),
        }
    }
}

/// Reporting mask plus last-fault slot.
#[derive(Debug)]
pub struct FaultRuntime {
    mask: AtomicU32,
    last_fault: Mutex<Option<RawFault>>,
}

impl FaultRuntime {
    /// Create runtime state reporting the given severities.
    pub fn new(mask: SeverityMask) -> Self {
        Self {
            mask: AtomicU32::new(mask.bits()),
            last_fault: Mutex::new(None),
        }
    }

    /// Severities currently reported.
    pub fn reporting_mask(&self) -> SeverityMask {
        SeverityMask::from_bits(self.mask.load(Ordering::Relaxed))
    }

    /// Change the reporting mask, returning the previous one.
    pub fn set_reporting_mask(&self, mask: SeverityMask) -> SeverityMask {
        SeverityMask::from_bits(self.mask.swap(mask.bits(), Ordering::Relaxed))
    }

    /// Remember a fault that no handler consumed.
    ///
    /// Only the most recent one is kept, except that a pending undeliverable
    /// fault is never replaced: the shutdown monitor must still see it.
    pub fn record(&self, fault: RawFault) {
        let mut slot = self
            .last_fault
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(pending) = slot.as_ref() {
            if pending.severity.is_uncatchable() {
                trace!(
                    pending = %pending.severity,
                    ignored = %fault.severity,
                    "undeliverable fault already pending"
                );
                return;
            }
        }
        *slot = Some(fault);
    }

    /// The most recent unconsumed fault, if any.
    pub fn last_fault(&self) -> Option<RawFault> {
        self.last_fault
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Forget the recorded fault.
    pub fn clear_last_fault(&self) {
        let mut slot = self
            .last_fault
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = None;
    }
}

impl Default for FaultRuntime {
    fn default() -> Self {
        Self::new(SeverityMask::ALL)
    }
}
