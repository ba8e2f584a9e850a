//! Turns reportable runtime faults into exceptions.

use std::sync::Arc;

use tracing::trace;

use crate::exception::UnifiedException;
use crate::runtime::{FaultRuntime, RawFault};

/// Outcome of a fault that did not become an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDisposition {
    /// The severity is outside the reporting mask. The fault is dropped and
    /// the runtime must not apply its own default handling.
    Suppressed,
}

/// Fault callback body.
///
/// Only catchable severities ever reach here; the undeliverable classes are
/// left on the runtime for the shutdown monitor.
#[derive(Debug, Clone)]
pub struct FaultNormalizer {
    runtime: Arc<FaultRuntime>,
}

impl FaultNormalizer {
    /// Normalizer reading the reporting mask from `runtime`.
    pub fn new(runtime: Arc<FaultRuntime>) -> Self {
        Self { runtime }
    }

    /// Decide what happens to one raw fault.
    ///
    /// # Errors
    ///
    /// Returns the fault as a permanent [`UnifiedException`] when its
    /// severity is in the current reporting mask. The caller raises it.
    pub fn on_fault(&self, fault: RawFault) -> Result<FaultDisposition, UnifiedException> {
        if !self.runtime.reporting_mask().contains(fault.severity) {
            trace!(severity = %fault.severity, "fault below reporting threshold");
            return Ok(FaultDisposition::Suppressed);
        }
        Err(UnifiedException::from_fault(
            fault.severity,
            fault.message,
            fault.location,
        ))
    }
}
