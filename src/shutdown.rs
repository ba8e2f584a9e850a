//! Last-resort inspection at process end.
//!
//! Faults of the undeliverable classes never reach the normalizer; they are
//! left on the [`FaultRuntime`] (by the host, or by the panic hook for
//! uncontained panics) and picked up here.

use std::sync::Arc;

use tracing::{error, info};

use crate::exception::UnifiedException;
use crate::guard;
use crate::handler::ExceptionHandler;
use crate::logging::LoggingGuard;
use crate::runtime::FaultRuntime;
use crate::session::LogSession;

/// Exit status forced after an undeliverable fault.
pub const FATAL_EXIT_CODE: i32 = 1;

/// What the process should do after the monitor ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Keep whatever exit status the process already has.
    Continue,
    /// Force exit with this status.
    Exit(i32),
}

/// Post-mortem check of the last recorded fault.
pub struct ShutdownMonitor {
    runtime: Arc<FaultRuntime>,
    handler: Arc<ExceptionHandler>,
    session: Arc<LogSession>,
}

impl ShutdownMonitor {
    /// Monitor reading `runtime` and reporting through `handler`.
    pub fn new(
        runtime: Arc<FaultRuntime>,
        handler: Arc<ExceptionHandler>,
        session: Arc<LogSession>,
    ) -> Self {
        Self {
            runtime,
            handler,
            session,
        }
    }

    /// Inspect the last fault and route it to the handler if nothing else
    /// could have. Never panics.
    pub fn run(&self) -> ShutdownOutcome {
        match guard::contain(|| self.inspect()) {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!(panic = %panic.message, "shutdown monitor panicked");
                // A fatal fault may still be pending; do not report success.
                match self.runtime.last_fault() {
                    Some(fault) if fault.severity.is_uncatchable() => {
                        ShutdownOutcome::Exit(FATAL_EXIT_CODE)
                    }
                    _ => ShutdownOutcome::Continue,
                }
            }
        }
    }

    fn inspect(&self) -> ShutdownOutcome {
        let Some(fault) = self.runtime.last_fault() else {
            return ShutdownOutcome::Continue;
        };

        if !fault.severity.is_uncatchable() {
            self.log_shutdown();
            return ShutdownOutcome::Continue;
        }

        info!(severity = %fault.severity, "undeliverable fault at shutdown");
        let exception =
            UnifiedException::from_fault(fault.severity, fault.message, fault.location);
        self.handler.handle(&exception);
        self.log_shutdown();
        ShutdownOutcome::Exit(FATAL_EXIT_CODE)
    }

    fn log_shutdown(&self) {
        if self.session.is_active() {
            self.session.write("Shutting down");
        }
    }
}

/// Runs the [`ShutdownMonitor`] when dropped.
///
/// Keep it alive for the whole of `main`; it is dropped on return and while
/// unwinding from an uncontained panic. A forced exit skips every destructor
/// still pending, so anything that must flush (the [`LoggingGuard`] in
/// particular) has to be handed to [`ShutdownGuard::with_logging`] or
/// created before this guard.
pub struct ShutdownGuard {
    monitor: Arc<ShutdownMonitor>,
    logging: Option<LoggingGuard>,
}

impl ShutdownGuard {
    /// Guard for `monitor`.
    pub fn new(monitor: Arc<ShutdownMonitor>) -> Self {
        Self {
            monitor,
            logging: None,
        }
    }

    /// Flush and release `logging` after the monitor ran, before any exit.
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingGuard) -> Self {
        self.logging = Some(logging);
        self
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let outcome = self.monitor.run();
        drop(self.logging.take());
        if let ShutdownOutcome::Exit(code) = outcome {
            std::process::exit(code);
        }
    }
}
