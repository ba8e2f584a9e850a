//! The assembled pipeline and its registration points.
//!
//! A host builds one [`Faultline`] at startup, calls [`Faultline::install`]
//! to register the panic hook, keeps a [`ShutdownGuard`] alive for the rest
//! of `main`, reports runtime faults through [`Faultline::fault`] and runs
//! request work inside [`Faultline::run`].

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use tracing::{debug, info};

use crate::config::{debug_mode, FaultlineConfig, Secrets};
use crate::dispatcher::{AlertDispatcher, AlertOptions, RequestContext, SenderIdentity};
use crate::exception::UnifiedException;
use crate::guard;
use crate::handler::{CgiFailurePage, ExceptionHandler, FailurePage};
use crate::limiter::{FileRateLimiter, RateLimiter};
use crate::mail::{MailTransport, SendmailTransport};
use crate::normalizer::FaultNormalizer;
use crate::runtime::{FaultRuntime, RawFault};
use crate::session::LogSession;
use crate::severity::SeverityMask;
use crate::shutdown::{ShutdownGuard, ShutdownMonitor};

/// Assembles a [`Faultline`]. Collaborators not supplied get the defaults:
/// marker files under `<log_dir>/.ratelimiter`, `sendmail` and a CGI page on
/// stdout.
pub struct FaultlineBuilder {
    log_dir: PathBuf,
    recipient: Option<String>,
    debug: bool,
    mask: SeverityMask,
    context: RequestContext,
    identity: Option<SenderIdentity>,
    limiter: Option<Arc<dyn RateLimiter>>,
    transport: Option<Arc<dyn MailTransport>>,
    page: Option<Arc<dyn FailurePage>>,
}

impl FaultlineBuilder {
    /// Start from a log directory with everything else defaulted.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            recipient: None,
            debug: false,
            mask: SeverityMask::ALL,
            context: RequestContext::default(),
            identity: None,
            limiter: None,
            transport: None,
            page: None,
        }
    }

    /// Maintainer address.
    #[must_use]
    pub fn recipient(mut self, recipient: Option<String>) -> Self {
        self.recipient = recipient;
        self
    }

    /// Show exception messages on the failure page.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Initial reporting mask.
    #[must_use]
    pub fn mask(mut self, mask: SeverityMask) -> Self {
        self.mask = mask;
        self
    }

    /// Request being served.
    #[must_use]
    pub fn context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Sender identity for the `From` header.
    #[must_use]
    pub fn identity(mut self, identity: SenderIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Alert rate limiter.
    #[must_use]
    pub fn limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Mail transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Failure page renderer.
    #[must_use]
    pub fn page(mut self, page: Arc<dyn FailurePage>) -> Self {
        self.page = Some(page);
        self
    }

    /// Wire the components together.
    pub fn build(self) -> Faultline {
        let runtime = Arc::new(FaultRuntime::new(self.mask));

        let mut startup = vec![process_line()];
        startup.extend(self.context.request_line());
        let session = Arc::new(LogSession::new(&self.log_dir).with_startup_lines(startup));

        let limiter: Arc<dyn RateLimiter> = match self.limiter {
            Some(limiter) => limiter,
            None => Arc::new(FileRateLimiter::new(self.log_dir.join(".ratelimiter"))),
        };
        let transport: Arc<dyn MailTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(SendmailTransport::default()),
        };
        let page: Arc<dyn FailurePage> = match self.page {
            Some(page) => page,
            None => Arc::new(CgiFailurePage::stdout()),
        };

        let mut dispatcher = AlertDispatcher::new(
            self.recipient,
            limiter,
            transport,
            Arc::clone(&session),
        )
        .with_context(self.context);
        if let Some(identity) = self.identity {
            dispatcher = dispatcher.with_identity(identity);
        }
        let dispatcher = Arc::new(dispatcher);

        // Weak: the dispatcher already holds the session.
        let notify: Weak<AlertDispatcher> = Arc::downgrade(&dispatcher);
        session.on_disabled(Box::new(move |notice: &str| {
            if let Some(dispatcher) = notify.upgrade() {
                dispatcher.send(notice, &AlertOptions::default());
            }
        }));

        let handler = Arc::new(ExceptionHandler::new(
            page,
            Arc::clone(&session),
            Arc::clone(&dispatcher),
            self.debug,
        ));
        let monitor = Arc::new(ShutdownMonitor::new(
            Arc::clone(&runtime),
            Arc::clone(&handler),
            Arc::clone(&session),
        ));

        Faultline {
            normalizer: FaultNormalizer::new(Arc::clone(&runtime)),
            runtime,
            session,
            dispatcher,
            handler,
            monitor,
        }
    }
}

/// The failure-interception pipeline for one process.
pub struct Faultline {
    runtime: Arc<FaultRuntime>,
    session: Arc<LogSession>,
    dispatcher: Arc<AlertDispatcher>,
    normalizer: FaultNormalizer,
    handler: Arc<ExceptionHandler>,
    monitor: Arc<ShutdownMonitor>,
}

impl Faultline {
    /// Builder starting from `log_dir`.
    pub fn builder(log_dir: impl Into<PathBuf>) -> FaultlineBuilder {
        FaultlineBuilder::new(log_dir)
    }

    /// Pipeline with the default collaborators, configured from files.
    ///
    /// # Errors
    ///
    /// Returns an error if the reporting mask in `config` is invalid.
    pub fn from_config(
        config: &FaultlineConfig,
        secrets: &Secrets,
        mut context: RequestContext,
    ) -> anyhow::Result<Self> {
        let mask = config.reporting.severity_mask()?;
        if context.server_name.is_none() {
            context.server_name.clone_from(&config.mail.server_name);
        }

        let limiter = FileRateLimiter::new(config.paths.rate_limit_dir())
            .with_max_alerts(config.rate_limit.max_alerts)
            .with_window(config.rate_limit.window());
        let recipient = secrets
            .mail_devs
            .clone()
            .or_else(|| config.mail.recipient.clone());

        Ok(Self::builder(&config.paths.log_dir)
            .recipient(recipient)
            .debug(debug_mode(config, secrets))
            .mask(mask)
            .context(context)
            .limiter(Arc::new(limiter))
            .transport(Arc::new(SendmailTransport::new(&config.mail.sendmail_path)))
            .build())
    }

    /// Register the panic hook for this pipeline.
    ///
    /// Call once, early in `main`.
    pub fn install(&self) {
        guard::install_panic_hook(Arc::clone(&self.runtime));
        debug!("panic hook installed");
    }

    /// Guard that runs the shutdown monitor when dropped.
    pub fn shutdown_guard(&self) -> ShutdownGuard {
        ShutdownGuard::new(Arc::clone(&self.monitor))
    }

    /// Report a runtime fault.
    ///
    /// Undeliverable severities are recorded as the runtime's last fault and
    /// left for the shutdown monitor. The rest go through the normalizer and
    /// are recorded only when the reporting mask covers them.
    ///
    /// # Errors
    ///
    /// Returns the normalized exception when the severity is reportable.
    pub fn fault(&self, fault: RawFault) -> Result<(), UnifiedException> {
        if fault.severity.is_uncatchable() {
            info!(severity = %fault.severity, "undeliverable fault recorded");
            self.runtime.record(fault);
            return Ok(());
        }
        if self.runtime.reporting_mask().contains(fault.severity) {
            self.runtime.record(fault.clone());
        }
        self.normalizer.on_fault(fault).map(|_| ())
    }

    /// Run request work. An `Err` or panic escaping `f` is uncaught: it goes
    /// to the exception handler and `None` is returned.
    pub fn run<T>(&self, f: impl FnOnce() -> Result<T, UnifiedException>) -> Option<T> {
        match guard::contain(f) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(exception)) => {
                self.handler.handle(&exception);
                None
            }
            Err(panic) => {
                self.handler.handle(&panic.into_exception());
                None
            }
        }
    }

    /// Hand an exception straight to the handler.
    pub fn report(&self, exception: &UnifiedException) {
        self.handler.handle(exception);
    }

    /// Send a free-form report to the maintainers.
    pub fn alert(&self, report: &str, options: &AlertOptions) -> bool {
        self.dispatcher.send(report, options)
    }

    /// Fault-reporting state.
    pub fn runtime(&self) -> &Arc<FaultRuntime> {
        &self.runtime
    }

    /// Session log.
    pub fn session(&self) -> &Arc<LogSession> {
        &self.session
    }

    /// Alert dispatcher.
    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.dispatcher
    }

    /// Shutdown monitor, for hosts that exit without a guard.
    pub fn monitor(&self) -> &Arc<ShutdownMonitor> {
        &self.monitor
    }
}

fn process_line() -> String {
    let exe = std::env::current_exe()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|_| "<unknown>".to_owned());
    format!("Process: {exe} (pid {})", std::process::id())
}
