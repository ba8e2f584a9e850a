//! Terminal sink for exceptions nothing else caught.
//!
//! The three steps (failure page, session record, alert) run independently:
//! a panic or error in one is written to `tracing` and the next step still
//! runs.

use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::error;

use crate::dispatcher::{AlertDispatcher, AlertOptions};
use crate::exception::{Category, UnifiedException};
use crate::guard;
use crate::mail::encode::html_escape;
use crate::session::LogSession;

/// Produces the visitor-facing failure response.
pub trait FailurePage: Send + Sync {
    /// Drop any response output that was buffered but not yet sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer could not be discarded.
    fn discard_buffered(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Render the page for `category`. `detail` is empty outside debug mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the page could not be produced.
    fn render(&self, category: Category, detail: &str) -> anyhow::Result<()>;
}

/// Plain CGI `500` response written to an output stream.
pub struct CgiFailurePage {
    out: Mutex<Box<dyn Write + Send>>,
}

impl CgiFailurePage {
    /// Page written to `out`.
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Page written to standard output.
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl std::fmt::Debug for CgiFailurePage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CgiFailurePage").finish_non_exhaustive()
    }
}

impl FailurePage for CgiFailurePage {
    fn render(&self, category: Category, detail: &str) -> anyhow::Result<()> {
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        out.write_all(render_cgi_page(category, detail).as_bytes())
            .context("failed to write failure page")?;
        out.flush().context("failed to flush failure page")
    }
}

/// The full CGI response for a failure.
pub fn render_cgi_page(category: Category, detail: &str) -> String {
    let mut body = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Something went wrong</title></head>\n<body>\n\
         <h1>Something went wrong</h1>\n<p>{}</p>\n",
        category_wording(category)
    );
    if !detail.is_empty() {
        body.push_str(&format!("<pre>{}</pre>\n", html_escape(detail)));
    }
    body.push_str("</body>\n</html>\n");

    format!(
        "Status: 500 Internal Server Error\r\nContent-Type: text/html; charset=UTF-8\r\n\r\n{body}"
    )
}

/// Visitor-facing explanation for each category.
pub fn category_wording(category: Category) -> &'static str {
    match category {
        Category::User => "There was a problem with your request. Please check it and try again.",
        Category::Temporary => {
            "We are having a temporary problem. Please try again in a few minutes."
        }
        Category::Permanent => {
            "Something broke on our side. The maintainers have been told about it."
        }
        Category::ThirdParty => {
            "A service we depend on is not responding properly. Please try again later."
        }
    }
}

/// Reacts to an uncaught exception.
pub struct ExceptionHandler {
    page: Arc<dyn FailurePage>,
    session: Arc<LogSession>,
    dispatcher: Arc<AlertDispatcher>,
    debug: bool,
}

impl ExceptionHandler {
    /// Wire the handler to its collaborators. `debug` controls whether the
    /// exception message reaches the failure page.
    pub fn new(
        page: Arc<dyn FailurePage>,
        session: Arc<LogSession>,
        dispatcher: Arc<AlertDispatcher>,
        debug: bool,
    ) -> Self {
        Self {
            page,
            session,
            dispatcher,
            debug,
        }
    }

    /// Show the failure page, log the exception and alert the maintainers.
    pub fn handle(&self, exception: &UnifiedException) {
        let description = exception.describe();

        self.step("failure page", || {
            if let Err(e) = self.page.discard_buffered() {
                error!(error = %e, "failed to discard buffered output");
            }
            let detail = if self.debug { exception.message() } else { "" };
            self.page.render(exception.category(), detail)
        });

        self.step("session record", || {
            self.session
                .write(&format!("Uncaught exception:\n{description}"));
            Ok(())
        });

        self.step("alert", || {
            let report = format!(
                "I took exception to something and it wasn't caught:\n{description}"
            );
            self.dispatcher.send(&report, &AlertOptions::default());
            Ok(())
        });
    }

    fn step(&self, name: &str, f: impl FnOnce() -> anyhow::Result<()>) {
        match guard::contain(f) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(step = name, error = %format!("{e:#}"), "exception handler step failed"),
            Err(panic) => error!(step = name, panic = %panic.message, "exception handler step panicked"),
        }
    }
}
