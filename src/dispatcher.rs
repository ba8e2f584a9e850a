//! Builds and sends the maintainer alert mail.
//!
//! A send is refused up front when no recipient is configured or the report
//! is empty, then (unless bypassed) the rate limiter is consulted, and only
//! then is a message assembled and handed to the transport. Every failure is
//! written to the log session and reported as `false`; nothing here returns
//! an error or panics into the caller.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::guard;
use crate::limiter::{LimiterError, RateLimiter};
use crate::mail::encode::{encode_header_word, html_escape, quoted_printable, text_to_html, to_crlf};
use crate::mail::{AlertMessage, MailTransport};
use crate::session::LogSession;

/// Subject used when the caller gives no reason.
pub const DEFAULT_REASON: &str = "There was a problem";

static NAMED_ADDRESS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*<([^<>]*)>$").ok());

/// Per-send switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertOptions {
    /// Consult the rate limiter before sending.
    pub rate_limited: bool,
    /// The report is already HTML and must not be escaped.
    pub html: bool,
    /// Subject line.
    pub reason: String,
    /// Value for `Reply-To`, either `Name <addr>` or a bare address.
    pub reply_to: Option<String>,
}

impl Default for AlertOptions {
    fn default() -> Self {
        Self {
            rate_limited: true,
            html: false,
            reason: DEFAULT_REASON.to_owned(),
            reply_to: None,
        }
    }
}

impl AlertOptions {
    /// Options with the rate limiter bypassed.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            rate_limited: false,
            ..Self::default()
        }
    }

    /// Replace the subject line.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set the `Reply-To` value.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Mark the report as HTML.
    #[must_use]
    pub fn html(mut self) -> Self {
        self.html = true;
        self
    }
}

/// What the alert says about the request being served.
///
/// Read from the CGI environment by [`RequestContext::from_env`]; every
/// field is optional because a failure can happen outside any request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Visitor address.
    pub remote_addr: Option<String>,
    /// Visitor host name, when the server resolved it.
    pub remote_host: Option<String>,
    /// Virtual host being served.
    pub server_name: Option<String>,
    /// Program or script handling the request.
    pub handler: Option<String>,
    /// HTTP method.
    pub method: Option<String>,
    /// Requested URI.
    pub uri: Option<String>,
    /// Web server product string.
    pub server_software: Option<String>,
}

impl RequestContext {
    /// Read the standard CGI variables from the process environment.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|value| !value.is_empty());
        Self {
            remote_addr: var("REMOTE_ADDR"),
            remote_host: var("REMOTE_HOST"),
            server_name: var("SERVER_NAME"),
            handler: var("SCRIPT_NAME").or_else(current_exe_name),
            method: var("REQUEST_METHOD"),
            uri: var("REQUEST_URI"),
            server_software: var("SERVER_SOFTWARE"),
        }
    }

    /// `REQUEST: <METHOD> <URI>` when both are known.
    pub fn request_line(&self) -> Option<String> {
        match (&self.method, &self.uri) {
            (Some(method), Some(uri)) => Some(format!("REQUEST: {method} {uri}")),
            _ => None,
        }
    }
}

/// Local identity used for the `From` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    /// Effective user name.
    pub user: String,
    /// Machine host name.
    pub host: String,
}

impl SenderIdentity {
    /// Best-effort detection from the environment and `/etc/hostname`.
    pub fn detect() -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .ok()
            .filter(|user| !user.is_empty())
            .unwrap_or_else(|| "nobody".to_owned());
        Self {
            user,
            host: host_name(),
        }
    }
}

/// Sends maintainer alerts.
pub struct AlertDispatcher {
    recipient: Option<String>,
    limiter: Arc<dyn RateLimiter>,
    transport: Arc<dyn MailTransport>,
    session: Arc<LogSession>,
    context: RequestContext,
    identity: SenderIdentity,
}

impl AlertDispatcher {
    /// Create a dispatcher with an empty request context.
    pub fn new(
        recipient: Option<String>,
        limiter: Arc<dyn RateLimiter>,
        transport: Arc<dyn MailTransport>,
        session: Arc<LogSession>,
    ) -> Self {
        Self {
            recipient,
            limiter,
            transport,
            session,
            context: RequestContext::default(),
            identity: SenderIdentity::detect(),
        }
    }

    /// Attach the request being served.
    #[must_use]
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Override the sender identity.
    #[must_use]
    pub fn with_identity(mut self, identity: SenderIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Send `report` to the maintainers. Returns `true` only when the
    /// transport accepted the message.
    pub fn send(&self, report: &str, options: &AlertOptions) -> bool {
        let Some(recipient) = self
            .recipient
            .as_deref()
            .map(str::trim)
            .filter(|recipient| !recipient.is_empty())
        else {
            self.session
                .write("ERROR: alert requested but no maintainer address is configured");
            return false;
        };

        if report.trim().is_empty() {
            self.session.write("ERROR: alert requested with an empty report");
            return false;
        }

        if options.rate_limited && !self.acquire_slot() {
            return false;
        }

        let message = self.build_message(recipient, report, options);
        match guard::contain(|| self.transport.send(&message)) {
            Ok(Ok(())) => {
                debug!(subject = %message.subject, "alert sent");
                true
            }
            Ok(Err(e)) => {
                self.session
                    .write(&format!("WARNING: mail transport failed: {e}"));
                false
            }
            Err(panic) => {
                self.session.write(&format!(
                    "WARNING: mail transport panicked: {}",
                    panic.message
                ));
                false
            }
        }
    }

    /// Assemble the message without sending it.
    pub fn build_message(&self, recipient: &str, report: &str, options: &AlertOptions) -> AlertMessage {
        let report_html = if options.html {
            report.to_owned()
        } else {
            text_to_html(report)
        };
        let body = quoted_printable(&to_crlf(&self.render_body(&report_html)));

        let server_name = self.server_name();
        let mut message = AlertMessage::new(recipient, options.reason.as_str(), body)
            .with_header("MIME-Version", "1.0")
            .with_header("Content-Type", "text/html; charset=UTF-8")
            .with_header("Content-Transfer-Encoding", "quoted-printable")
            .with_header(
                "From",
                &format!(
                    "{server_name} <{}@{}>",
                    self.identity.user, self.identity.host
                ),
            );

        if let Some(reply_to) = options
            .reply_to
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            message = message.with_header("Reply-To", &format_reply_to(reply_to));
        }
        message
    }

    fn acquire_slot(&self) -> bool {
        match guard::contain(|| self.limiter.acquire()) {
            Ok(Ok(())) => true,
            Ok(Err(e @ LimiterError::Exhausted { .. })) => {
                self.session
                    .write(&format!("Not emailing maintainers: {e}"));
                false
            }
            Ok(Err(e)) => {
                self.session.write(&format!("ERROR: {e}"));
                false
            }
            Err(panic) => {
                warn!(message = %panic.message, "rate limiter panicked");
                self.session
                    .write(&format!("ERROR: rate limiter panicked: {}", panic.message));
                false
            }
        }
    }

    fn server_name(&self) -> String {
        self.context
            .server_name
            .clone()
            .unwrap_or_else(|| self.identity.host.clone())
    }

    fn render_body(&self, report_html: &str) -> String {
        let ctx = &self.context;
        let unknown = || "unknown".to_owned();
        let remote_addr = ctx.remote_addr.clone().unwrap_or_else(unknown);
        // Only the web server's own lookup is used; none is done here.
        let remote_host = ctx.remote_host.clone().unwrap_or_else(|| remote_addr.clone());
        let handler = ctx.handler.clone().unwrap_or_else(unknown);
        let method = ctx.method.clone().unwrap_or_else(|| "(no)".to_owned());
        let uri = ctx.uri.clone().unwrap_or_else(unknown);
        let software = ctx.server_software.clone().unwrap_or_else(unknown);

        format!(
            r#"<html>
<head>
    <meta http-equiv="Content-Type" content="text/html; charset=UTF-8" />
    <meta charset="UTF-8" />
</head>
<body>
<p>Hi there,</p>

<p>Someone ({remote_addr} ({remote_host})) just visited {server}.</p>

<hr />
<div style="font-family: sans-serif">
{report_html}
</div>
<hr />

<p>
Handler: {handler}<br />
{method} request to: {uri}
</p>

<p>Cheers,<br />
faultline {version}<br />
on {software}</p>
</body>
</html>"#,
            remote_addr = html_escape(&remote_addr),
            remote_host = html_escape(&remote_host),
            server = html_escape(&self.server_name()),
            handler = html_escape(&handler),
            method = html_escape(&method),
            uri = html_escape(&uri),
            version = env!("CARGO_PKG_VERSION"),
            software = html_escape(&software),
        )
    }
}

/// Render a `Reply-To` value, Q-encoding the display name when needed.
///
/// Values that are not in `Name <addr>` form are passed through unchanged.
pub fn format_reply_to(value: &str) -> String {
    let captures = NAMED_ADDRESS
        .as_ref()
        .and_then(|regex| regex.captures(value));
    let Some(captures) = captures else {
        return value.to_owned();
    };

    let name = captures.get(1).map_or("", |m| m.as_str()).trim();
    let address = captures.get(2).map_or("", |m| m.as_str()).trim();
    if name.is_empty() {
        return format!("<{address}>");
    }
    format!("{} <{address}>", encode_header_word(name))
}

fn current_exe_name() -> Option<String> {
    std::env::current_exe()
        .ok()
        .map(|path| path.display().to_string())
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_owned())
}
