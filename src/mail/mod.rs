//! Alert mail messages and the transport seam.

pub mod encode;
pub mod sendmail;

pub use sendmail::SendmailTransport;

/// Errors surfaced by a mail transport.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// The transport program could not be started.
    #[error("failed to start mail transport {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The message could not be handed to the transport.
    #[error("failed to hand message to mail transport: {0}")]
    Write(#[source] std::io::Error),

    /// The transport ran but reported failure.
    #[error("mail transport exited with {status}: {stderr}")]
    Rejected {
        /// Exit status as rendered by the OS.
        status: String,
        /// Whatever the transport printed to stderr.
        stderr: String,
    },

    /// The message is not deliverable as built.
    #[error("invalid message: {0}")]
    Invalid(String),
}

/// A fully formed alert, ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    /// Destination address.
    pub recipient: String,
    /// Subject line.
    pub subject: String,
    /// Encoded HTML body.
    pub body: String,
    /// Extra headers, in the order they should be emitted.
    pub headers: Vec<(String, String)>,
}

impl AlertMessage {
    /// Start a message with no headers.
    pub fn new(recipient: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            subject: single_line(&subject.into()),
            body: body.into(),
            headers: Vec::new(),
        }
    }

    /// Append a header. Line breaks in the value are flattened to spaces.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), single_line(value)));
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Render the message as RFC 5322 text with CRLF line endings.
    pub fn to_rfc5322(&self) -> String {
        let mut out = format!("To: {}\r\nSubject: {}\r\n", self.recipient, self.subject);
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out.push_str("\r\n");
        out
    }
}

/// Hands finished messages to the outside world.
pub trait MailTransport: Send + Sync {
    /// Deliver one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message was not accepted for delivery.
    fn send(&self, message: &AlertMessage) -> Result<(), MailError>;
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}
