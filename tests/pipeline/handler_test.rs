//! Exception handler steps and their independence.

use std::path::Path;
use std::sync::Arc;

use faultline::dispatcher::AlertDispatcher;
use faultline::exception::{Category, SourceLocation, UnifiedException};
use faultline::handler::{ExceptionHandler, FailurePage};
use faultline::session::LogSession;
use faultline::severity::Severity;

use crate::doubles::{
    identity, read_session, session_files, CountingLimiter, PanickingPage, RecordingPage,
    RecordingTransport,
};

fn handler(
    log_dir: &Path,
    page: Arc<dyn FailurePage>,
    transport: Arc<RecordingTransport>,
    debug: bool,
) -> ExceptionHandler {
    let session = Arc::new(LogSession::new(log_dir));
    let dispatcher = AlertDispatcher::new(
        Some("ops@example.com".to_owned()),
        Arc::new(CountingLimiter::allowing()),
        transport,
        Arc::clone(&session),
    )
    .with_identity(identity());
    ExceptionHandler::new(page, session, Arc::new(dispatcher), debug)
}

fn fault_exception() -> UnifiedException {
    UnifiedException::from_fault(
        Severity::WARNING,
        "division by zero",
        SourceLocation::new("calc.x", 42),
    )
}

#[test]
fn renders_page_logs_once_and_alerts_once() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let page = Arc::new(RecordingPage::new());
    let transport = Arc::new(RecordingTransport::new());

    handler(tmp.path(), page.clone(), transport.clone(), false).handle(&fault_exception());

    assert_eq!(page.discards(), 1);
    assert_eq!(page.renders(), vec![(Category::Permanent, String::new())]);

    let log = read_session(tmp.path());
    assert_eq!(log.matches("Uncaught exception:").count(), 1);
    assert!(log.contains("Message: division by zero"));
    assert!(log.contains("File: calc.x"));
    assert!(log.contains("Line: 42"));
    assert!(log.contains("Severity: WARNING"));

    assert_eq!(transport.count(), 1);
    let body = transport.messages()[0].body.replace("=\r\n", "");
    assert!(body.contains("I took exception to something and it wasn't caught"));
}

#[test]
fn debug_mode_shows_message_on_page() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let page = Arc::new(RecordingPage::new());

    let exception = UnifiedException::new(Category::User, "quantity must be positive");
    handler(tmp.path(), page.clone(), Arc::new(RecordingTransport::new()), true).handle(&exception);

    assert_eq!(
        page.renders(),
        vec![(Category::User, "quantity must be positive".to_owned())]
    );
}

#[test]
fn panicking_page_does_not_stop_logging_or_alerting() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let transport = Arc::new(RecordingTransport::new());

    handler(tmp.path(), Arc::new(PanickingPage), transport.clone(), false)
        .handle(&fault_exception());

    assert_eq!(read_session(tmp.path()).matches("Uncaught exception:").count(), 1);
    assert_eq!(transport.count(), 1);
}

#[test]
fn broken_log_directory_does_not_stop_page_or_alert() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let missing = tmp.path().join("gone");
    let page = Arc::new(RecordingPage::new());
    let transport = Arc::new(RecordingTransport::new());

    handler(&missing, page.clone(), transport.clone(), false).handle(&fault_exception());

    assert_eq!(page.renders().len(), 1);
    assert_eq!(transport.count(), 1);
    assert!(session_files(tmp.path()).is_empty());
}
