//! Shutdown monitor decisions.

use std::path::Path;
use std::sync::Arc;

use faultline::dispatcher::AlertDispatcher;
use faultline::exception::Category;
use faultline::handler::{ExceptionHandler, FailurePage};
use faultline::runtime::{FaultRuntime, RawFault};
use faultline::session::LogSession;
use faultline::severity::{Severity, SeverityMask};
use faultline::shutdown::{ShutdownMonitor, ShutdownOutcome, FATAL_EXIT_CODE};

use crate::doubles::{
    identity, read_session, session_files, CountingLimiter, PanickingPage, RecordingPage,
    RecordingTransport,
};

struct Harness {
    runtime: Arc<FaultRuntime>,
    session: Arc<LogSession>,
    transport: Arc<RecordingTransport>,
    monitor: ShutdownMonitor,
}

fn harness(log_dir: &Path, page: Arc<dyn FailurePage>) -> Harness {
    let runtime = Arc::new(FaultRuntime::new(SeverityMask::ALL));
    let session = Arc::new(LogSession::new(log_dir));
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = AlertDispatcher::new(
        Some("ops@example.com".to_owned()),
        Arc::new(CountingLimiter::allowing()),
        transport.clone(),
        Arc::clone(&session),
    )
    .with_identity(identity());
    let handler = Arc::new(ExceptionHandler::new(
        page,
        Arc::clone(&session),
        Arc::new(dispatcher),
        false,
    ));
    let monitor = ShutdownMonitor::new(Arc::clone(&runtime), handler, Arc::clone(&session));
    Harness {
        runtime,
        session,
        transport,
        monitor,
    }
}

#[test]
fn no_last_fault_is_a_no_op() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let page = Arc::new(RecordingPage::new());
    let h = harness(tmp.path(), page.clone());

    assert_eq!(h.monitor.run(), ShutdownOutcome::Continue);
    assert!(page.renders().is_empty());
    assert_eq!(h.transport.count(), 0);
    assert!(session_files(tmp.path()).is_empty());
}

#[test]
fn fatal_fault_is_handled_and_forces_exit() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let page = Arc::new(RecordingPage::new());
    let h = harness(tmp.path(), page.clone());
    h.runtime.record(RawFault::new(
        Severity::ERROR,
        "Allowed memory size exhausted",
        "report.x",
        311,
    ));

    assert_eq!(h.monitor.run(), ShutdownOutcome::Exit(FATAL_EXIT_CODE));
    assert_eq!(page.renders(), vec![(Category::Permanent, String::new())]);
    assert_eq!(h.transport.count(), 1);

    let log = read_session(tmp.path());
    assert!(log.contains("Severity: ERROR"));
    assert!(log.contains("File: report.x"));
    assert!(log.trim_end().ends_with("Shutting down"));
}

#[test]
fn every_undeliverable_class_forces_exit() {
    for severity in [
        Severity::ERROR,
        Severity::CORE_ERROR,
        Severity::COMPILE_ERROR,
        Severity::COMPILE_WARNING,
        Severity::CORE_WARNING,
        Severity::STRICT,
        Severity::PARSE,
    ] {
        let tmp = tempfile::tempdir().expect("temp dir");
        let h = harness(tmp.path(), Arc::new(RecordingPage::new()));
        h.runtime.record(RawFault::new(severity, "fatal", "boot.x", 1));
        assert_eq!(
            h.monitor.run(),
            ShutdownOutcome::Exit(FATAL_EXIT_CODE),
            "{severity} should force exit"
        );
    }
}

#[test]
fn catchable_last_fault_only_logs_shutdown() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let page = Arc::new(RecordingPage::new());
    let h = harness(tmp.path(), page.clone());
    assert!(h.session.write("request finished"));
    h.runtime.record(RawFault::new(Severity::WARNING, "handled earlier", "a.x", 2));

    assert_eq!(h.monitor.run(), ShutdownOutcome::Continue);
    assert!(page.renders().is_empty());
    assert_eq!(h.transport.count(), 0);
    assert!(read_session(tmp.path()).trim_end().ends_with("Shutting down"));
}

#[test]
fn catchable_last_fault_without_session_stays_silent() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let h = harness(tmp.path(), Arc::new(RecordingPage::new()));
    h.runtime.record(RawFault::new(Severity::NOTICE, "minor", "a.x", 2));

    assert_eq!(h.monitor.run(), ShutdownOutcome::Continue);
    assert!(session_files(tmp.path()).is_empty());
}

#[test]
fn failing_collaborators_do_not_prevent_exit() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let h = harness(&tmp.path().join("missing"), Arc::new(PanickingPage));
    h.runtime.record(RawFault::new(Severity::PARSE, "syntax error", "page.x", 9));

    assert_eq!(h.monitor.run(), ShutdownOutcome::Exit(FATAL_EXIT_CODE));
    assert_eq!(h.transport.count(), 1);
}
