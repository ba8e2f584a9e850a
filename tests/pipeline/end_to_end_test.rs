//! The assembled pipeline, driven the way a host drives it.

use std::path::Path;
use std::sync::Arc;

use faultline::dispatcher::{AlertOptions, RequestContext};
use faultline::exception::{Category, UnifiedException};
use faultline::limiter::FileRateLimiter;
use faultline::pipeline::Faultline;
use faultline::runtime::RawFault;
use faultline::severity::{Severity, SeverityMask};
use faultline::shutdown::ShutdownOutcome;

use crate::doubles::{
    identity, marker_count, read_session, seed_markers, session_files, CountingLimiter,
    RecordingPage, RecordingTransport,
};

struct Host {
    pipeline: Faultline,
    page: Arc<RecordingPage>,
    transport: Arc<RecordingTransport>,
}

fn host(log_dir: &Path, mask: SeverityMask) -> Host {
    let page = Arc::new(RecordingPage::new());
    let transport = Arc::new(RecordingTransport::new());
    let pipeline = Faultline::builder(log_dir)
        .recipient(Some("ops@example.com".to_owned()))
        .mask(mask)
        .identity(identity())
        .context(RequestContext {
            method: Some("POST".to_owned()),
            uri: Some("/calc".to_owned()),
            ..RequestContext::default()
        })
        .limiter(Arc::new(CountingLimiter::allowing()))
        .transport(transport.clone())
        .page(page.clone())
        .build();
    Host {
        pipeline,
        page,
        transport,
    }
}

#[test]
fn reported_warning_becomes_uncaught_exception() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let h = host(tmp.path(), SeverityMask::NONE.with(Severity::WARNING));

    let outcome = h.pipeline.run(|| {
        h.pipeline.fault(RawFault::new(
            Severity::WARNING,
            "division by zero",
            "calc.x",
            42,
        ))?;
        Ok(7)
    });

    assert_eq!(outcome, None);
    assert_eq!(h.page.renders(), vec![(Category::Permanent, String::new())]);
    assert_eq!(h.transport.count(), 1);

    let log = read_session(tmp.path());
    assert!(log.contains("Logging started"));
    assert!(log.contains("REQUEST: POST /calc"));
    assert_eq!(log.matches("Uncaught exception:").count(), 1);
    assert!(log.contains("Kind: FaultException"));
    assert!(log.contains("Severity: WARNING"));
    assert!(log.contains("Category: PERMANENT"));
    assert!(log.contains("File: calc.x"));
    assert!(log.contains("Line: 42"));
}

#[test]
fn raised_fault_can_be_caught_by_application_code() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let h = host(tmp.path(), SeverityMask::ALL);

    let outcome = h.pipeline.run(|| {
        let recovered = h
            .pipeline
            .fault(RawFault::new(Severity::NOTICE, "undefined index", "cart.x", 5))
            .map_err(|e| e.native_severity());
        assert_eq!(recovered, Err(Some(Severity::NOTICE)));
        Ok("rendered")
    });

    assert_eq!(outcome, Some("rendered"));
    assert!(h.page.renders().is_empty());
    assert_eq!(h.transport.count(), 0);
}

#[test]
fn masked_fault_is_suppressed_silently() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let h = host(tmp.path(), SeverityMask::ALL.without(Severity::DEPRECATED));

    let outcome = h.pipeline.run(|| {
        h.pipeline
            .fault(RawFault::new(Severity::DEPRECATED, "old api", "legacy.x", 3))?;
        Ok(())
    });

    assert_eq!(outcome, Some(()));
    assert!(h.page.renders().is_empty());
    assert_eq!(h.transport.count(), 0);
    assert!(session_files(tmp.path()).is_empty());
    assert_eq!(h.pipeline.runtime().last_fault(), None);
}

#[test]
fn application_exception_keeps_its_category() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let h = host(tmp.path(), SeverityMask::ALL);

    let outcome: Option<()> = h.pipeline.run(|| {
        Err(UnifiedException::new(
            Category::ThirdParty,
            "payment gateway timed out",
        ))
    });

    assert_eq!(outcome, None);
    assert_eq!(h.page.renders(), vec![(Category::ThirdParty, String::new())]);
    let log = read_session(tmp.path());
    assert!(log.contains("Kind: ApplicationException"));
    assert!(!log.contains("Severity:"));
}

#[test]
fn panic_in_request_work_is_handled_as_exception() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let h = host(tmp.path(), SeverityMask::ALL);

    let outcome: Option<()> = h.pipeline.run(|| panic!("index out of range"));

    assert_eq!(outcome, None);
    assert_eq!(h.page.renders().len(), 1);
    assert_eq!(h.transport.count(), 1);
    let log = read_session(tmp.path());
    assert!(log.contains("Kind: PanicException"));
    assert!(log.contains("Message: index out of range"));
}

#[test]
fn undeliverable_fault_is_left_for_shutdown_monitor() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let h = host(tmp.path(), SeverityMask::ALL);

    let fault = RawFault::new(Severity::COMPILE_ERROR, "cannot redeclare", "lib.x", 8);
    assert!(h.pipeline.fault(fault.clone()).is_ok());
    assert_eq!(h.pipeline.runtime().last_fault(), Some(fault));
    assert!(h.page.renders().is_empty());

    assert_eq!(h.pipeline.monitor().run(), ShutdownOutcome::Exit(1));
    assert_eq!(h.page.renders().len(), 1);
    assert_eq!(h.transport.count(), 1);
    assert!(read_session(tmp.path()).contains("Severity: COMPILE_ERROR"));
}

#[test]
fn fatal_fault_survives_later_faults() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let h = host(tmp.path(), SeverityMask::ALL.without(Severity::NOTICE));

    let fatal = RawFault::new(Severity::ERROR, "out of memory", "alloc.x", 12);
    assert!(h.pipeline.fault(fatal.clone()).is_ok());
    assert!(h
        .pipeline
        .fault(RawFault::new(Severity::NOTICE, "undefined index", "cart.x", 5))
        .is_ok());
    let _ = h
        .pipeline
        .fault(RawFault::new(Severity::WARNING, "division by zero", "calc.x", 42));
    assert_eq!(h.pipeline.runtime().last_fault(), Some(fatal));

    assert_eq!(h.pipeline.monitor().run(), ShutdownOutcome::Exit(1));
    assert_eq!(h.page.renders().len(), 1);
    assert_eq!(h.transport.count(), 1);
    assert!(read_session(tmp.path()).contains("Message: out of memory"));
}

#[test]
fn reported_exception_goes_straight_to_the_handler() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let h = host(tmp.path(), SeverityMask::ALL);

    h.pipeline.report(&UnifiedException::new(
        Category::Temporary,
        "database unavailable",
    ));

    assert_eq!(h.page.renders(), vec![(Category::Temporary, String::new())]);
    assert_eq!(h.transport.count(), 1);
    let log = read_session(tmp.path());
    assert!(log.contains("Uncaught exception:"));
    assert!(log.contains("Message: database unavailable"));
}

#[test]
fn exhausted_budget_blocks_every_alert() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let marker_dir = tmp.path().join(".ratelimiter");
    seed_markers(&marker_dir, 25);
    let transport = Arc::new(RecordingTransport::new());
    let pipeline = Faultline::builder(tmp.path())
        .recipient(Some("ops@example.com".to_owned()))
        .identity(identity())
        .limiter(Arc::new(FileRateLimiter::new(&marker_dir)))
        .transport(transport.clone())
        .page(Arc::new(RecordingPage::new()))
        .build();

    assert!(!pipeline.alert("division by zero", &AlertOptions::default()));
    assert_eq!(transport.count(), 0);
    assert_eq!(marker_count(&marker_dir), 25);
}

#[test]
fn disabled_session_alerts_maintainers_once() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let h = host(&tmp.path().join("missing"), SeverityMask::ALL);

    let _: Option<()> = h
        .pipeline
        .run(|| Err(UnifiedException::new(Category::Permanent, "first failure")));
    let _: Option<()> = h
        .pipeline
        .run(|| Err(UnifiedException::new(Category::Permanent, "second failure")));

    let messages = h.transport.messages();
    assert_eq!(messages.len(), 3);
    let notices = messages
        .iter()
        .filter(|m| m.body.replace("=\r\n", "").contains("session log files are disabled"))
        .count();
    assert_eq!(notices, 1);
    assert!(h.pipeline.session().is_disabled());
}
