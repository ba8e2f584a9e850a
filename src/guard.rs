//! Panic containment.
//!
//! Error-handling code must never take the process down with a secondary
//! failure, so every step that calls out to a collaborator runs inside
//! [`contain`]. The panic hook installed by [`install_panic_hook`] tells the
//! two cases apart: a panic inside a contained scope is captured for the
//! caller, anything else is recorded on the [`FaultRuntime`] as a fatal
//! fault for the shutdown monitor.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::exception::{capture_frames, Frame, SourceLocation, UnifiedException};
use crate::runtime::{FaultRuntime, RawFault};
use crate::severity::Severity;

thread_local! {
    static CONTAINED_DEPTH: Cell<u32> = const { Cell::new(0) };
    static CAPTURED: RefCell<Option<PanicReport>> = const { RefCell::new(None) };
}

/// What a contained panic left behind.
#[derive(Debug, Clone)]
pub struct PanicReport {
    /// Panic payload rendered as text.
    pub message: String,
    /// Where the panic was raised, when the hook saw it.
    pub location: Option<SourceLocation>,
    /// Stack at the panic site, when captured.
    pub frames: Vec<Frame>,
}

impl PanicReport {
    /// Turn the panic into an exception for the handler.
    pub fn into_exception(self) -> UnifiedException {
        let location = self
            .location
            .unwrap_or_else(|| SourceLocation::new("<unknown>", 0));
        UnifiedException::from_panic(self.message, location, self.frames)
    }
}

/// Run `f`, converting a panic into a [`PanicReport`].
pub fn contain<T>(f: impl FnOnce() -> T) -> Result<T, PanicReport> {
    CONTAINED_DEPTH.with(|depth| depth.set(depth.get().saturating_add(1)));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    CONTAINED_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));

    result.map_err(|payload| {
        CAPTURED
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_else(|| PanicReport {
                message: payload_message(payload.as_ref()),
                location: None,
                frames: Vec::new(),
            })
    })
}

/// Whether the current thread is inside a [`contain`] scope.
pub fn is_contained() -> bool {
    CONTAINED_DEPTH.with(Cell::get) > 0
}

/// Install the process panic hook.
///
/// Contained panics are captured silently. Uncontained ones are recorded on
/// `runtime` as an `ERROR` fault and then passed to the previous hook.
pub fn install_panic_hook(runtime: Arc<FaultRuntime>) {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let message = payload_message(info.payload());
        let location = info.location().map(SourceLocation::from);

        if is_contained() {
            let report = PanicReport {
                message,
                location,
                frames: capture_frames(),
            };
            CAPTURED.with(|slot| *slot.borrow_mut() = Some(report));
            return;
        }

        let location = location.unwrap_or_else(|| SourceLocation::new("<unknown>", 0));
        runtime.record(RawFault {
            severity: Severity::ERROR,
            message,
            location,
        });
        previous(info);
    }));
}

/// Render a panic payload as text.
pub fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_owned();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    if let Some(exception) = payload.downcast_ref::<UnifiedException>() {
        return exception.message().to_owned();
    }
    "panic with non-string payload".to_owned()
}
