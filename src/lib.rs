//! Faultline: failure interception and alerting for request-serving
//! processes.
//!
//! Runtime faults and uncaught exceptions are normalized into one
//! [`exception::UnifiedException`], shown to the visitor as a generic
//! failure page, recorded in a per-process session log and mailed to the
//! maintainers through a marker-file rate limiter. A shutdown monitor picks
//! up fatal faults nothing else could catch.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod exception;
pub mod guard;
pub mod runtime;
pub mod severity;

pub mod dispatcher;
pub mod limiter;
pub mod mail;
pub mod session;

pub mod handler;
pub mod normalizer;
pub mod pipeline;
pub mod shutdown;
