//! Observability subsystem.
//!
//! Structured logging via `tracing`; every connection and tunnel exchange
//! carries its connection id as a span/field so one device's log line can be
//! followed across dispatch, handler, and restart decisions.

pub mod logging;
