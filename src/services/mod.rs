//! Clients for flaky third-party feeds consumed by the notification layer.
//! Every HTTP fetch in this module goes through [`crate::retry::with_retry`];
//! a failing feed is logged and skipped, never fatal to the gateway.

pub mod weather;
