//! warden-alert — formats alert events and delivers them to a webhook.
//!
//! Delivery is best effort. [`AlertSink::notify`] reports what happened
//! as a [`Delivery`] value and never returns an error, so a broken
//! webhook cannot take the supervisor down with it.

pub mod dispatcher;
pub mod event;

pub use dispatcher::{AlertDispatcher, AlertError, AlertSink, Delivery};
pub use event::{AlertEvent, Transport};
