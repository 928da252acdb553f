//! Event system for the phase pipeline
//!
//! This crate provides the event bus and event types used to notify
//! observers (UI, metrics) about project lifecycle changes.

mod bus;
mod types;

pub use bus::{
    DeliveryReport, EventBus, EventHandler, HandlerError, Publication, SubscriptionId,
};
pub use types::*;
