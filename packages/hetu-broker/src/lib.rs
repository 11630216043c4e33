//! Subscription broker: turns committed store events into per-subscription
//! row/range deltas (§4.3).
//!
//! A [`Broker`] owns one [`tokio::sync::broadcast`] bus per component and a
//! registry of live subscriptions. [`Broker::subscribe_row`]/
//! [`Broker::subscribe_range`] take an initial snapshot and spawn a task
//! that watches the relevant bus for the subscription's lifetime,
//! translating each commit's change events into [`Delta`]s delivered over
//! a per-subscription channel — FIFO per subscription, at-most-once per
//! event, matching §4.3's guarantees.

mod broker;
mod delta;
mod error;
mod subscription;

pub use broker::{Broker, RangeSnapshot, RowSnapshot};
pub use delta::Delta;
pub use error::BrokerError;
pub use subscription::SubscriptionKind;

pub type Result<T> = std::result::Result<T, BrokerError>;
