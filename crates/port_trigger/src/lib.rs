//! port_trigger: change notifications between the sync layer and UI state
//!
//! A [`TriggerBus`] carries one counter per [`TriggerEvent`] type.
//! Publishing bumps the counter and wakes that type's subscribers; other
//! types are untouched.  Bursts coalesce: a subscriber that has not looked
//! yet sees one change, not one per publish.  Nothing is persisted.

pub mod bus;
pub mod event;

pub use bus::{TriggerBus, TriggerHandle};
pub use event::{TriggerAction, TriggerEvent};
