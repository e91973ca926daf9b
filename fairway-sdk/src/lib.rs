//! Wire contract for Fairway.
//!
//! Every module that takes part in the round lifecycle talks in terms of
//! the types defined here: identifiers, round snapshots, and the event
//! envelope with its closed set of event kinds.

#![forbid(unsafe_code)]

pub mod events;
pub mod objects;
