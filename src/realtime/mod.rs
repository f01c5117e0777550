//! Realtime change events.
//!
//! The backend pushes [`RawEvent`] envelopes naming a collection, an
//! operation and a payload. [`classify`] turns an envelope into a typed
//! [`RealtimeEvent`]; [`RealtimeEventRouter`] suppresses redeliveries and
//! applies each event to the feed or chat list controller that owns it.

mod event;
mod router;

pub use event::{
    classify, ChatRef, Collection, LikeEvent, Operation, PostRef, RawEvent, ReadReceipt,
    RealtimeEvent,
};
pub use router::{DispatchOutcome, DropReason, RealtimeEventRouter, RouterStats};
