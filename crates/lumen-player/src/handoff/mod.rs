//! Single-slot handoff between the decoder thread and the render tick.
//!
//! The slot holds at most one item. Publishing overwrites whatever is
//! buffered, so a slow consumer only ever sees the newest frame and
//! intermediate frames are dropped.

pub mod slot;

pub use slot::{Publisher, SlotStats, Subscriber, Taken, slot};
