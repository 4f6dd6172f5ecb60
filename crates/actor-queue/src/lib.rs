//! Typed Actor Queue
//!
//! Provides the message queue every pipeline actor owns:
//! - Bounded FIFO with fire-and-forget `send`
//! - Synchronous `send_and_wait` backed by one reply slot per message kind
//! - A generic "receive, handle, repeat" actor loop with optional idle work

mod actor;
mod queue;

pub use actor::{run_actor, spawn_actor, Flow, Handler, Idle};
pub use queue::{ActorQueue, QueueBuilder, DEFAULT_CAPACITY};

use std::fmt::Debug;
use std::hash::Hash;
use thiserror::Error;

/// A message that can travel through an [`ActorQueue`].
///
/// The kind is derived from the variant, so payload and kind can never disagree.
pub trait Message: Send {
    /// Discriminant used to select the reply slot of synchronous calls
    type Kind: Copy + Eq + Hash + Debug + Send + Sync;

    /// Kind of this message
    fn kind(&self) -> Self::Kind;
}

/// Queue errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Capacity reached, message was not enqueued
    #[error("Queue '{queue}' is full ({capacity} messages)")]
    QueueFull { queue: String, capacity: usize },

    /// Synchronous call or reply on a kind without a reply slot
    #[error("Bad request on queue '{queue}': {reason}")]
    BadRequest { queue: String, reason: String },

    /// Owning actor has stopped
    #[error("Queue '{queue}' is closed")]
    Closed { queue: String },
}
