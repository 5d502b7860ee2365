#![cfg_attr(docsrs, feature(doc_cfg))]

//! # Canal - CSP-Style Channels For Rust
//!
//! Canal is a channel runtime in the Communicating Sequential Processes
//! tradition: programs are written as independent processes that share
//! nothing and communicate only by sending typed values over named,
//! bounded channels. With explicit communication as the only coupling,
//! there is no shared mutable state to race on.
//!
//! ## Key Characteristics
//!
//! - **Typed, bounded channels**: a capacity-zero channel is a pure
//!   rendezvous; larger capacities let writers run ahead.
//! - **Futures at the API**: no operation blocks the caller. Blocking
//!   and callback styles are thin facades over the same [`OpFuture`].
//! - **Multi-channel select**: wait on any mix of reads and writes over
//!   many channels; exactly one candidate takes effect, atomically.
//! - **Explicit runtime**: callbacks and timeouts run on an injected
//!   [`Runtime`] (executor + timer). No global state anywhere.
//! - **Deterministic retirement**: channels drain and shut down
//!   gracefully, by request or when the last end of a side is released.
//!
//! ## Getting Started
//!
//! Build a [`Runtime`] once, then create channels against it:
//!
//! ```rust
//! use canal::{Channel, Runtime};
//!
//! let rt = Runtime::new();
//! let ch = Channel::<u32>::bounded(&rt, 2);
//!
//! ch.write(1).unwrap();
//! ch.write(2).unwrap();
//! assert_eq!(ch.read(), Ok(1));
//! assert_eq!(ch.read(), Ok(2));
//! ```
//!
//! ## Core Concepts
//!
//! ### The OpFuture Type
//!
//! Every operation returns an [`OpFuture`] representing the in-flight
//! read or write. You can consume it in multiple ways:
//!
//! ```rust
//! use canal::{Channel, Runtime};
//!
//! let rt = Runtime::new();
//! let ch = Channel::<String>::bounded(&rt, 1);
//!
//! // 1. Blocking call
//! ch.write("hi".to_string()).unwrap();
//!
//! // 2. Await (canal futures are plain std futures, runtime-independent)
//! async fn read_one(ch: &canal::Channel<String>) -> String {
//!     ch.read_async().await.unwrap()
//! }
//!
//! // 3. Callback-based
//! ch.read_async().when_done(|res| {
//!     println!("got {:?}", res);
//! });
//! ```
//!
//! ### Rendezvous
//!
//! On a capacity-zero channel a write completes only when a read takes
//! the value, which synchronizes the two processes:
//!
//! ```rust
//! use canal::{Channel, Runtime};
//! use std::thread;
//!
//! let rt = Runtime::new();
//! let ch = Channel::<u32>::rendezvous(&rt);
//!
//! let writer = {
//!     let ch = ch.clone();
//!     thread::spawn(move || ch.write(42))
//! };
//!
//! assert_eq!(ch.read(), Ok(42));
//! writer.join().unwrap().unwrap();
//! ```
//!
//! ### Selecting Over Many Channels
//!
//! [`select`] races a list of candidate operations and commits exactly
//! one of them:
//!
//! ```rust
//! use canal::{Channel, Deadline, Priority, Runtime, SelectRequest};
//!
//! let rt = Runtime::new();
//! let a = Channel::<u32>::bounded(&rt, 1);
//! let b = Channel::<u32>::bounded(&rt, 1);
//! a.write(7).unwrap();
//!
//! let sel = canal::select(
//!     vec![SelectRequest::Read(a.clone()), SelectRequest::Read(b.clone())],
//!     Deadline::Infinite,
//!     Priority::First,
//! )
//! .unwrap()
//! .blocking()
//! .unwrap();
//!
//! assert_eq!(sel.index, 0);
//! ```
//!
//! ### Deadlines
//!
//! Any operation takes a [`Deadline`]: `Infinite` queues forever,
//! `Immediate` succeeds only if a match is possible right now, and
//! `At`/[`Deadline::after`] arm a timer that fails the operation with
//! [`ChannelError::Timeout`] if nothing matched in time.
//!
//! ### Retirement
//!
//! [`Channel::retire`] permanently shuts a channel down. A graceful
//! retire stops admitting new work but lets buffered values and queued
//! writers drain; an immediate retire drops everything. Channels also
//! retire themselves when the last [`ReadEnd`] or [`WriteEnd`] of a side
//! is released, so a process network tears itself down as its members
//! finish.

mod channel;
mod ends;
mod error;
mod future;
mod offer;
mod registry;
mod runtime;
mod select;
mod sync;

pub mod executor;
pub mod timer;

#[cfg_attr(docsrs, doc(hidden))]
pub mod test_utils;

pub use channel::{Channel, ChannelOptions, Deadline, OverflowPolicy};
pub use ends::{ReadEnd, WriteEnd};
pub use error::ChannelError;
pub use future::OpFuture;
pub use registry::ChannelRegistry;
pub use runtime::{Runtime, RuntimeBuilder};
pub use select::{
  ChannelSet, Priority, SelectOutcome, SelectRequest, Selected, select,
};
