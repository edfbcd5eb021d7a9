// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconcilers for the Beacon notification controller.
//!
//! Both controllers follow the same shape: an [`Informer`] lists and watches
//! one resource kind, its [`EventHandler`] pushes keys onto a [`WorkQueue`],
//! and a pool of workers drains the queue into a [`Reconciler`].
//!
//! - [`ChannelController`] owns the channel termination protocol.
//! - [`MessageRequestController`] drives requests through dispatch.

pub mod channel;
pub mod informer;
pub mod message_request;
pub mod retry;
pub mod runtime;
pub mod workqueue;

pub use channel::ChannelController;
pub use informer::{EventHandler, Informer};
pub use message_request::{MessageRequestController, RECEIVER_LABEL, REQUEST_LABEL};
pub use retry::{persist_with_retry, update_with_retry};
pub use runtime::{ControllerRun, Reconciler, run_controller, spawn_workers};
pub use workqueue::WorkQueue;
