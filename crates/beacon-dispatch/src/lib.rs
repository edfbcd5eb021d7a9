// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fan-out dispatch for the Beacon notification controller.
//!
//! [`DispatchEngine`] resolves a request's recipients, sends to each of them
//! through every provider kind its template configures, and reports
//! per-receiver outcomes. [`ProviderSet`] maps provider kinds to adapters,
//! optionally routing all of them to a [`ForwardingProvider`] test sink.

pub mod engine;
pub mod forward;
pub mod providers;

pub use engine::{Delivery, DispatchEngine, DispatchOutcome};
pub use forward::ForwardingProvider;
pub use providers::ProviderSet;
