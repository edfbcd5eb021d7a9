// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process object store for the Beacon notification controller.
//!
//! [`MemoryStore`] implements [`beacon_core::ObjectStore`] with the semantics
//! the controllers rely on: store-assigned uids, optimistic concurrency on
//! resource versions, finalizer-gated deletion, field selectors and watch
//! streams. It also supports scripted faults for tests.

pub mod memory;
pub mod seed;

pub use memory::{EventType, Fault, FaultKind, JournalEntry, MemoryStore, StoreOp};
pub use seed::{Manifest, apply_manifests, load_manifests};
