// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams between the controllers and their collaborators.
//!
//! [`ObjectStore`] abstracts the watch/list/CRUD backend; [`DeliveryProvider`]
//! is implemented once per provider kind (and by the forwarding sink).

pub mod provider;
pub mod store;

pub use provider::{DeliveryProvider, DeliveryReceipt, DeliveryRequest};
pub use store::{DeleteOptions, ListParams, ObjectStore, Preconditions, Propagation, WatchEvent};
