// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Beacon notification controller.
//!
//! This crate provides the resource model (channels, templates, receivers,
//! message requests and messages), the workspace error type, the template
//! renderer, and the traits the store and delivery adapters implement.

pub mod error;
pub mod resource;
pub mod template;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::BeaconError;
pub use resource::{ObjectKey, ObjectMeta, Resource};
pub use types::{
    Channel, ChannelPhase, IdentityKind, Message, MessageRequest, ProviderKind, Receiver,
    ReceiverGroup, RequestPhase, Template,
};

pub use traits::{DeliveryProvider, ObjectStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_kinds_are_distinct() {
        let kinds = [
            Channel::KIND,
            Template::KIND,
            Receiver::KIND,
            ReceiverGroup::KIND,
            MessageRequest::KIND,
            Message::KIND,
        ];
        let unique: std::collections::HashSet<_> = kinds.iter().collect();
        assert_eq!(unique.len(), kinds.len());
    }

    #[test]
    fn request_phase_serialization() {
        let json = serde_json::to_string(&RequestPhase::PartialFailure).expect("should serialize");
        assert_eq!(json, "\"PartialFailure\"");
        let parsed: RequestPhase = serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(parsed, RequestPhase::PartialFailure);
    }

    #[test]
    fn all_traits_are_exported() {
        fn _assert_store<T: ObjectStore>() {}
        fn _assert_provider<T: DeliveryProvider>() {}
    }
}
