// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Beacon integration tests.
//!
//! Provides mock delivery adapters and resource fixtures for fast,
//! deterministic, CI-runnable tests without external services.
//!
//! # Components
//!
//! - [`MockProvider`] - Recording delivery adapter with scripted failures
//! - [`fixtures`] - Builders for channels, templates, receivers and requests
//! - [`TestHarness`] - A seeded [`beacon_store::MemoryStore`] plus one mock per provider kind

pub mod fixtures;
pub mod harness;
pub mod mock_provider;

pub use harness::TestHarness;
pub use mock_provider::{MockProvider, SentMessage};
