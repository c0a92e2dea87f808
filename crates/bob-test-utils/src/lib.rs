// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic test doubles shared across the workspace.

pub mod mock_engine;
pub mod mock_transport;

pub use mock_engine::MockEngine;
pub use mock_transport::{MockTransport, TransportCall};
