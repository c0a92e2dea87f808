// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions.

pub mod engine;
pub mod transport;

pub use engine::{EngineAdapter, EngineEvent, EngineOutcome, EngineRequest, EngineStream};
pub use transport::ChatTransport;
