// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the bob assistant daemon.
//!
//! This crate provides the error type, shared message/chat types, and the
//! adapter traits (chat transport, streaming engine) that the rest of the
//! workspace implements.

pub mod error;
pub mod traits;
pub mod types;

pub use error::BobError;
pub use types::{
    ActionKind, ChatRef, EngineAction, EntityKind, OutgoingMessage, Role, TextEntity, BOB_ID,
};

pub use traits::{
    ChatTransport, EngineAdapter, EngineEvent, EngineOutcome, EngineRequest, EngineStream,
};
