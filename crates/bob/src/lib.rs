// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! bob - an always-on personal assistant daemon.
//!
//! Library surface for the `bob` binary: serve wiring, inbound message
//! handling, status rendering, and the crash marker.

pub mod crash;
pub mod inbound;
pub mod serve;
pub mod status;
