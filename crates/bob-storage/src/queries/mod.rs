// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules, one per table-owning store.

pub mod events;
pub mod jobs;
pub mod messages;
