// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Schedule parsing, next-run computation, and the do-not-disturb window.
//!
//! Everything in this crate is a pure function of its inputs: the caller
//! supplies `now` and the time zone, nothing here touches the clock or the
//! filesystem.

pub mod dnd;
pub mod parse;

pub use dnd::{AdhocDnd, DndReason, DndState, DndStatus, DndWindow};
pub use parse::{next_run_of, parse_schedule, ScheduleKind};
