// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the bob assistant daemon.
//!
//! TOML config model, layered loader, and the fixed filesystem layout under
//! the bob root directory.

pub mod loader;
pub mod model;
pub mod paths;

pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::BobConfig;
pub use paths::BobPaths;
