// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered merging.
//!
//! Merge order: compiled defaults, then `config.toml` under the bob root,
//! then `BOB_*` environment variables.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::BobConfig;
use crate::paths::BobPaths;

/// Load configuration from the bob root with env var overrides.
pub fn load_config(paths: &BobPaths) -> Result<BobConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(BobConfig::default()))
        .merge(Toml::file(paths.config_file()))
        .merge(env_provider())
        .extract()
}

/// Load configuration from an inline TOML string (testing and diagnostics).
pub fn load_config_from_str(toml_content: &str) -> Result<BobConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(BobConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<BobConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(BobConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Environment variable provider using explicit `map()` for section-to-dot
/// mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` so that underscores in
/// key names survive: `BOB_TELEGRAM_ACK_REACTION` must map to
/// `telegram.ack_reaction`, not `telegram.ack.reaction`.
fn env_provider() -> Env {
    Env::prefixed("BOB_").map(|key| {
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("telegram_", "telegram.", 1)
            .replacen("heartbeat_", "heartbeat.", 1)
            .replacen("dnd_", "dnd.", 1);
        mapped.into()
    })
}
