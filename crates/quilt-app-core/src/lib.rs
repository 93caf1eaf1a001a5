// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for Quilt tools (config, gateway settings).
//! Keeps daemons and test harnesses thin and storage-agnostic.

pub mod config;
pub mod settings;
