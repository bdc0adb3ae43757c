// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Taxis: local AI-assisted file categorizer
//!
//! Files are described, sorted into categories by a three-tier categorizer
//! (file-type rules, filename patterns, then a local model), and moved into
//! per-category folders once the user has reviewed the proposed plan.

pub mod categories;
pub mod classifier;
pub mod config;
pub mod db;
pub mod descriptor;
pub mod error;
pub mod history;
pub mod ollama;
pub mod outcome;
pub mod pipeline;
pub mod relocation;
pub mod rules;
pub mod settings;
pub mod watcher;

pub use config::AppConfig;
pub use error::{Result, TaxisError};
