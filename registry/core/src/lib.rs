// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lib
//!
//! Digital twin registry core: catalog, visibility rules, portal card
//! reconciliation, freshness cache and catalog event feed.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Crate root re-exporting the domain layer

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
