// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Domain types, invariants and the contracts implemented by the
//! infrastructure layer.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Declares the domain modules

pub mod twin;
pub mod service;
pub mod portal;
pub mod events;
pub mod freshness;
pub mod rbac;
pub mod repository;
pub mod error;
pub mod registry_config;
