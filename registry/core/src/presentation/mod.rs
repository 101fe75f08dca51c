// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`dtp-registry-core`)
//!
//! HTTP surface that translates external requests into application service
//! calls. Visibility, validation and persistence all live in
//! `crate::application`.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP/SSE (Axum) | Registry, freshness and admin endpoints + the portal event stream |

pub mod api;
