// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod admin;
pub mod binding_planner;
pub mod bootstrap;
pub mod card_reconciler;
pub mod event_tail;
pub mod last_data;
pub mod rbac_resolver;
pub mod registry;
pub mod store_factory;
pub mod twin_scanner;

pub use admin::AdminService;
pub use binding_planner::BindingPlanner;
pub use bootstrap::DemoSeeder;
pub use card_reconciler::{BootstrapPolicy, CardReconciler, ReconcileOutcome};
pub use event_tail::EventTail;
pub use last_data::LastDataCache;
pub use rbac_resolver::RbacResolver;
pub use registry::{Registry, UpsertTwin};
pub use twin_scanner::TwinScanner;
