// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Use-case layer: config loading, the process registry, the subprocess
//! lifecycle (launch/health/reap/supervise), the connection pool, the tool
//! executor, and the LLM-driven orchestrator (C1-C8, C11).

pub mod config_loader;
pub mod connection_pool;
pub mod executor;
pub mod health_probe;
pub mod launcher;
pub mod orchestrator;
pub mod reaper;
pub mod registry;
pub mod supervisor;
