// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # gateway-core
//!
//! The orchestration heart of the AEGIS tool gateway: owns the MCP
//! subprocess lifecycle manager and the client-side connection/execution
//! pipeline that ties an LLM, a persisted session state machine, and
//! tool-server subprocesses together.
//!
//! ## Layer structure
//!
//! ```text
//! presentation/   ← HTTP API (axum)
//!     ↓
//! application/    ← Use-cases: launcher, health probe, reaper, supervisor,
//!                    connection pool, executor, orchestrator
//!     ↓
//! domain/         ← ServerConfig/ServerStatus, Session, ErrorKind, LLMProvider
//!     ↓
//! infrastructure/ ← Postgres + in-memory repositories, subprocess/wire
//!                    protocol, LLM adapters
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
