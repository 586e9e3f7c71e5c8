// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Subprocess I/O adapters: the per-server actor, the wire-protocol codec,
//! and OS process table scanning (C3/C4/C5).

pub mod mcp_process;
pub mod os_table;
pub mod wire;
