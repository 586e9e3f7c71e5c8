// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Session/log/tool repository implementations for both storage backends
//! (`domain::repository::StorageBackend`).

pub mod in_memory;
pub mod postgres;
