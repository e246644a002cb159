// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connector handles.
//!
//! - `SubprocessSource` / `SubprocessDestination`: connectors run as child
//!   processes speaking JSON lines on stdin/stdout
//! - `MockSource` / `MockDestination`: scripted in-memory connectors for tests

pub mod mock;
mod subprocess;
mod traits;

pub use mock::{MockDestination, MockSource};
pub use subprocess::{ConnectorCommand, SubprocessDestination, SubprocessSource};
pub use traits::*;

/// Exit code of a process stopped by SIGTERM.
pub const SIGTERM_EXIT_CODE: i32 = 143;
/// Exit code of a process stopped by SIGKILL.
pub const SIGKILL_EXIT_CODE: i32 = 137;

/// Whether an exit code counts as a clean exit.
///
/// Once cancellation was requested, termination by signal is expected.
pub fn exit_code_accepted(code: i32, cancelled: bool) -> bool {
    code == 0 || (cancelled && matches!(code, SIGTERM_EXIT_CODE | SIGKILL_EXIT_CODE))
}
