/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! rmsched – rate-monotonic scheduler for periodic tasks
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── task          – task identity, state machine, record
//! ├── clock         – monotonic millisecond tick source (real + manual)
//! ├── config/       – YAML daemon configuration
//! ├── os/           – OS collaborator: priority, suspend, resume, lookup
//! ├── scheduler/    – admission, task store, run queue, timers, dispatcher
//! └── control/      – line protocol + tokio TCP server
//! ```

pub mod clock;
pub mod config;
pub mod control;
pub mod os;
pub mod scheduler;
pub mod task;
