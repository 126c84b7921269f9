// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Host storage utility plumbing
//!
//! This crate wraps the external tools used to discover and resolve block
//! devices exposed by network storage (`stat`, `lsscsi`, `multipath`, `lsblk`)
//! behind the [`Executor`] trait, so callers can swap in [`mock::MockExecutor`]
//! when the host should not be touched.

use std::io;

use thiserror::Error;

pub mod exec;
pub mod logging;
pub mod mock;
pub mod resolver;

pub use exec::{Executor, Output, SystemExecutor};
pub use logging::Logger;
pub use resolver::Resolver;

/// Errors raised while running host utilities or parsing their output
#[derive(Debug, Error)]
pub enum Error {
    /// The utility could not be started at all
    #[error("unable to run {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The utility ran but exited unsuccessfully
    #[error("{program} failed ({}): {}", exit_status(.code), .output.trim())]
    Command {
        program: String,
        code: Option<i32>,
        /// Combined stdout and stderr of the failed run
        output: String,
    },

    /// No line of the SCSI enumeration mentioned the requested target
    #[error("unable to find lsscsi output for: {0}")]
    NotFound(String),
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_owned(),
    }
}
