// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Process execution gateway
//!
//! Every host utility is reached through [`Executor`]. The trait is deliberately
//! thin: it launches a program with an argument vector and hands back the exit
//! code and combined output, leaving all interpretation to the caller.

use std::{fs, io, path::Path, process::Command};

use crate::Error;

/// The captured result of running a host utility
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    /// Exit code, or `None` when the process was killed by a signal
    pub code: Option<i32>,
    /// stdout followed by stderr
    pub combined: String,
}

impl Output {
    /// Returns true if the utility exited with code zero
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs host utilities and reads host files on behalf of the resolvers
pub trait Executor: Send + Sync {
    /// Launch `program` with `args` and wait for it to finish.
    ///
    /// # Returns
    ///
    /// * `Ok(Output)` whenever the process could be started, regardless of its exit code
    /// * `Err(io::Error)` if the process could not be started
    fn execute(&self, program: &str, args: &[&str]) -> io::Result<Output>;

    /// Read a host file in full
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Launch `program` and treat any non-zero exit as an error.
    ///
    /// # Returns
    ///
    /// The combined output on success, otherwise [`Error::Launch`] or
    /// [`Error::Command`] carrying the output for diagnostics.
    fn run(&self, program: &str, args: &[&str]) -> Result<String, Error> {
        let output = self.execute(program, args).map_err(|source| Error::Launch {
            program: program.to_owned(),
            source,
        })?;

        if output.success() {
            Ok(output.combined)
        } else {
            Err(Error::Command {
                program: program.to_owned(),
                code: output.code,
                output: output.combined,
            })
        }
    }
}

/// Executes utilities on the running host via [`std::process::Command`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn execute(&self, program: &str, args: &[&str]) -> io::Result<Output> {
        let output = Command::new(program).args(args).output()?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(Output {
            code: output.status.code(),
            combined,
        })
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}
