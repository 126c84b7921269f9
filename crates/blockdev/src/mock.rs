// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Scripted host for testing.
//!
//! [`MockExecutor`] replays canned utility results and records every
//! invocation, so command sequences can be asserted without touching the host.
//! [`CapturingLog`] collects log records emitted through an injected
//! [`crate::Logger`].

use std::{
    collections::{HashMap, VecDeque},
    io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use log::{Level, Log, Metadata, Record};

use crate::{Executor, Output};

/// A canned result for one utility run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Exit code zero with the given output
    Success(String),
    /// Non-zero exit with the given output
    Failure { code: i32, output: String },
    /// The program could not be launched
    Unavailable,
}

impl Reply {
    /// Successful run with no output
    pub fn ok() -> Self {
        Self::Success(String::new())
    }

    /// Successful run printing `output`
    pub fn output(output: impl Into<String>) -> Self {
        Self::Success(output.into())
    }

    /// Failed run with exit code 1 printing `output`
    pub fn fail(output: impl Into<String>) -> Self {
        Self::Failure {
            code: 1,
            output: output.into(),
        }
    }
}

/// A single recorded utility run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Program and arguments joined by spaces
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Executor that answers from a script instead of the host.
///
/// Replies queued with [`MockExecutor::reply`] are consumed in order per program.
/// Once a program's queue is empty the reply set by [`MockExecutor::always`] is
/// used, and programs with neither are reported as not installed.
#[derive(Debug, Default)]
pub struct MockExecutor {
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallback: Mutex<HashMap<String, Reply>>,
    files: Mutex<HashMap<PathBuf, String>>,
    calls: Mutex<Vec<Invocation>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot reply for the next run of `program`
    pub fn reply(&self, program: &str, reply: Reply) -> &Self {
        lock(&self.queued).entry(program.to_owned()).or_default().push_back(reply);
        self
    }

    /// Reply used for `program` whenever its queue is empty
    pub fn always(&self, program: &str, reply: Reply) -> &Self {
        lock(&self.fallback).insert(program.to_owned(), reply);
        self
    }

    /// Make `path` readable with the given contents
    pub fn file(&self, path: impl Into<PathBuf>, contents: impl Into<String>) -> &Self {
        lock(&self.files).insert(path.into(), contents.into());
        self
    }

    /// All runs so far, in order
    pub fn calls(&self) -> Vec<Invocation> {
        lock(&self.calls).clone()
    }

    /// All runs of `program` so far, in order
    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        lock(&self.calls).iter().filter(|c| c.program == program).cloned().collect()
    }

    /// Forget recorded runs, keeping the script
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }
}

impl Executor for MockExecutor {
    fn execute(&self, program: &str, args: &[&str]) -> io::Result<Output> {
        lock(&self.calls).push(Invocation {
            program: program.to_owned(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
        });

        let queued = lock(&self.queued).get_mut(program).and_then(VecDeque::pop_front);
        let reply = queued
            .or_else(|| lock(&self.fallback).get(program).cloned())
            .unwrap_or(Reply::Unavailable);

        match reply {
            Reply::Success(combined) => Ok(Output {
                code: Some(0),
                combined,
            }),
            Reply::Failure { code, output } => Ok(Output {
                code: Some(code),
                combined: output,
            }),
            Reply::Unavailable => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{program}: command not found"),
            )),
        }
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        lock(&self.files)
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{}: no such file", path.display())))
    }
}

/// An owned copy of a captured log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRecord {
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// Log sink that keeps every record in memory
#[derive(Debug, Default)]
pub struct CapturingLog {
    records: Mutex<Vec<CapturedRecord>>,
}

impl CapturingLog {
    pub fn records(&self) -> Vec<CapturedRecord> {
        lock(&self.records).clone()
    }

    /// Returns true if a record at `level` contains `needle`
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        lock(&self.records)
            .iter()
            .any(|r| r.level == level && r.message.contains(needle))
    }
}

impl Log for CapturingLog {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        lock(&self.records).push(CapturedRecord {
            level: record.level(),
            target: record.target().to_owned(),
            message: record.args().to_string(),
        });
    }

    fn flush(&self) {}
}
