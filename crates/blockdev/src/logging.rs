// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Injectable logging handle
//!
//! Components take a [`Logger`] at construction instead of reaching for the
//! global `log` macros. The default handle forwards to whatever logger the
//! application installed in the `log` facade, while tests can hand in their
//! own [`log::Log`] sink and inspect the records it receives.

use std::{fmt, sync::Arc};

use log::{Level, Log, Metadata, Record};

/// Forwards every record to the logger installed in the global facade
struct Facade;

impl Log for Facade {
    fn enabled(&self, metadata: &Metadata) -> bool {
        log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record) {
        log::logger().log(record)
    }

    fn flush(&self) {
        log::logger().flush()
    }
}

/// A cloneable logging capability bound to a target name
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Log>,
    target: &'static str,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(Arc::new(Facade))
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("target", &self.target).finish_non_exhaustive()
    }
}

impl Logger {
    /// Create a logger writing to the given sink
    pub fn new(sink: Arc<dyn Log>) -> Self {
        Self {
            sink,
            target: "blockdev",
        }
    }

    /// Return a handle to the same sink that stamps records with `target`
    pub fn with_target(&self, target: &'static str) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            target,
        }
    }

    /// Emit a record at `level` if the sink accepts it
    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let metadata = Metadata::builder().level(level).target(self.target).build();
        if self.sink.enabled(&metadata) {
            self.sink.log(&Record::builder().metadata(metadata).args(args).build());
        }
    }

    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Trace, args)
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args)
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args)
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args)
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args)
    }
}
