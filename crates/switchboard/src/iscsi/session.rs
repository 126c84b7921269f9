// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! iSCSI login sequence
//!
//! A login walks iscsiadm's node database through a fixed sequence:
//!
//! ```text
//! Unauthenticated -> NodeRecordCreated -> [AuthConfigured] -> LoggedIn
//! ```
//!
//! The CHAP step is only taken for authenticated targets. Nothing is kept in
//! memory between calls; iscsiadm's own node records are the state. A failed
//! step aborts the sequence but nothing already written is undone, so the
//! node record and any partial CHAP settings survive and a retry simply walks
//! the sequence again from the start.

use std::{fmt, sync::Arc};

use blockdev::{Executor, Logger};

use crate::Error;

/// The iSCSI initiator administration utility
pub const ISCSIADM: &str = "iscsiadm";

const PASSWORD_KEY: &str = "node.session.auth.password";

/// Progress of a single login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing has been done for this target yet
    Unauthenticated,
    /// A node record exists for (target, portal, interface)
    NodeRecordCreated,
    /// CHAP method, username and password are set on the node record
    AuthConfigured,
    /// The login command succeeded
    LoggedIn,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unauthenticated => f.write_str("unauthenticated"),
            SessionState::NodeRecordCreated => f.write_str("node record created"),
            SessionState::AuthConfigured => f.write_str("auth configured"),
            SessionState::LoggedIn => f.write_str("logged in"),
        }
    }
}

/// Establishes iSCSI sessions through iscsiadm
#[derive(Clone)]
pub struct SessionManager {
    executor: Arc<dyn Executor>,
    log: Logger,
    iface: String,
}

impl SessionManager {
    /// Create a manager placing node records on `iface`
    pub fn new(executor: Arc<dyn Executor>, iface: impl Into<String>, log: Logger) -> Self {
        Self {
            executor,
            log: log.with_target(module_path!()),
            iface: iface.into(),
        }
    }

    /// Log in to a target that does not require authentication
    pub fn login(&self, target_iqn: &str, portal: &str) -> Result<(), Error> {
        let mut login = Login::new(self, target_iqn, portal);
        login.create_node_record()?;
        login.login()
    }

    /// Log in to a target using CHAP credentials.
    ///
    /// The credentials are written to the node record before logging in.
    pub fn login_with_chap(&self, target_iqn: &str, portal: &str, username: &str, password: &str) -> Result<(), Error> {
        let mut login = Login::new(self, target_iqn, portal);
        login.create_node_record()?;
        login.configure_chap(username, password)?;
        login.login()
    }
}

/// A single pass through the login sequence
struct Login<'a> {
    manager: &'a SessionManager,
    target_iqn: &'a str,
    portal: &'a str,
    state: SessionState,
}

impl<'a> Login<'a> {
    fn new(manager: &'a SessionManager, target_iqn: &'a str, portal: &'a str) -> Self {
        Self {
            manager,
            target_iqn,
            portal,
            state: SessionState::Unauthenticated,
        }
    }

    fn create_node_record(&mut self) -> Result<(), Error> {
        self.iscsiadm(&["--interface", self.manager.iface.as_str(), "--op", "new"])?;
        self.advance(SessionState::NodeRecordCreated);
        Ok(())
    }

    fn configure_chap(&mut self, username: &str, password: &str) -> Result<(), Error> {
        self.update("node.session.auth.authmethod", "CHAP")?;
        self.update("node.session.auth.username", username)?;
        self.update(PASSWORD_KEY, password)?;
        self.advance(SessionState::AuthConfigured);
        Ok(())
    }

    fn login(&mut self) -> Result<(), Error> {
        self.iscsiadm(&["--login"])?;
        self.advance(SessionState::LoggedIn);
        Ok(())
    }

    fn update(&self, name: &str, value: &str) -> Result<(), Error> {
        let value = format!("--value={value}");
        self.iscsiadm(&["--op=update", "--name", name, value.as_str()])
    }

    // Run iscsiadm against this target's node record
    fn iscsiadm(&self, extra: &[&str]) -> Result<(), Error> {
        let mut args = vec!["-m", "node", "-T", self.target_iqn, "-p", self.portal];
        args.extend_from_slice(extra);

        let log = &self.manager.log;
        log.debug(format_args!("{ISCSIADM} {}", redact(&args)));

        match self.manager.executor.run(ISCSIADM, &args) {
            Ok(output) => {
                log.trace(format_args!("{ISCSIADM}: {}", output.trim()));
                Ok(())
            }
            Err(source) => {
                log.error(format_args!(
                    "{ISCSIADM} {} failed in state {}: {source}",
                    redact(&args),
                    self.state
                ));
                Err(Error::Login {
                    target: self.target_iqn.to_owned(),
                    portal: self.portal.to_owned(),
                    state: self.state,
                    source,
                })
            }
        }
    }

    fn advance(&mut self, state: SessionState) {
        self.manager
            .log
            .info(format_args!("{} at {}: {} -> {state}", self.target_iqn, self.portal, self.state));
        self.state = state;
    }
}

// Join arguments for logging, hiding the CHAP password
fn redact(args: &[&str]) -> String {
    let mut hide = false;
    args.iter()
        .map(|arg| {
            let shown = if hide && arg.starts_with("--value=") {
                "--value=********"
            } else {
                arg
            };
            hide = *arg == PASSWORD_KEY;
            shown
        })
        .collect::<Vec<_>>()
        .join(" ")
}
