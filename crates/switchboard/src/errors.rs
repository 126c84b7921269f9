// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{io, sync::Arc};

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::{config::KdlType, iscsi::SessionState, Kind};

/// Error type for the switchboard crate
#[derive(Diagnostic, Debug, Error)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] io::Error),

    /// A host utility failed or its output did not contain what we needed
    #[error(transparent)]
    Device(#[from] blockdev::Error),

    /// The configured iSCSI interface cannot be used
    #[error("iscsi unable to read from interface {iface}: {source}")]
    #[diagnostic(help("check the interface with `iscsiadm -m iface`"))]
    Interface {
        iface: String,
        #[source]
        source: blockdev::Error,
    },

    #[error("unable to determine host name: {0}")]
    Hostname(#[source] blockdev::Error),

    /// One step of the login sequence failed, leaving the session in `state`
    #[error("iscsi login to {target} at {portal} stopped at {state}: {source}")]
    Login {
        target: String,
        portal: String,
        state: SessionState,
        #[source]
        source: blockdev::Error,
    },

    #[error("{0} connectors are not implemented")]
    Unsupported(Kind),

    #[error("unknown connector type: {0}")]
    #[diagnostic(help("supported types are: iscsi"))]
    UnknownKind(String),

    #[diagnostic(transparent)]
    #[error(transparent)]
    Kdl(#[from] kdl::KdlError),

    #[diagnostic(transparent)]
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[diagnostic(transparent)]
    #[error(transparent)]
    InvalidType(#[from] InvalidType),

    #[diagnostic(transparent)]
    #[error(transparent)]
    UnsupportedNode(#[from] UnsupportedNode),

    #[diagnostic(transparent)]
    #[error(transparent)]
    UnsupportedProperty(#[from] UnsupportedProperty),

    #[diagnostic(transparent)]
    #[error(transparent)]
    UnsupportedValue(#[from] UnsupportedValue),
}

/// Merged error for parsing failures
/// Returns a list of diagnostics for the user
#[derive(Debug, Diagnostic, Error)]
#[error("failed to parse KDL")]
#[diagnostic(severity(error))]
pub struct ParseError {
    #[source_code]
    pub src: NamedSource<Arc<String>>,
    #[related]
    pub diagnostics: Vec<Error>,
}

/// Error for invalid types
#[derive(Debug, Diagnostic, Error)]
#[error("invalid type for {id}, expected {expected_type}, found {found_type}")]
#[diagnostic(severity(error))]
pub struct InvalidType {
    #[label]
    pub at: SourceSpan,

    pub id: String,

    /// The expected type
    pub expected_type: KdlType,

    /// The type actually present
    pub found_type: KdlType,
}

/// Error for unsupported node types
#[derive(Debug, Diagnostic, Error)]
#[error("unsupported node: {name}")]
#[diagnostic(severity(error), help("only 'iscsi' nodes are supported"))]
pub struct UnsupportedNode {
    #[label]
    pub at: SourceSpan,

    pub name: String,
}

/// Error for unknown properties on a known node
#[derive(Debug, Diagnostic, Error)]
#[error("unsupported property: {name}")]
#[diagnostic(severity(error))]
pub struct UnsupportedProperty {
    #[label]
    pub at: SourceSpan,

    pub name: String,

    #[help]
    pub advice: Option<String>,
}

/// Error for unsupported values
#[derive(Debug, Diagnostic, Error)]
#[error("unsupported value")]
#[diagnostic(severity(error))]
pub struct UnsupportedValue {
    #[label]
    pub at: SourceSpan,

    #[help]
    pub advice: Option<String>,
}
