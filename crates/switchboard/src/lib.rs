// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Attach network block storage to this host
//!
//! A [`Connector`] turns a [`ConnectRequest`] into a local device path. Use
//! [`new`] to build the connector for a transport [`Kind`]; only iSCSI is
//! implemented; the remaining kinds are reported as [`Error::Unsupported`].

use std::{fmt, path::PathBuf, str::FromStr, sync::Arc};

use blockdev::{Executor, Logger, Resolver};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod iscsi;

mod errors;
pub use errors::*;

pub use config::{IscsiOptions, Options};

/// Transport types a connector can be requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// iSCSI via open-iscsi
    #[serde(rename = "iscsi")]
    Iscsi,
    /// Fibre Channel
    #[serde(rename = "fc")]
    FibreChannel,
    /// Ceph RADOS block device
    #[serde(rename = "rbd")]
    Rbd,
    /// Network block device
    #[serde(rename = "nbd")]
    Nbd,
}

impl Kind {
    /// The short tag used in configuration and requests
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Iscsi => "iscsi",
            Kind::FibreChannel => "fc",
            Kind::Rbd => "rbd",
            Kind::Nbd => "nbd",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "iscsi" => Ok(Self::Iscsi),
            "fc" => Ok(Self::FibreChannel),
            "rbd" => Ok(Self::Rbd),
            "nbd" => Ok(Self::Nbd),
            _ => Err(Error::UnknownKind(value.to_owned())),
        }
    }
}

/// A request to attach a volume, one variant per implemented transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectRequest {
    Iscsi(iscsi::ConnectRequest),
}

impl ConnectRequest {
    pub fn kind(&self) -> Kind {
        match self {
            ConnectRequest::Iscsi(_) => Kind::Iscsi,
        }
    }
}

/// Transport specific part of a [`ConnectResponse`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportResponse {
    Iscsi(iscsi::ConnectResponse),
}

/// The outcome of attaching a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    /// Stable device path of the volume
    pub path: PathBuf,
    /// Multipath mapper device, when the volume is multipath-backed
    pub mp_device: Option<String>,
    /// Raw block device backing the volume
    pub blk_device: Option<String>,
    pub transport: TransportResponse,
}

impl ConnectResponse {
    pub fn new(path: PathBuf, transport: TransportResponse) -> Self {
        Self {
            path,
            mp_device: None,
            blk_device: None,
            transport,
        }
    }
}

/// Attaches volumes of one transport type
pub trait Connector: Send + Sync {
    /// The transport this connector handles
    fn kind(&self) -> Kind;

    /// Attach the requested volume and report where it can be found.
    ///
    /// Attaching an already attached volume returns its path without side effects.
    fn connect(&self, request: &ConnectRequest) -> Result<ConnectResponse, Error>;
}

/// Build the connector for `kind`.
///
/// # Returns
///
/// * `Ok(connector)` for implemented transports whose host setup checks pass
/// * `Err(Error::Unsupported)` for transports without an implementation
/// * Any construction error of the selected connector
pub fn new(kind: Kind, options: &Options, executor: Arc<dyn Executor>, log: Logger) -> Result<Box<dyn Connector>, Error> {
    match kind {
        Kind::Iscsi => Ok(Box::new(iscsi::IscsiConnector::new(
            options.iscsi.clone(),
            executor,
            log,
        )?)),
        Kind::FibreChannel | Kind::Rbd | Kind::Nbd => {
            log.with_target(module_path!())
                .error(format_args!("no connector implementation for {kind}"));
            Err(Error::Unsupported(kind))
        }
    }
}

/// Find the block device for `target`, preferring its multipath device.
///
/// Host utilities run through `executor`, the same seam [`new`] takes.
/// See [`Resolver::get_blk_device`].
pub fn get_blk_device(target: &str, executor: Arc<dyn Executor>, log: Logger) -> Result<String, Error> {
    let resolver = Resolver::new(executor, log);
    Ok(resolver.get_blk_device(target)?)
}
