// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! iSCSI connector
//!
//! Attaches iSCSI LUNs through open-iscsi's `iscsiadm` and reports the stable
//! `/dev/disk/by-path` link the LUN appears under.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use blockdev::{resolver, Executor, Logger, Resolver};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{config::IscsiOptions, Connector, Error, Kind, TransportResponse};

mod session;
pub use session::{SessionManager, SessionState, ISCSIADM};

/// Where open-iscsi keeps the local initiator names
pub const INITIATOR_FILE: &str = "/etc/iscsi/initiatorname.iscsi";

/// The iscsiadm interface used unless configured otherwise
pub const DEFAULT_IFACE: &str = "default";

/// How a target expects the initiator to authenticate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthMethod {
    /// No authentication
    #[default]
    None,
    /// CHAP username and password
    Chap,
}

impl From<&str> for AuthMethod {
    /// `"chap"` in any case selects CHAP, everything else means no authentication
    fn from(value: &str) -> Self {
        if value.eq_ignore_ascii_case("chap") {
            Self::Chap
        } else {
            Self::None
        }
    }
}

impl From<String> for AuthMethod {
    fn from(value: String) -> Self {
        value.as_str().into()
    }
}

impl From<AuthMethod> for String {
    fn from(value: AuthMethod) -> Self {
        value.to_string()
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::None => f.write_str("none"),
            AuthMethod::Chap => f.write_str("chap"),
        }
    }
}

/// Details of the iSCSI volume to attach
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Target portal, `host:port`
    pub portal: String,
    pub target_iqn: String,
    #[serde(default)]
    pub lun: u32,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub chap_login: String,
    #[serde(default)]
    pub chap_password: String,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("portal", &self.portal)
            .field("target_iqn", &self.target_iqn)
            .field("lun", &self.lun)
            .field("auth_method", &self.auth_method)
            .field("chap_login", &self.chap_login)
            .field("chap_password", &"********")
            .finish()
    }
}

impl ConnectRequest {
    /// The `/dev/disk/by-path` link this LUN appears under once attached
    pub fn device_path(&self) -> PathBuf {
        resolver::iscsi_by_path(&self.portal, &self.target_iqn, self.lun)
    }
}

/// iSCSI specific connect results. Nothing beyond the common fields yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {}

/// Host identity gathered when the connector is built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Local initiator names, in file order without duplicates
    pub initiator_iqns: Vec<String>,
    /// iscsiadm interface node records are bound to
    pub iface: String,
    pub host_name: String,
}

/// Extracts the `InitiatorName=` values of an initiator name file.
///
/// Other lines, including commented out names, are ignored.
pub fn parse_initiators(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter_map(|line| line.trim().strip_prefix("InitiatorName="))
        .map(str::trim)
        .filter(|iqn| !iqn.is_empty())
        .unique()
        .map(str::to_owned)
        .collect()
}

/// Connector for iSCSI volumes
pub struct IscsiConnector {
    config: ConnectorConfig,
    options: IscsiOptions,
    sessions: SessionManager,
    resolver: Resolver,
    log: Logger,
}

impl IscsiConnector {
    /// Build a connector, gathering the host identity and checking the interface.
    ///
    /// Only read-only queries are issued: the initiator name file, `hostname`
    /// and `iscsiadm -m iface -I <iface> -o show`. A failing interface probe
    /// makes the connector unusable and is returned as [`Error::Interface`].
    pub fn new(options: IscsiOptions, executor: Arc<dyn Executor>, log: Logger) -> Result<Self, Error> {
        let log = log.with_target(module_path!());

        let initiator_iqns = read_initiators(executor.as_ref(), &options.initiator_file, &log);
        let host_name = executor.run("hostname", &[]).map_err(Error::Hostname)?.trim().to_owned();

        let iface = options.iface.clone();
        executor
            .run(ISCSIADM, &["-m", "iface", "-I", iface.as_str(), "-o", "show"])
            .map_err(|source| {
                log.error(format_args!("iscsi unable to read from interface {iface}: {source}"));
                Error::Interface {
                    iface: iface.clone(),
                    source,
                }
            })?;

        log.debug(format_args!(
            "iscsi connector ready on {host_name} (iface {iface}, initiators {initiator_iqns:?})"
        ));

        let sessions = SessionManager::new(executor.clone(), iface.as_str(), log.clone());
        let resolver = Resolver::new(executor, log.clone()).with_poll_interval(options.poll_interval);

        Ok(Self {
            config: ConnectorConfig {
                initiator_iqns,
                iface,
                host_name,
            },
            options,
            sessions,
            resolver,
            log,
        })
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Attach the volume described by `request`.
    ///
    /// If the device path already exists no login is attempted. Otherwise a
    /// node record is created, CHAP configured when requested, and the
    /// target logged in. Concurrent calls for the same target are not
    /// serialized here.
    pub fn connect_iscsi(&self, request: &ConnectRequest) -> Result<crate::ConnectResponse, Error> {
        let path = request.device_path();
        let mut response = crate::ConnectResponse::new(path.clone(), TransportResponse::Iscsi(ConnectResponse::default()));

        if self.resolver.path_exists(&path) {
            self.log.info(format_args!("{} is already attached", path.display()));
            self.resolve_devices(request, &mut response);
            return Ok(response);
        }

        match request.auth_method {
            AuthMethod::Chap => self.sessions.login_with_chap(
                &request.target_iqn,
                &request.portal,
                &request.chap_login,
                &request.chap_password,
            ),
            AuthMethod::None => self.sessions.login(&request.target_iqn, &request.portal),
        }
        .inspect_err(|e| {
            self.log.error(format_args!(
                "iscsi login to {} at {} failed: {e}",
                request.target_iqn, request.portal
            ))
        })?;

        if self.options.settle_retries > 0 {
            if self.resolver.wait_for_path_to_exist(&path, self.options.settle_retries) {
                self.resolve_devices(request, &mut response);
            } else {
                self.log.warn(format_args!(
                    "{} has not appeared after login, returning it anyway",
                    path.display()
                ));
            }
        }

        Ok(response)
    }

    // Fill in raw and mapper devices when enabled. Failures only cost detail.
    fn resolve_devices(&self, request: &ConnectRequest, response: &mut crate::ConnectResponse) {
        if !self.options.resolve_devices {
            return;
        }

        let device = match self.resolver.find_scsi_lun(&request.target_iqn, request.lun) {
            Ok(device) => device,
            Err(e) => {
                self.log.warn(format_args!("unable to resolve block device: {e}"));
                return;
            }
        };

        if self.resolver.is_multipath(&device) {
            match self.resolver.mapper_device(&device) {
                Ok(mapper) => response.mp_device = mapper,
                Err(e) => self.log.warn(format_args!("unable to resolve multipath device: {e}")),
            }
        }
        response.blk_device = Some(device);
    }
}

impl Connector for IscsiConnector {
    fn kind(&self) -> Kind {
        Kind::Iscsi
    }

    fn connect(&self, request: &crate::ConnectRequest) -> Result<crate::ConnectResponse, Error> {
        let crate::ConnectRequest::Iscsi(request) = request;
        self.connect_iscsi(request)
    }
}

// Missing or unreadable initiator files leave the connector without initiators
fn read_initiators(executor: &dyn Executor, path: &Path, log: &Logger) -> Vec<String> {
    match executor.read_to_string(path) {
        Ok(contents) => parse_initiators(&contents),
        Err(e) => {
            log.warn(format_args!("unable to gather initiator names from {}: {e}", path.display()));
            Vec::new()
        }
    }
}
