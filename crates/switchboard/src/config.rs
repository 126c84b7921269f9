// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Connector options
//!
//! Options are plain structs with sensible defaults. They can also be read
//! from a KDL document, one node per transport:
//!
//! ```kdl
//! iscsi iface="default" initiator-file="/etc/iscsi/initiatorname.iscsi" poll-interval-ms=2000 settle-retries=5 resolve-devices=#true
//! ```

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use miette::NamedSource;

use crate::{iscsi, Error, InvalidType, ParseError, UnsupportedNode, UnsupportedProperty, UnsupportedValue};

/// Options for every connector type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub iscsi: IscsiOptions,
}

/// Options for the iSCSI connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IscsiOptions {
    /// iscsiadm interface used for node records
    pub iface: String,
    /// File holding the local initiator names
    pub initiator_file: PathBuf,
    /// Delay between device existence probes
    pub poll_interval: Duration,
    /// Probes to wait for the device after a fresh login; zero skips the wait
    pub settle_retries: u32,
    /// Fill in raw and multipath devices of attached volumes
    pub resolve_devices: bool,
}

impl Default for IscsiOptions {
    fn default() -> Self {
        Self {
            iface: iscsi::DEFAULT_IFACE.to_owned(),
            initiator_file: PathBuf::from(iscsi::INITIATOR_FILE),
            poll_interval: blockdev::resolver::POLL_INTERVAL,
            settle_retries: 0,
            resolve_devices: false,
        }
    }
}

/// The type of a KDL value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdlType {
    /// A boolean value
    Boolean,
    /// A string value
    String,
    /// A null value
    Null,
    /// An integer value
    Integer,
    /// A floating point value
    Float,
}

impl KdlType {
    // Determine the kdl value type
    pub fn for_value(value: &KdlValue) -> Self {
        if value.is_bool() {
            Self::Boolean
        } else if value.is_string() {
            Self::String
        } else if value.is_integer() {
            Self::Integer
        } else if value.is_float() {
            Self::Float
        } else {
            Self::Null
        }
    }
}

impl fmt::Display for KdlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KdlType::Boolean => f.write_str("boolean"),
            KdlType::String => f.write_str("string"),
            KdlType::Null => f.write_str("null"),
            KdlType::Integer => f.write_str("int"),
            KdlType::Float => f.write_str("float"),
        }
    }
}

/// Property parsing function
type PropertyParser = fn(&mut IscsiOptions, &KdlEntry, &str) -> Result<(), Error>;

/// Map of `iscsi` node properties to their parsers
static ISCSI_PROPERTIES: phf::Map<&'static str, PropertyParser> = phf::phf_map! {
    "iface" => parse_iface,
    "initiator-file" => parse_initiator_file,
    "poll-interval-ms" => parse_poll_interval,
    "settle-retries" => parse_settle_retries,
    "resolve-devices" => parse_resolve_devices,
};

impl Options {
    /// Load options from a KDL file
    pub fn new_for_path<P>(file: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let file = file.as_ref();
        let name = file.to_string_lossy();
        let txt = fs::read_to_string(file)?;
        Self::new(name.to_string(), txt)
    }

    /// Load options from a KDL string
    pub fn new(name: String, contents: String) -> Result<Self, Error> {
        let source = Arc::new(contents);
        let ns = NamedSource::new(name, source).with_language("KDL");
        let d = KdlDocument::parse_v2(ns.inner())?;

        let mut options = Self::default();
        let mut errors = vec![];

        for node in d.nodes() {
            match node.name().value() {
                "iscsi" => errors.extend(parse_iscsi(&mut options.iscsi, node)),
                what => errors.push(
                    UnsupportedNode {
                        at: node.span(),
                        name: what.to_owned(),
                    }
                    .into(),
                ),
            }
        }

        if errors.is_empty() {
            Ok(options)
        } else {
            Err(ParseError {
                src: ns,
                diagnostics: errors,
            })?
        }
    }
}

// Apply every property of an `iscsi` node, collecting failures
fn parse_iscsi(options: &mut IscsiOptions, node: &KdlNode) -> Vec<Error> {
    node.entries()
        .iter()
        .filter_map(|entry| parse_property(options, entry).err())
        .collect()
}

fn parse_property(options: &mut IscsiOptions, entry: &KdlEntry) -> Result<(), Error> {
    let Some(name) = entry.name() else {
        return Err(UnsupportedValue {
            at: entry.span(),
            advice: Some("iscsi options are named properties, e.g. iface=\"default\"".into()),
        })?;
    };
    let name = name.value();

    let parse = ISCSI_PROPERTIES.get(name).ok_or_else(|| UnsupportedProperty {
        at: entry.span(),
        name: name.to_owned(),
        advice: Some(format!(
            "supported properties are: {}",
            ISCSI_PROPERTIES.keys().copied().collect::<Vec<_>>().join(", ")
        )),
    })?;

    parse(options, entry, name)
}

fn invalid_type(entry: &KdlEntry, id: &str, expected_type: KdlType) -> Error {
    InvalidType {
        at: entry.span(),
        id: id.to_owned(),
        expected_type,
        found_type: KdlType::for_value(entry.value()),
    }
    .into()
}

fn get_str<'a>(entry: &'a KdlEntry, id: &str) -> Result<&'a str, Error> {
    entry
        .value()
        .as_string()
        .ok_or_else(|| invalid_type(entry, id, KdlType::String))
}

fn get_u32(entry: &KdlEntry, id: &str) -> Result<u32, Error> {
    let value = entry
        .value()
        .as_integer()
        .ok_or_else(|| invalid_type(entry, id, KdlType::Integer))?;
    u32::try_from(value).map_err(|_| {
        UnsupportedValue {
            at: entry.span(),
            advice: Some(format!("{id} must be between 0 and {}", u32::MAX)),
        }
        .into()
    })
}

fn parse_iface(options: &mut IscsiOptions, entry: &KdlEntry, id: &str) -> Result<(), Error> {
    let iface = get_str(entry, id)?;
    if iface.is_empty() {
        return Err(UnsupportedValue {
            at: entry.span(),
            advice: Some("the interface name cannot be empty".into()),
        })?;
    }
    options.iface = iface.to_owned();
    Ok(())
}

fn parse_initiator_file(options: &mut IscsiOptions, entry: &KdlEntry, id: &str) -> Result<(), Error> {
    options.initiator_file = PathBuf::from(get_str(entry, id)?);
    Ok(())
}

fn parse_poll_interval(options: &mut IscsiOptions, entry: &KdlEntry, id: &str) -> Result<(), Error> {
    options.poll_interval = Duration::from_millis(get_u32(entry, id)?.into());
    Ok(())
}

fn parse_settle_retries(options: &mut IscsiOptions, entry: &KdlEntry, id: &str) -> Result<(), Error> {
    options.settle_retries = get_u32(entry, id)?;
    Ok(())
}

fn parse_resolve_devices(options: &mut IscsiOptions, entry: &KdlEntry, id: &str) -> Result<(), Error> {
    options.resolve_devices = entry
        .value()
        .as_bool()
        .ok_or_else(|| invalid_type(entry, id, KdlType::Boolean))?;
    Ok(())
}
