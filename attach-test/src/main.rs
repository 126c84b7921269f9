// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{env, fs, sync::Arc};

use blockdev::{Logger, SystemExecutor};
use log::{debug, info};
use switchboard::{ConnectRequest, Connector, Options};

/// Attaches a volume described by a JSON connect request:
/// - Loading connector options from an optional KDL file
/// - Building the connector for the request's transport
/// - Connecting and printing the response as JSON
///
/// Usage: `attach-test <request.json> [options.kdl]`
fn main() -> miette::Result<()> {
    pretty_env_logger::formatted_timed_builder()
        .filter_level(log::LevelFilter::Debug)
        .init();

    let mut args = env::args().skip(1);
    let Some(request_file) = args.next() else {
        return Err(miette::miette!("usage: attach-test <request.json> [options.kdl]"));
    };

    let options = match args.next() {
        Some(path) => {
            info!("Loading options from {path}");
            Options::new_for_path(path)?
        }
        None => Options::default(),
    };
    debug!("Options: {options:?}");

    let request = fs::read_to_string(&request_file).map_err(|e| miette::miette!("{request_file}: {e}"))?;
    let request: ConnectRequest =
        serde_json::from_str(&request).map_err(|e| miette::miette!("invalid request {request_file}: {e}"))?;
    info!("Attaching {request:?}");

    let connector = switchboard::new(request.kind(), &options, Arc::new(SystemExecutor), Logger::default())?;
    let response = connector.connect(&request)?;

    info!("Attached at {}", response.path.display());
    let json = serde_json::to_string_pretty(&response).map_err(|e| miette::miette!("{e}"))?;
    println!("{json}");

    Ok(())
}
