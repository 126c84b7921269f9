// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{path::PathBuf, sync::Arc, time::Duration};

use blockdev::{
    mock::{MockExecutor, Reply},
    Logger,
};
use switchboard::{
    iscsi::{self, AuthMethod},
    ConnectRequest, Connector, Kind, Options, TransportResponse,
};
use test_log::test;

const INITIATORS: &str = "## managed by open-iscsi\nInitiatorName=iqn.2020-01.com.example:host1\n";

fn host() -> Arc<MockExecutor> {
    let mock = Arc::new(MockExecutor::new());
    mock.file(iscsi::INITIATOR_FILE, INITIATORS)
        .always("hostname", Reply::output("node1\n"))
        .always("iscsiadm", Reply::ok())
        .always("stat", Reply::fail("stat: cannot statx: No such file or directory"));
    mock
}

fn options() -> Options {
    let mut options = Options::default();
    options.iscsi.poll_interval = Duration::ZERO;
    options
}

fn chap_request() -> ConnectRequest {
    ConnectRequest::Iscsi(iscsi::ConnectRequest {
        portal: "10.0.0.1:3260".into(),
        target_iqn: "iqn.test:disk1".into(),
        lun: 0,
        auth_method: AuthMethod::from("chap"),
        chap_login: "u".into(),
        chap_password: "p".into(),
    })
}

#[test]
fn test_chap_connect_end_to_end() {
    let mock = host();
    let connector = switchboard::new(Kind::Iscsi, &options(), mock.clone(), Logger::default()).unwrap();
    mock.clear_calls();

    let response = connector.connect(&chap_request()).unwrap();

    assert_eq!(
        response.path,
        PathBuf::from("/dev/disk/by-path/ip-10.0.0.1:3260-iscsi-iqn.test:disk1lun-0")
    );
    assert_eq!(response.transport, TransportResponse::Iscsi(iscsi::ConnectResponse::default()));
    assert_eq!(response.mp_device, None);
    assert_eq!(response.blk_device, None);

    let calls: Vec<_> = mock.calls().iter().map(|c| c.command_line()).collect();
    assert_eq!(
        calls,
        vec![
            "stat /dev/disk/by-path/ip-10.0.0.1:3260-iscsi-iqn.test:disk1lun-0",
            "iscsiadm -m node -T iqn.test:disk1 -p 10.0.0.1:3260 --interface default --op new",
            "iscsiadm -m node -T iqn.test:disk1 -p 10.0.0.1:3260 --op=update --name node.session.auth.authmethod --value=CHAP",
            "iscsiadm -m node -T iqn.test:disk1 -p 10.0.0.1:3260 --op=update --name node.session.auth.username --value=u",
            "iscsiadm -m node -T iqn.test:disk1 -p 10.0.0.1:3260 --op=update --name node.session.auth.password --value=p",
            "iscsiadm -m node -T iqn.test:disk1 -p 10.0.0.1:3260 --login",
        ]
    );
}

#[test]
fn test_reconnect_is_idempotent() {
    let mock = host();
    let connector = switchboard::new(Kind::Iscsi, &options(), mock.clone(), Logger::default()).unwrap();

    let first = connector.connect(&chap_request()).unwrap();

    // the LUN is now visible
    mock.always("stat", Reply::ok());
    mock.clear_calls();

    let second = connector.connect(&chap_request()).unwrap();
    assert_eq!(first, second);
    assert!(mock.calls_to("iscsiadm").is_empty());
}

#[test]
fn test_failed_chap_step_is_resumable() {
    let mock = host();
    let connector = switchboard::new(Kind::Iscsi, &options(), mock.clone(), Logger::default()).unwrap();

    // node record and auth method succeed, the username update fails
    mock.reply("iscsiadm", Reply::ok())
        .reply("iscsiadm", Reply::ok())
        .reply("iscsiadm", Reply::fail("iscsiadm: Could not execute operation on all records"));
    assert!(connector.connect(&chap_request()).is_err());

    // a retry walks the whole sequence again
    mock.clear_calls();
    connector.connect(&chap_request()).unwrap();
    assert_eq!(mock.calls_to("iscsiadm").len(), 5);
}

#[test]
fn test_options_document_drives_connector() {
    let mock = host();
    mock.file("/run/initiatorname", "InitiatorName=iqn.2024-01.org.example:node7\n");
    let options = Options::new(
        "switchboard.kdl".into(),
        r#"iscsi iface="iface0" initiator-file="/run/initiatorname" poll-interval-ms=0"#.into(),
    )
    .unwrap();

    let connector = iscsi::IscsiConnector::new(options.iscsi, mock.clone(), Logger::default()).unwrap();
    assert_eq!(connector.config().iface, "iface0");
    assert_eq!(connector.config().initiator_iqns, vec!["iqn.2024-01.org.example:node7"]);
    assert_eq!(mock.calls_to("iscsiadm")[0].command_line(), "iscsiadm -m iface -I iface0 -o show");
}
