// SPDX-License-Identifier: Apache-2.0

//! Only acknowledged lines make it into the registry on shutdown.

mod common;

use std::io::Write;
use std::time::Duration;

use tailstate::init::shipper::Shipper;
use tailstate::output::OutputKind;
use tailstate::registry::RegistryStore;
use tokio_util::sync::CancellationToken;

use common::{read_events, shipper_config, wait_for_events};

#[tokio::test]
async fn test_reachable_output_persists_last_delivered_line() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("logs")).unwrap();
    let log = dir.path().join("logs/busy.log");
    {
        let mut file = std::fs::File::create(&log).unwrap();
        for i in 0..5000 {
            writeln!(file, "line number {:05}", i).unwrap();
        }
    }

    let mut config = shipper_config(dir.path());
    config.harvester.harvester_buffer = 50;
    config.output_queue_size = 2;
    let registry = config.registry.clone();
    let out = config.output.file_path.clone();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Shipper::new(config).run(cancel.clone()));

    wait_for_events(&out, 1).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let events = read_events(&out);
    let last = events.last().unwrap();
    let end = last["log"]["offset"].as_u64().unwrap()
        + last["message"].as_str().unwrap().len() as u64
        + 1;

    let (_, states) = RegistryStore::inspect(&registry).unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].offset, end);
}

#[tokio::test]
async fn test_unreachable_output_leaves_registry_empty() {
    let dir = tempfile::tempdir().unwrap();
    common::write_log(dir.path());

    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut config = shipper_config(dir.path());
    config.output.kind = OutputKind::Tcp;
    config.output.tcp_endpoint = format!("127.0.0.1:{}", port);
    config.output.connect_timeout = Duration::from_millis(50);
    config.shutdown_timeout = Duration::from_millis(100);
    let registry = config.registry.clone();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Shipper::new(config).run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let (_, states) = RegistryStore::inspect(&registry).unwrap();
    assert!(states.is_empty());
}
