// SPDX-License-Identifier: Apache-2.0

//! Resuming where the previous run, or a legacy registry, left off.

mod common;

use tailstate::init::shipper::Shipper;
use tailstate::registry::{FileIdentity, FileState, RegistryFormat, RegistryStore};
use tokio_util::sync::CancellationToken;

use common::{render_fixture, shipper_config, wait_for_events, write_log};

#[tokio::test]
async fn test_first_run_persists_end_of_file() {
    let dir = tempfile::tempdir().unwrap();
    let log = write_log(dir.path());
    let config = shipper_config(dir.path());
    let registry = config.registry.clone();
    let out = config.output.file_path.clone();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Shipper::new(config).run(cancel.clone()));

    let events = wait_for_events(&out, 2).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(events[0]["message"], "123456789");
    assert_eq!(events[1]["message"], "abcdefghi");
    assert_eq!(events[1]["log"]["offset"], 10);

    let (format, states) = RegistryStore::inspect(&registry).unwrap();
    assert_eq!(format, RegistryFormat::Current);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].offset, 20);
    assert_eq!(states[0].identity, FileIdentity::from_path(&log).unwrap());
}

#[tokio::test]
async fn test_restart_from_legacy_registry() {
    let dir = tempfile::tempdir().unwrap();
    let log = write_log(dir.path());
    let config = shipper_config(dir.path());
    let registry = config.registry.clone();
    let out = config.output.file_path.clone();

    // A 5.x release had shipped the first line
    std::fs::create_dir_all(&registry.data_path).unwrap();
    std::fs::write(registry.root(), render_fixture("5x.json", &log)).unwrap();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Shipper::new(config).run(cancel.clone()));

    wait_for_events(&out, 1).await;
    // Give a wrongly restarted harvester time to show up in the output
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let events = common::read_events(&out);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["message"], "abcdefghi");
    assert_eq!(events[0]["log"]["offset"], 10);
    assert_eq!(events[0]["log"]["file"]["path"], &*log.to_string_lossy());

    let (format, states) = RegistryStore::inspect(&registry).unwrap();
    assert_eq!(format, RegistryFormat::Current);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].offset, 20);
}

#[tokio::test]
async fn test_second_run_ships_only_appended_lines() {
    let dir = tempfile::tempdir().unwrap();
    let log = write_log(dir.path());
    let out = dir.path().join("out.ndjson");

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Shipper::new(shipper_config(dir.path())).run(cancel.clone()));
    wait_for_events(&out, 2).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(file, "third").unwrap();
    }

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Shipper::new(shipper_config(dir.path())).run(cancel.clone()));
    let events = wait_for_events(&out, 3).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let events_after = common::read_events(&out);
    assert_eq!(events_after.len(), 3);
    assert_eq!(events[2]["message"], "third");
    assert_eq!(events[2]["log"]["offset"], 20);

    let (_, states) = RegistryStore::inspect(&shipper_config(dir.path()).registry).unwrap();
    assert_eq!(states[0].offset, 26);
}

#[tokio::test]
async fn test_files_removed_while_stopped_are_cleaned() {
    let dir = tempfile::tempdir().unwrap();
    let log = write_log(dir.path());
    let config = shipper_config(dir.path());
    let registry = config.registry.clone();
    let out = config.output.file_path.clone();
    assert!(registry.clean_removed);

    {
        let store = RegistryStore::open(registry.clone()).unwrap();
        let gone = dir.path().join("logs/gone.log");
        store
            .upsert(FileState::new(
                FileIdentity::new(u64::MAX, 77),
                gone.to_string_lossy(),
                77,
            ))
            .unwrap();
        store.flush().unwrap();
    }

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Shipper::new(config).run(cancel.clone()));

    wait_for_events(&out, 2).await;
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let (_, states) = RegistryStore::inspect(&registry).unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].source, log.to_string_lossy());
    assert_eq!(states[0].offset, 20);
}
