// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tailstate::harvester::{HarvesterConfig, StartAt};
use tailstate::init::shipper::ShipperConfig;
use tailstate::output::{OutputConfig, OutputKind};
use tailstate::registry::{FileIdentity, RegistryConfig};

/// Two lines, ten bytes each
pub const LOG_CONTENT: &str = "123456789\nabcdefghi\n";

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/registry")
        .join(name)
}

/// Load a registry fixture with its placeholders filled in for `source`
pub fn render_fixture(name: &str, source: &Path) -> String {
    let identity = FileIdentity::from_path(source).unwrap();
    std::fs::read_to_string(fixture_path(name))
        .unwrap()
        .replace("{{source}}", &source.to_string_lossy())
        .replace("{{inode}}", &identity.inode.to_string())
        .replace("{{device}}", &identity.device.to_string())
}

/// Write the sample log under `<dir>/logs`
pub fn write_log(dir: &Path) -> PathBuf {
    std::fs::create_dir_all(dir.join("logs")).unwrap();
    let log = dir.join("logs/app.log");
    std::fs::write(&log, LOG_CONTENT).unwrap();
    log
}

pub fn registry_config(dir: &Path) -> RegistryConfig {
    let mut config = RegistryConfig::with_data_path(dir.join("data"));
    config.flush_interval = Duration::from_millis(20);
    config
}

/// Shipper tailing `<dir>/logs/*.log` into `<dir>/out.ndjson`
pub fn shipper_config(dir: &Path) -> ShipperConfig {
    ShipperConfig {
        registry: registry_config(dir),
        harvester: HarvesterConfig {
            include: vec![dir.join("logs/*.log").to_string_lossy().into_owned()],
            start_at: StartAt::Beginning,
            scan_frequency: Duration::from_millis(20),
            backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            ..Default::default()
        },
        output: OutputConfig {
            kind: OutputKind::File,
            file_path: dir.join("out.ndjson"),
            retry_backoff: Duration::from_millis(10),
            ..Default::default()
        },
        shutdown_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

pub fn read_events(path: &Path) -> Vec<serde_json::Value> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Poll the output file until it holds at least `count` events
pub async fn wait_for_events(path: &Path, count: usize) -> Vec<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let events = read_events(path);
        if events.len() >= count {
            return events;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {} events in {:?}, found {}",
            count,
            path,
            events.len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
