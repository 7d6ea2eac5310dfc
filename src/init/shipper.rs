// SPDX-License-Identifier: Apache-2.0

//! Wires the registry, registrar, crawler and output together and runs the
//! ordered shutdown that keeps the registry consistent with what the output
//! actually received.

use std::time::Duration;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{error, info, warn};

use crate::bounded_channel::bounded;
use crate::harvester::{Crawler, HarvesterConfig, Registrar};
use crate::init::wait::{self, TaskSet};
use crate::output::{Output, OutputConfig, Sink};
use crate::registry::{RegistryConfig, RegistryStore};

/// Upper bound for the crawler to stop its harvesters
const CRAWLER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ShipperConfig {
    pub registry: RegistryConfig,
    pub harvester: HarvesterConfig,
    pub output: OutputConfig,
    /// Time the output gets to publish in-flight batches on shutdown
    pub shutdown_timeout: Duration,
    pub output_queue_size: usize,
    pub registrar_queue_size: usize,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            harvester: HarvesterConfig::default(),
            output: OutputConfig::default(),
            shutdown_timeout: Duration::ZERO,
            output_queue_size: 16,
            registrar_queue_size: 1024,
        }
    }
}

pub struct Shipper {
    config: ShipperConfig,
}

impl Shipper {
    pub fn new(config: ShipperConfig) -> Self {
        Self { config }
    }

    /// Ship lines until `cancel_token` fires or a task fails.
    ///
    /// Returns only after the registrar has written its final state, and
    /// fails if that last flush failed.
    pub async fn run(self, cancel_token: CancellationToken) -> Result<(), BoxError> {
        let config = self.config;
        config.harvester.validate()?;

        let store = match RegistryStore::open(config.registry.clone()) {
            Ok(store) => store,
            Err(e) => {
                error!(error = %e, "Could not start registrar");
                return Err(e.into());
            }
        };
        info!(
            registry = %store.data_file().display(),
            states = store.len()?,
            "Registry loaded"
        );

        let (registrar_tx, registrar_rx) = bounded(config.registrar_queue_size);
        let (output_tx, output_rx) = bounded(config.output_queue_size);

        let crawler = Crawler::new(
            config.harvester.clone(),
            store.clone(),
            registrar_tx.clone(),
            output_tx,
        )?;
        let output = Output::new(
            Sink::from_config(&config.output),
            output_rx,
            registrar_tx,
            config.output.retry_backoff,
        );
        let registrar = Registrar::new(store, registrar_rx);

        let registrar_token = CancellationToken::new();
        let output_token = CancellationToken::new();
        let crawler_token = CancellationToken::new();

        let mut registrar_task = TaskSet::new();
        let mut output_task = TaskSet::new();
        let mut crawler_task = TaskSet::new();

        {
            let token = registrar_token.clone();
            registrar_task
                .spawn(async move { registrar.run(token).await.map_err(BoxError::from) });
        }
        output_task.spawn(output.run(output_token.clone()));
        crawler_task.spawn(crawler.run(crawler_token.clone()));

        let mut result: Result<(), BoxError> = Ok(());
        select! {
            _ = cancel_token.cancelled() => {
                info!("Shutdown requested, stopping crawler");
            }
            e = wait::wait_for_any_task(&mut crawler_task) => {
                if let Err(e) = e {
                    error!(error = %e, "Crawler failed");
                    result = Err(e);
                } else {
                    warn!("Unexpected early exit of crawler");
                }
            }
            e = wait::wait_for_any_task(&mut output_task) => {
                if let Err(e) = e {
                    error!(error = %e, "Output failed");
                    result = Err(e);
                } else {
                    warn!("Unexpected early exit of output");
                }
            }
            e = wait::wait_for_any_task(&mut registrar_task) => {
                if let Err(e) = e {
                    error!(error = %e, "Registrar failed");
                    result = Err(e);
                } else {
                    warn!("Unexpected early exit of registrar");
                }
            }
        }

        // Harvesters stop first so no new lines are published.
        crawler_token.cancel();
        if let Err(e) =
            wait::wait_for_tasks_with_timeout(&mut crawler_task, CRAWLER_STOP_TIMEOUT).await
        {
            warn!(error = %e, "Crawler did not stop cleanly");
            crawler_task.abort_all();
            keep_first(&mut result, e);
        }

        // Once every harvester is gone the output ends by itself after
        // publishing what is queued.
        let drained = tokio::time::timeout(
            config.shutdown_timeout,
            wait::wait_for_tasks(&mut output_task),
        )
        .await;
        match drained {
            Ok(res) => {
                if let Err(e) = res {
                    keep_first(&mut result, e);
                }
            }
            Err(_) => {
                info!(
                    shutdown_timeout = ?config.shutdown_timeout,
                    "Shutdown timeout reached, dropping unpublished lines"
                );
                output_token.cancel();
                if let Err(e) = wait::wait_for_tasks(&mut output_task).await {
                    keep_first(&mut result, e);
                }
            }
        }

        // The registrar drains every queued acknowledgement before its final flush.
        registrar_token.cancel();
        match wait::wait_for_tasks(&mut registrar_task).await {
            Ok(()) => info!("Registrar stopped"),
            Err(e) => {
                error!(error = %e, "Final registry flush failed");
                keep_first(&mut result, e);
            }
        }

        result
    }
}

fn keep_first(result: &mut Result<(), BoxError>, e: BoxError) {
    if result.is_ok() {
        *result = Err(e);
    }
}
