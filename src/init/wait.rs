// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tower::BoxError;
use tracing::error;

pub type TaskSet = JoinSet<Result<(), BoxError>>;

pub async fn wait_for_any_task(tasks: &mut TaskSet) -> Result<(), BoxError> {
    let r = tasks.join_next().await;

    match r {
        None => Ok(()), // should not happen
        Some(res) => res?,
    }
}

/// Join every task, returning the last task error seen
pub async fn wait_for_tasks(tasks: &mut TaskSet) -> Result<(), BoxError> {
    let mut result = Ok(());
    while let Some(v) = tasks.join_next().await {
        record(&mut result, v);
    }
    result
}

pub async fn wait_for_tasks_with_timeout(
    tasks: &mut TaskSet,
    timeout: Duration,
) -> Result<(), BoxError> {
    wait_for_tasks_with_deadline(tasks, Instant::now() + timeout).await
}

pub async fn wait_for_tasks_with_deadline(
    tasks: &mut TaskSet,
    stop_at: Instant,
) -> Result<(), BoxError> {
    let mut result = Ok(());
    loop {
        match timeout_at(stop_at, tasks.join_next()).await {
            Err(_) => {
                result = Err("timed out waiting for tasks to complete".into());
                break;
            }
            Ok(None) => break,
            Ok(Some(v)) => record(&mut result, v),
        }
    }

    result
}

fn record(
    result: &mut Result<(), BoxError>,
    joined: Result<Result<(), BoxError>, tokio::task::JoinError>,
) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => *result = Err(e),
        Err(e) => {
            error!("Failed to join with task: {:?}", e);
            *result = Err(e.into());
        }
    }
}
