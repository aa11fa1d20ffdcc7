// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{env, process::ExitCode, sync::Arc, time::Duration};

use log::{error, info, warn};

use crate::{
    CancellationSource,
    ci::CiClient,
    config::Config,
    errors::{ConfigError, RunError},
    pipeline,
    reporters::{build_reporters, publish_all},
    revision::Revision,
    store::create_store,
};

use super::cli::{CommonOptions, RunOptions};

/// Default secrets service behind the CI proxy.
const DEFAULT_SECRETS_URL: &str = "http://taskcluster/secrets/v1";

const EXIT_CONFIG: u8 = 1;
const EXIT_INGESTION: u8 = 2;
const EXIT_DEADLINE: u8 = 3;

// Design note: the `cli` function performs process-level wiring (config, env,
// exit codes) while delegating the actual run to library methods that return
// data structures.
pub async fn cli(_common: &CommonOptions, options: &RunOptions) -> ExitCode {
    let config = match load_config(options).await {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let (task_id, task_group_id) = match run_inputs() {
        Ok(inputs) => inputs,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let ci = match CiClient::new(&config.ci) {
        Ok(ci) => Arc::new(ci),
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let store = match config.backend() {
        Some((url, token)) => match create_store(url, token) {
            Ok(store) => Some(store),
            Err(e) => {
                error!("configuration error: {e}");
                return ExitCode::from(EXIT_CONFIG);
            }
        },
        None => {
            warn!("no backend configured, this analysis will not be recorded");
            None
        }
    };

    let (cancel_source, cancel) = CancellationSource::new();
    cancel_source.arm_deadline(Duration::from_secs(config.tuning.deadline_seconds));

    let revision = match Revision::from_review_task(&ci, &task_id, &cancel).await {
        Ok(revision) => revision,
        Err(e) => {
            error!("unable to load the revision under review: {e}");
            return ExitCode::from(EXIT_INGESTION);
        }
    };
    info!("analyzing {revision} from task group {task_group_id}");

    let summary = match pipeline::run(
        &config,
        &ci,
        store.as_ref(),
        &revision,
        &task_group_id,
        &cancel,
    )
    .await
    {
        Ok(summary) => summary,
        Err(RunError::Killed) => {
            error!("run killed: deadline exceeded");
            return ExitCode::from(EXIT_DEADLINE);
        }
        Err(RunError::Config(e)) => {
            error!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
        Err(e) => {
            error!("run failed: {e}");
            return ExitCode::from(EXIT_INGESTION);
        }
    };

    if cancel.is_cancelled() {
        // No reporter runs after cancellation; store writes were idempotent.
        error!("run killed: deadline exceeded before publication");
        return ExitCode::from(EXIT_DEADLINE);
    }

    // Store publication (inside the pipeline) happens-before any reporter.
    let reporters = build_reporters(&config, &ci);
    let all_ok = publish_all(&reporters, &summary, &revision, &cancel).await;
    if all_ok {
        info!(
            "analysis published: {} issues, {} publishable",
            summary.issues.len(),
            summary.publishable_count()
        );
    } else {
        warn!("analysis partially published; some reporters failed");
    }
    ExitCode::SUCCESS
}

async fn load_config(options: &RunOptions) -> Result<Config, ConfigError> {
    match (&options.configuration, &options.taskcluster_secret) {
        (Some(path), _) => Config::load(path),
        (None, Some(name)) => {
            let secrets_url = env::var("TASKCLUSTER_SECRETS_URL")
                .unwrap_or_else(|_| String::from(DEFAULT_SECRETS_URL));
            Config::load_secret(&secrets_url, name).await
        }
        (None, None) => Err(ConfigError::Invalid(String::from(
            "pass either --configuration or --taskcluster-secret",
        ))),
    }
}

fn run_inputs() -> Result<(String, String), ConfigError> {
    let task_id = env::var("TRY_TASK_ID")
        .map_err(|_| ConfigError::MissingEnvironment(String::from("TRY_TASK_ID")))?;
    let task_group_id = env::var("TRY_TASK_GROUP_ID")
        .map_err(|_| ConfigError::MissingEnvironment(String::from("TRY_TASK_GROUP_ID")))?;
    Ok((task_id, task_group_id))
}
