// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    collections::{HashMap, HashSet},
    sync::OnceLock,
    time::Duration,
};

use log::{debug, warn};
use rand::Rng as _;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::{
    cancel::CancellationToken,
    config::CiConfig,
    errors::{ArtifactError, ConfigError, IngestError},
};

/// Cap on retry attempts for transient transport failures.
const MAX_ATTEMPTS: u32 = 5;

/// Process-wide HTTP client; reqwest maintains a bounded pool per host.
pub(crate) fn http_client() -> &'static Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::ClientBuilder::new()
            .gzip(true)
            .user_agent(format!("reviewbot ({})", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("static HTTP client construction cannot fail")
    })
}

/// Reference to a task inside a task group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskRef {
    pub task_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Exception,
}

impl TaskState {
    /// Non-terminal tasks have no artifacts worth reading yet.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Exception)
    }
}

/// Definition + status of one CI task.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: String,
    pub name: String,
    pub tags: HashMap<String, String>,
    pub state: TaskState,
    pub run_id: u32,
}

#[derive(Deserialize)]
struct ListGroupResponse {
    tasks: Vec<ListGroupEntry>,
    #[serde(rename = "continuationToken")]
    continuation_token: Option<String>,
}

#[derive(Deserialize)]
struct ListGroupEntry {
    status: StatusBody,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: StatusBody,
}

#[derive(Deserialize)]
struct StatusBody {
    #[serde(rename = "taskId")]
    task_id: String,
    state: TaskState,
    #[serde(default)]
    runs: Vec<RunBody>,
}

#[derive(Deserialize)]
struct RunBody {
    #[serde(rename = "runId")]
    run_id: u32,
}

#[derive(Deserialize)]
struct TaskDefinition {
    metadata: TaskMetadata,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Deserialize)]
struct TaskMetadata {
    #[serde(default)]
    name: String,
}

/// Client for the CI platform's queue, index, notify and secrets services.
///
/// All calls retry transient failures (5xx, timeouts, 429) with exponential
/// backoff and jitter, and abort cooperatively through the run's cancellation
/// token.
pub struct CiClient {
    queue_url: Url,
    index_url: Option<Url>,
    notify_url: Option<Url>,
    token: Option<String>,
}

impl CiClient {
    pub fn new(config: &CiConfig) -> Result<CiClient, ConfigError> {
        let parse = |url: &str| {
            Url::parse(url).map_err(|e| ConfigError::Invalid(format!("bad CI url `{url}`: {e}")))
        };
        Ok(CiClient {
            queue_url: parse(&config.queue_url)?,
            index_url: config.index_url.as_deref().map(parse).transpose()?,
            notify_url: config.notify_url.as_deref().map(parse).transpose()?,
            token: config.token.clone(),
        })
    }

    fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, IngestError> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|()| IngestError::BadResponse(String::from("CI base URL cannot take path segments")))?
            .extend(segments);
        Ok(url)
    }

    /// Issue one request with the shared retry policy.
    async fn request(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<Response, IngestError> {
        let client = http_client();
        let mut last_transient = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            if attempt > 0 {
                // 1s·2^k with ±25% jitter
                let base_ms = 1000u64 << (attempt - 1);
                let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let delay = Duration::from_millis(((base_ms as f64) * (1.0 + jitter)) as u64);
                debug!("retrying {url} in {delay:?} (attempt {attempt})");
                if !cancel.sleep(delay).await {
                    return Err(IngestError::Cancelled);
                }
            }

            let mut request = client.request(method.clone(), url.clone());
            if let Some(ref token) = self.token {
                request = request.bearer_auth(token);
            }
            if let Some(ref body) = body {
                request = request.json(body);
            }

            let response = tokio::select! {
                r = request.send() => r,
                () = cancel.cancelled() => return Err(IngestError::Cancelled),
            };
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(IngestError::Fatal {
                            status: status.as_u16(),
                            message: format!("{method} {url}"),
                        });
                    }
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        last_transient = format!("{method} {url} returned {status}");
                        warn!("{last_transient}");
                        continue;
                    }
                    // Remaining 4xx are permanent.
                    return Err(IngestError::BadResponse(format!(
                        "{method} {url} returned {status}"
                    )));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_transient = format!("{method} {url} failed: {e}");
                    warn!("{last_transient}");
                }
                Err(e) => {
                    return Err(IngestError::BadResponse(format!("{method} {url} failed: {e}")));
                }
            }
        }
        Err(IngestError::Transient(last_transient))
    }

    /// Enumerate the tasks of a group, following continuation tokens and
    /// de-duplicating by task id.
    pub async fn list_group(
        &self,
        task_group_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<TaskRef>, IngestError> {
        let mut refs = Vec::new();
        let mut seen = HashSet::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut url = Self::endpoint(&self.queue_url, &["task-group", task_group_id, "list"])?;
            if let Some(ref token) = continuation {
                url.query_pairs_mut().append_pair("continuationToken", token);
            }
            debug!("HTTP request GET {url}");
            let response = self.request(Method::GET, url, None, cancel).await?;
            let page = response
                .json::<ListGroupResponse>()
                .await
                .map_err(|e| IngestError::BadResponse(format!("parsing task group listing: {e}")))?;
            for entry in page.tasks {
                if seen.insert(entry.status.task_id.clone()) {
                    refs.push(TaskRef {
                        task_id: entry.status.task_id,
                    });
                }
            }
            match page.continuation_token {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        debug!("task group {task_group_id} has {} tasks", refs.len());
        Ok(refs)
    }

    /// Fetch one task's definition and status.
    pub async fn get_task(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TaskRecord, IngestError> {
        let definition_url = Self::endpoint(&self.queue_url, &["task", task_id])?;
        debug!("HTTP request GET {definition_url}");
        let definition = self
            .request(Method::GET, definition_url, None, cancel)
            .await?
            .json::<TaskDefinition>()
            .await
            .map_err(|e| IngestError::BadResponse(format!("parsing task definition: {e}")))?;

        let status_url = Self::endpoint(&self.queue_url, &["task", task_id, "status"])?;
        debug!("HTTP request GET {status_url}");
        let status = self
            .request(Method::GET, status_url, None, cancel)
            .await?
            .json::<StatusResponse>()
            .await
            .map_err(|e| IngestError::BadResponse(format!("parsing task status: {e}")))?;

        Ok(TaskRecord {
            task_id: String::from(task_id),
            name: definition.metadata.name,
            tags: definition.tags,
            state: status.status.state,
            run_id: status.status.runs.last().map_or(0, |run| run.run_id),
        })
    }

    /// Names of the artifacts a task declared on its latest run.
    pub async fn list_artifacts(
        &self,
        task_id: &str,
        run_id: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, IngestError> {
        #[derive(Deserialize)]
        struct ArtifactsResponse {
            artifacts: Vec<ArtifactEntry>,
        }
        #[derive(Deserialize)]
        struct ArtifactEntry {
            name: String,
        }

        let run_id = run_id.to_string();
        let url = Self::endpoint(
            &self.queue_url,
            &["task", task_id, "runs", &run_id, "artifacts"],
        )?;
        debug!("HTTP request GET {url}");
        let response = self
            .request(Method::GET, url, None, cancel)
            .await?
            .json::<ArtifactsResponse>()
            .await
            .map_err(|e| IngestError::BadResponse(format!("parsing artifact listing: {e}")))?;
        Ok(response.artifacts.into_iter().map(|a| a.name).collect())
    }

    /// Fetch a declared output artifact; the caller interprets the bytes.
    pub async fn get_artifact(
        &self,
        task_id: &str,
        run_id: u32,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ArtifactError> {
        let mut segments = vec!["task", task_id];
        let run_id = run_id.to_string();
        segments.push("runs");
        segments.push(&run_id);
        segments.push("artifacts");
        segments.extend(path.split('/'));
        let url = Self::endpoint(&self.queue_url, &segments)?;
        debug!("HTTP request GET {url}");
        match self.request(Method::GET, url, None, cancel).await {
            Ok(response) => Ok(response
                .bytes()
                .await
                .map_err(|e| {
                    ArtifactError::Transport(IngestError::BadResponse(format!(
                        "reading artifact body: {e}"
                    )))
                })?
                .to_vec()),
            Err(IngestError::BadResponse(message)) if message.contains("404") => {
                Err(ArtifactError::NotFound)
            }
            Err(e) => Err(ArtifactError::Transport(e)),
        }
    }

    /// Fetch an artifact from the latest task behind an index route, eg. the
    /// zero-coverage cron report.
    pub async fn get_indexed_artifact(
        &self,
        route: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ArtifactError> {
        let Some(ref index_url) = self.index_url else {
            return Err(ArtifactError::NotFound);
        };
        let mut segments = vec!["task", route, "artifacts"];
        segments.extend(path.split('/'));
        let url = Self::endpoint(index_url, &segments)?;
        debug!("HTTP request GET {url}");
        match self.request(Method::GET, url, None, cancel).await {
            Ok(response) => Ok(response
                .bytes()
                .await
                .map_err(|e| {
                    ArtifactError::Transport(IngestError::BadResponse(format!(
                        "reading indexed artifact body: {e}"
                    )))
                })?
                .to_vec()),
            Err(IngestError::BadResponse(message)) if message.contains("404") => {
                Err(ArtifactError::NotFound)
            }
            Err(e) => Err(ArtifactError::Transport(e)),
        }
    }

    /// Send an email through the CI notification service.
    pub async fn notify_email(
        &self,
        address: &str,
        subject: &str,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        let Some(ref notify_url) = self.notify_url else {
            warn!("no notify service configured, dropping email to {address}");
            return Ok(());
        };
        let url = Self::endpoint(notify_url, &["email"])?;
        debug!("HTTP request POST {url}");
        self.request(
            Method::POST,
            url,
            Some(json!({
                "address": address,
                "subject": subject,
                "content": content,
                "template": "fullscreen",
            })),
            cancel,
        )
        .await?;
        Ok(())
    }

}
