// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use futures::stream::{FuturesUnordered, StreamExt as _};
use log::{debug, info, warn};
use rand::Rng as _;
use tokio::sync::{Semaphore, mpsc};
use tracing::info_span;

use crate::{
    analyzers::{self, AnalyzerKind, AnalyzerParser as _, zero_coverage},
    cancel::CancellationToken,
    ci::{CiClient, TaskRecord, TaskState},
    config::Config,
    errors::{ArtifactError, IngestError, RunError},
    issues::{self, Issue},
    revision::Revision,
    store::{IssueStore as _, IssueStoreDispatch},
};

/// Progress of one task through the run. Transitions are monotonic: a task
/// never moves backwards, and a task already aggregated is never re-ingested
/// within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPhase {
    Discovered,
    Ingested,
    Parsed,
    Classified,
    Aggregated,
    FailedPermanent,
}

/// Single-writer record of per-task phases; shared for observability only.
#[derive(Default)]
pub struct TaskTracker {
    phases: Mutex<HashMap<String, TaskPhase>>,
}

impl TaskTracker {
    pub fn advance(&self, task_id: &str, phase: TaskPhase) {
        let mut phases = self.phases.lock().unwrap();
        let entry = phases
            .entry(String::from(task_id))
            .or_insert(TaskPhase::Discovered);
        // Monotonic: ignore any attempt to move a task backwards.
        if phase > *entry {
            *entry = phase;
        }
    }

    #[must_use]
    pub fn phase(&self, task_id: &str) -> Option<TaskPhase> {
        self.phases.lock().unwrap().get(task_id).copied()
    }

    #[must_use]
    pub fn count(&self, phase: TaskPhase) -> usize {
        self.phases
            .lock()
            .unwrap()
            .values()
            .filter(|p| **p == phase)
            .count()
    }
}

/// An erroneous analyzer task that produced neither issues nor a readable
/// artifact; surfaced to reviewers through the summary comment.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task_id: String,
    pub name: String,
}

/// One analyzer's artifact bytes, exactly as fetched; the debug reporter
/// writes these out as the per-analyzer `issues.json` passthrough.
#[derive(Debug, Clone)]
pub struct RawArtifact {
    pub analyzer: String,
    pub data: Vec<u8>,
}

/// Everything one run produced, ready for the reporters.
pub struct RunSummary {
    /// Aggregated, classified, deterministically ordered.
    pub issues: Vec<Issue>,
    pub task_failures: Vec<TaskFailure>,
    pub raw_artifacts: Vec<RawArtifact>,
    pub tracker: Arc<TaskTracker>,
}

impl RunSummary {
    #[must_use]
    pub fn publishable_count(&self) -> usize {
        self.issues.iter().filter(|i| i.publishable()).count()
    }
}

/// Work item handed from the ingestion workers to the parse/classify stage.
enum ParseItem {
    Artifact {
        task: TaskRecord,
        kind: AnalyzerKind,
        artifact_path: String,
        data: Vec<u8>,
    },
    Failed {
        task: TaskRecord,
        check: &'static str,
        message: String,
    },
}

/// Classify one parsed issue: stable fingerprint, patch membership, novelty.
pub fn classify(issue: &mut Issue, revision: &Revision, known_hashes: &HashSet<String>) {
    let source_line = revision.hash_source_line(issue);
    issue.hash = issues::fingerprint(
        &issue.analyzer,
        issue.check.as_deref(),
        &revision.base_repository,
        &issue.path,
        source_line.as_deref(),
        &issue.message,
    );
    issue.in_patch = revision.contains(issue);
    issue.new_for_revision = !known_hashes.contains(&issue.hash);
}

/// Fetch one task's definition and the artifact of its analyzer family.
async fn ingest_task(
    ci: &CiClient,
    task_id: &str,
    tracker: &TaskTracker,
    cancel: &CancellationToken,
) -> Result<Option<ParseItem>, IngestError> {
    let task = ci.get_task(task_id, cancel).await?;

    match task.state {
        TaskState::Pending | TaskState::Running => {
            debug!("skipping non-terminal task {} ({})", task.name, task_id);
            return Ok(None);
        }
        TaskState::Exception => {
            warn!("skipping exception-state task {} ({})", task.name, task_id);
            return Ok(None);
        }
        TaskState::Completed | TaskState::Failed => {}
    }

    let artifact_names = ci.list_artifacts(task_id, task.run_id, cancel).await?;
    let Some(kind) = analyzers::detect(&task.name, &artifact_names) else {
        debug!("task {} is not an analyzer task", task.name);
        return Ok(None);
    };

    // A failed task with its artifact still present is processed normally.
    for artifact_path in kind.artifacts() {
        match ci
            .get_artifact(task_id, task.run_id, artifact_path, cancel)
            .await
        {
            Ok(data) => {
                tracker.advance(task_id, TaskPhase::Ingested);
                return Ok(Some(ParseItem::Artifact {
                    task,
                    kind,
                    artifact_path: String::from(artifact_path),
                    data,
                }));
            }
            Err(ArtifactError::NotFound) => continue,
            Err(ArtifactError::Transport(IngestError::Fatal { status, message })) => {
                return Err(IngestError::Fatal { status, message });
            }
            Err(ArtifactError::Transport(IngestError::Cancelled)) => {
                return Err(IngestError::Cancelled);
            }
            Err(ArtifactError::Transport(e)) => {
                // Transient errors were already retried; degrade to a
                // synthetic issue instead of failing the whole run.
                return Ok(Some(ParseItem::Failed {
                    task,
                    check: "artifact-missing",
                    message: format!("artifact could not be fetched: {e}"),
                }));
            }
        }
    }

    Ok(Some(ParseItem::Failed {
        message: format!(
            "task declared none of the expected artifacts: {}",
            kind.artifacts().join(", ")
        ),
        task,
        check: "artifact-missing",
    }))
}

/// Walk the whole task group and produce the classified, aggregated issue
/// list, the erroneous tasks that yielded nothing, and the raw artifact
/// passthrough for the debug reporter.
pub async fn find_issues(
    config: &Config,
    ci: &CiClient,
    revision: &Revision,
    task_group_id: &str,
    known_hashes: &HashSet<String>,
    tracker: Arc<TaskTracker>,
    cancel: &CancellationToken,
) -> Result<(Vec<Issue>, Vec<TaskFailure>, Vec<RawArtifact>), IngestError> {
    let span = info_span!("find_issues", group = task_group_id);
    let _enter = span.enter();

    let refs = ci.list_group(task_group_id, cancel).await?;
    info!("loaded task group {task_group_id} with {} tasks", refs.len());

    let (tx, mut rx) = mpsc::channel::<ParseItem>(config.tuning.parse_queue);

    // Ingestion: bounded-parallel fetch feeding the bounded parse queue;
    // sends block when the queue is full, which is the backpressure bound.
    let producer = {
        let tracker = tracker.clone();
        async move {
            let semaphore = Arc::new(Semaphore::new(config.tuning.max_parallel_fetch));
            let mut pending = FuturesUnordered::new();
            for task_ref in &refs {
                if task_ref.task_id == revision.review_task_id {
                    continue;
                }
                tracker.advance(&task_ref.task_id, TaskPhase::Discovered);
                let semaphore = semaphore.clone();
                let tracker = &tracker;
                pending.push(async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .expect("semaphore is never closed");
                    ingest_task(ci, &task_ref.task_id, tracker, cancel).await
                });
            }
            while let Some(result) = pending.next().await {
                if let Some(item) = result? {
                    if tx.send(item).await.is_err() {
                        // Consumer is gone; only happens on shutdown.
                        break;
                    }
                }
            }

            // The zero-coverage analyzer runs off a cron index, not the task
            // group; once fetched it flows through the same dispatch queue as
            // every other analyzer. Its absence never degrades the run.
            if config.zero_coverage_enabled {
                match ci
                    .get_indexed_artifact(
                        zero_coverage::ZERO_COVERAGE_ROUTE,
                        zero_coverage::ZERO_COVERAGE_ARTIFACT,
                        cancel,
                    )
                    .await
                {
                    Ok(data) => {
                        let task = TaskRecord {
                            task_id: String::from(zero_coverage::ZERO_COVERAGE_ROUTE),
                            name: String::from("zero-coverage"),
                            tags: HashMap::new(),
                            state: TaskState::Completed,
                            run_id: 0,
                        };
                        tracker.advance(&task.task_id, TaskPhase::Ingested);
                        let item = ParseItem::Artifact {
                            task,
                            kind: AnalyzerKind::ZeroCoverage(zero_coverage::ZeroCoverageAnalyzer),
                            artifact_path: String::from(zero_coverage::ZERO_COVERAGE_ARTIFACT),
                            data,
                        };
                        let _ = tx.send(item).await;
                    }
                    Err(ArtifactError::Transport(IngestError::Cancelled)) => {
                        return Err(IngestError::Cancelled);
                    }
                    Err(e) => warn!("zero-coverage report unavailable: {e}"),
                }
            }
            Ok::<(), IngestError>(())
        }
    };

    // Parse & classify: a single consumer, so aggregation has one writer.
    let consumer = {
        let tracker = tracker.clone();
        async move {
            let mut issues: Vec<Issue> = Vec::new();
            let mut task_failures = Vec::new();
            let mut raw_artifacts: Vec<RawArtifact> = Vec::new();
            while let Some(item) = rx.recv().await {
                match item {
                    ParseItem::Artifact {
                        task,
                        kind,
                        artifact_path,
                        data,
                    } => {
                        let raw = RawArtifact {
                            analyzer: kind.name(),
                            data,
                        };
                        match kind.parse(&raw.data, &task, revision) {
                            Ok(mut task_issues) => {
                                tracker.advance(&task.task_id, TaskPhase::Parsed);
                                info!(
                                    "found {} issues in task {}",
                                    task_issues.len(),
                                    task.name
                                );
                                for issue in &mut task_issues {
                                    classify(issue, revision, known_hashes);
                                }
                                tracker.advance(&task.task_id, TaskPhase::Classified);
                                if task.state == TaskState::Failed && task_issues.is_empty() {
                                    // An erroneous task whose artifacts held
                                    // nothing is worth a human look.
                                    warn!(
                                        "failed task {} produced no issues from its artifacts",
                                        task.name
                                    );
                                    task_failures.push(TaskFailure {
                                        task_id: task.task_id.clone(),
                                        name: task.name.clone(),
                                    });
                                }
                                issues.append(&mut task_issues);
                                tracker.advance(&task.task_id, TaskPhase::Aggregated);
                            }
                            Err(e) => {
                                warn!("artifact of task {} failed to parse: {e}", task.name);
                                let mut synthetic = Issue::pipeline_error(
                                    "parse-error",
                                    artifact_path,
                                    format!("analyzer artifact failed to parse: {e}"),
                                );
                                classify(&mut synthetic, revision, known_hashes);
                                issues.push(synthetic);
                                tracker.advance(&task.task_id, TaskPhase::FailedPermanent);
                            }
                        }
                        raw_artifacts.push(raw);
                    }
                    ParseItem::Failed {
                        task,
                        check,
                        message,
                    } => {
                        warn!("task {} degraded: {message}", task.name);
                        let mut synthetic = Issue::pipeline_error(check, "", message);
                        classify(&mut synthetic, revision, known_hashes);
                        issues.push(synthetic);
                        tracker.advance(&task.task_id, TaskPhase::FailedPermanent);
                    }
                }
            }
            (issues, task_failures, raw_artifacts)
        }
    };

    let (produced, (issues, task_failures, raw_artifacts)) = tokio::join!(producer, consumer);
    produced?;

    Ok((issues::aggregate(issues), task_failures, raw_artifacts))
}

/// One end-to-end pipeline run: store bookkeeping, group traversal,
/// classification, aggregation, and the transactional issue publication.
///
/// Reporter dispatch stays with the caller; the store write happens-before
/// any external reporter.
pub async fn run(
    config: &Config,
    ci: &CiClient,
    store: Option<&IssueStoreDispatch>,
    revision: &Revision,
    task_group_id: &str,
    cancel: &CancellationToken,
) -> Result<RunSummary, RunError> {
    let tracker = Arc::new(TaskTracker::default());

    // Store first: repositories are seeded from configuration, then the
    // revision and diff rows exist before any issue is classified.
    if let Some(store) = store {
        for slug in [&revision.base_repository, &revision.head_repository] {
            let url = config
                .repository(slug)
                .map(|r| r.url.clone())
                .unwrap_or_else(|| format!("https://example.invalid/{slug}"));
            store.ensure_repository(slug, &url).await?;
        }
        store.publish_revision(revision).await?;
        store.publish_diff(revision).await?;
    }

    // Hashes from prior diffs of this revision drive `new_for_revision`.
    let mut known_hashes = HashSet::new();
    if let Some(store) = store {
        match store.known_hashes(revision.id, revision.diff_id).await {
            Ok(hashes) => known_hashes = hashes,
            Err(e) => warn!("unable to read prior hashes, treating all issues as new: {e}"),
        }

        // Best-effort refinement pass over the previous diff's issue list;
        // sampled, and never gates publication.
        if config.before_after_ratio > 0.0
            && rand::thread_rng().gen_bool(config.before_after_ratio)
        {
            match store.revision_diffs(revision.id, 1).await {
                Ok(page) => {
                    if let Some(previous) = page
                        .results
                        .iter()
                        .filter(|d| d.id < revision.diff_id)
                        .max_by_key(|d| d.id)
                    {
                        match store.diff_issues(previous.id, 1).await {
                            Ok(issues) => {
                                known_hashes.extend(issues.results.into_iter().map(|i| i.hash));
                            }
                            Err(e) => warn!("before/after pass skipped: {e}"),
                        }
                    }
                }
                Err(e) => warn!("before/after pass skipped: {e}"),
            }
        }
    }

    let (mut issues, task_failures, raw_artifacts) = find_issues(
        config,
        ci,
        revision,
        task_group_id,
        &known_hashes,
        tracker.clone(),
        cancel,
    )
    .await
    .map_err(|e| match e {
        IngestError::Cancelled => RunError::Killed,
        other => RunError::Ingest(other),
    })?;

    if cancel.is_cancelled() {
        return Err(RunError::Killed);
    }

    // Transactional per diff; a failure here fails the run (I5: the linked
    // set is never a subset of what the pipeline produced).
    if let Some(store) = store {
        let records = store.publish_issues(revision, &issues).await?;
        // The store recomputes novelty against its own history; adopt its
        // verdict so reporters and stored flags agree on retried runs.
        let by_hash: HashMap<String, bool> = records
            .into_iter()
            .map(|record| (record.hash, record.new_for_revision))
            .collect();
        for issue in &mut issues {
            if let Some(new_for_revision) = by_hash.get(&issue.hash) {
                issue.new_for_revision = *new_for_revision;
            }
        }
    }

    info!(
        "run produced {} issues ({} publishable), {} task failures",
        issues.len(),
        issues.iter().filter(|i| i.publishable()).count(),
        task_failures.len()
    );

    Ok(RunSummary {
        issues,
        task_failures,
        raw_artifacts,
        tracker,
    })
}
