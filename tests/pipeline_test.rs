// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! End-to-end pipeline scenarios against a mock CI queue, exercising task
//! group traversal, parsing, classification, store publication and the
//! review-platform reporter.

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use actix_test::TestServer;
use actix_web::{App, HttpResponse, Responder, web};
use serde_json::json;

use reviewbot::CancellationToken;
use reviewbot::ci::CiClient;
use reviewbot::config::{CiConfig, Config, PlatformConfig, ReporterConfig, RepositoryConfig, Tuning};
use reviewbot::issues::Level;
use reviewbot::pipeline;
use reviewbot::reporters::{build_reporters, calc_stats, publish_all};
use reviewbot::revision::Revision;
use reviewbot::store::{IssueStore as _, IssueStoreDispatch, create_test_store};

const REVIEW_TASK: &str = "review-task-id";
const GROUP: &str = "group-id";

#[derive(Clone)]
struct MockTask {
    name: &'static str,
    state: &'static str,
    tags: Vec<(&'static str, &'static str)>,
    /// Artifact name → content; `None` content is declared-but-404.
    artifacts: Vec<(&'static str, Option<Vec<u8>>)>,
}

#[derive(Default)]
struct MockCi {
    tasks: Mutex<HashMap<String, MockTask>>,
}

impl MockCi {
    fn get(&self, id: &str) -> Option<MockTask> {
        self.tasks.lock().unwrap().get(id).cloned()
    }
}

async fn list_group(data: web::Data<MockCi>) -> impl Responder {
    let tasks: Vec<serde_json::Value> = data
        .tasks
        .lock()
        .unwrap()
        .iter()
        .map(|(id, task)| {
            json!({"status": {"taskId": id, "state": task.state, "runs": [{"runId": 0}]}})
        })
        .collect();
    HttpResponse::Ok().json(json!({ "tasks": tasks }))
}

async fn get_task(data: web::Data<MockCi>, path: web::Path<String>) -> impl Responder {
    match data.get(&path.into_inner()) {
        Some(task) => {
            let tags: HashMap<&str, &str> = task.tags.iter().copied().collect();
            HttpResponse::Ok().json(json!({"metadata": {"name": task.name}, "tags": tags}))
        }
        None => HttpResponse::NotFound().finish(),
    }
}

async fn get_status(data: web::Data<MockCi>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    match data.get(&id) {
        Some(task) => HttpResponse::Ok().json(
            json!({"status": {"taskId": id, "state": task.state, "runs": [{"runId": 0}]}}),
        ),
        None => HttpResponse::NotFound().finish(),
    }
}

async fn list_artifacts(
    data: web::Data<MockCi>,
    path: web::Path<(String, u32)>,
) -> impl Responder {
    let (id, _run) = path.into_inner();
    match data.get(&id) {
        Some(task) => {
            let artifacts: Vec<serde_json::Value> = task
                .artifacts
                .iter()
                .map(|(name, _)| json!({"name": name}))
                .collect();
            HttpResponse::Ok().json(json!({ "artifacts": artifacts }))
        }
        None => HttpResponse::NotFound().finish(),
    }
}

async fn get_artifact(
    data: web::Data<MockCi>,
    path: web::Path<(String, u32, String)>,
) -> impl Responder {
    let (id, _run, artifact) = path.into_inner();
    match data.get(&id) {
        Some(task) => {
            match task
                .artifacts
                .iter()
                .find(|(name, _)| *name == artifact)
                .and_then(|(_, content)| content.clone())
            {
                Some(content) => HttpResponse::Ok().body(content),
                None => HttpResponse::NotFound().finish(),
            }
        }
        None => HttpResponse::NotFound().finish(),
    }
}

fn start_mock_ci(tasks: Vec<(&'static str, MockTask)>) -> TestServer {
    let state = web::Data::new(MockCi::default());
    {
        let mut lock = state.tasks.lock().unwrap();
        for (id, task) in tasks {
            lock.insert(String::from(id), task);
        }
    }
    actix_test::start(move || {
        App::new()
            .app_data(state.clone())
            .route("/task-group/{group}/list", web::get().to(list_group))
            .route("/task/{id}", web::get().to(get_task))
            .route("/task/{id}/status", web::get().to(get_status))
            .route(
                "/task/{id}/runs/{run}/artifacts",
                web::get().to(list_artifacts),
            )
            .route(
                "/task/{id}/runs/{run}/artifacts/{path:.*}",
                web::get().to(get_artifact),
            )
    })
}

/// Review task carrying the revision metadata and the patch under review.
fn review_task(diff_id: &'static str, patch: &'static str) -> MockTask {
    MockTask {
        name: "code-review-build",
        state: "completed",
        tags: vec![
            ("review-provider", "review"),
            ("revision-id", "42"),
            ("diff-id", diff_id),
            ("revision-phid", "PHID-DREV-42"),
            ("title", "Fix the frobnicator"),
            ("bugzilla-id", "1500000"),
            ("author-email", "author@example.com"),
            ("repository", "test-repo"),
            ("target-repository", "test-try"),
            (
                "commit-hash",
                "0123456789abcdef0123456789abcdef01234567",
            ),
            ("build-id", "build-1"),
        ],
        artifacts: vec![("public/patch.diff", Some(patch.as_bytes().to_vec()))],
    }
}

fn test_config(queue_url: &str, results_dir: &str) -> Config {
    Config {
        app_channel: reviewbot::config::AppChannel::Testing,
        reporters: vec![ReporterConfig::Backend {
            url: String::from(":memory:"),
            credentials: None,
        }],
        repositories: vec![
            RepositoryConfig {
                slug: String::from("test-repo"),
                url: String::from("https://hg.example.com/test-repo"),
                try_url: None,
                checkout_mode: reviewbot::config::CheckoutMode::Default,
                ssh_user: None,
                decision_env_prefix: None,
            },
            RepositoryConfig {
                slug: String::from("test-try"),
                url: String::from("https://hg.example.com/test-try"),
                try_url: None,
                checkout_mode: reviewbot::config::CheckoutMode::Default,
                ssh_user: None,
                decision_env_prefix: None,
            },
        ],
        zero_coverage_enabled: false,
        before_after_ratio: 0.0,
        ci: CiConfig {
            queue_url: String::from(queue_url),
            index_url: None,
            notify_url: None,
            token: None,
        },
        platform: None,
        tuning: Tuning {
            results_dir: String::from(results_dir),
            ..Tuning::default()
        },
    }
}

async fn run_pipeline(
    config: &Config,
    _srv: &TestServer,
    store: Option<&IssueStoreDispatch>,
) -> (pipeline::RunSummary, Revision) {
    let ci = CiClient::new(&config.ci).expect("CI client");
    let cancel = CancellationToken::never();
    let revision = Revision::from_review_task(&ci, REVIEW_TASK, &cancel)
        .await
        .expect("revision must load from the review task");
    let summary = pipeline::run(config, &ci, store, &revision, GROUP, &cancel)
        .await
        .expect("pipeline run must succeed");
    (summary, revision)
}

const PATCH_8_12: &str = "--- a/src/a.js\n+++ b/src/a.js\n@@ -8,0 +8,5 @@\n+var a = 8;\n+var a = 9;\n+var a = 10;\n+var a = 11;\n+var a = 12;\n";

fn mozlint_task(artifact: serde_json::Value) -> MockTask {
    MockTask {
        name: "source-test-mozlint-eslint",
        state: "failed",
        tags: vec![],
        artifacts: vec![(
            "public/code-review/mozlint.json",
            Some(serde_json::to_vec(&artifact).unwrap()),
        )],
    }
}

#[tokio::test]
async fn single_mozlint_error_in_patch() {
    let artifact = json!({
        "src/a.js": [
            {"path": "src/a.js", "line": 10, "column": 1, "rule": "no-var",
             "level": "error", "message": "Unexpected var.", "linter": "eslint"}
        ]
    });
    let srv = start_mock_ci(vec![
        (REVIEW_TASK, review_task("1", PATCH_8_12)),
        ("mozlint-task", mozlint_task(artifact)),
    ]);
    let dir = tempdir::TempDir::new("reviewbot-e2e").unwrap();
    let config = test_config(&srv.url("/"), dir.path().to_str().unwrap());
    let store = create_test_store();

    let (summary, _revision) = run_pipeline(&config, &srv, Some(&store)).await;

    assert_eq!(summary.issues.len(), 1);
    let issue = &summary.issues[0];
    assert_eq!(issue.analyzer, "eslint");
    assert_eq!(issue.level, Level::Error);
    assert!(issue.in_patch);
    assert!(issue.publishable());
    assert_eq!(issue.hash.len(), 64);

    let stats = calc_stats(&summary.issues);
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].analyzer, "eslint");
    assert_eq!(stats[0].errors, 1);

    // The backend recorded the issue with its flags
    let stored = store.diff_issues(1, 1).await.unwrap();
    assert_eq!(stored.count, 1);
    assert!(stored.results[0].publishable);
}

#[tokio::test]
async fn warning_outside_patch_is_suppressed_but_stored() {
    let artifact = json!({
        "src/a.js": [
            {"path": "src/a.js", "line": 100, "column": 1, "rule": "no-var",
             "level": "warning", "message": "Unexpected var.", "linter": "eslint"}
        ]
    });
    let srv = start_mock_ci(vec![
        (REVIEW_TASK, review_task("1", PATCH_8_12)),
        ("mozlint-task", mozlint_task(artifact)),
    ]);
    let dir = tempdir::TempDir::new("reviewbot-e2e").unwrap();
    let config = test_config(&srv.url("/"), dir.path().to_str().unwrap());
    let store = create_test_store();

    let (summary, _revision) = run_pipeline(&config, &srv, Some(&store)).await;

    assert_eq!(summary.issues.len(), 1);
    let issue = &summary.issues[0];
    assert!(!issue.in_patch);
    assert!(!issue.publishable(), "warning outside the patch is suppressed");

    // Suppressed is not dropped: the backend still records the row
    let stored = store.diff_issues(1, 1).await.unwrap();
    assert_eq!(stored.count, 1);
    assert!(!stored.results[0].publishable);
}

#[tokio::test]
async fn clang_format_hunks_classify_against_patch() {
    // Replacement of lines 5-6 and an insertion at line 50
    let diff = "\
--- a/foo.cpp
+++ b/foo.cpp
@@ -5,2 +5,2 @@
-int  a ;
-int  b ;
+int a;
+int b;
@@ -49,0 +50,1 @@
+int c;
";
    // The review patch only touches lines 5-6 of foo.cpp
    let patch = "--- a/foo.cpp\n+++ b/foo.cpp\n@@ -5,2 +5,2 @@\n-int  a ;\n-int  b ;\n+int a;\n+int b;\n";
    let srv = start_mock_ci(vec![
        (REVIEW_TASK, review_task("1", patch)),
        (
            "clang-format-task",
            MockTask {
                name: "source-test-clang-format",
                state: "completed",
                tags: vec![],
                artifacts: vec![(
                    "public/code-review/clang-format.diff",
                    Some(diff.as_bytes().to_vec()),
                )],
            },
        ),
    ]);
    let dir = tempdir::TempDir::new("reviewbot-e2e").unwrap();
    let config = test_config(&srv.url("/"), dir.path().to_str().unwrap());

    let (summary, _revision) = run_pipeline(&config, &srv, None).await;

    assert_eq!(summary.issues.len(), 2);
    assert!(summary.issues.iter().all(|i| i.analyzer == "clang-format"));
    assert!(summary.issues.iter().all(|i| i.level == Level::Warning));

    let in_patch = summary.issues.iter().find(|i| i.line == Some(5)).unwrap();
    assert!(in_patch.in_patch && in_patch.publishable());
    let outside = summary.issues.iter().find(|i| i.line == Some(50)).unwrap();
    assert!(!outside.in_patch && !outside.publishable());
}

#[tokio::test]
async fn missing_artifact_degrades_to_synthetic_issue() {
    let good = json!({
        "src/a.js": [
            {"path": "src/a.js", "line": 10, "column": 1, "rule": "no-var",
             "level": "error", "message": "Unexpected var.", "linter": "eslint"}
        ]
    });
    let srv = start_mock_ci(vec![
        (REVIEW_TASK, review_task("1", PATCH_8_12)),
        ("mozlint-good", mozlint_task(good)),
        (
            "mozlint-broken",
            MockTask {
                name: "source-test-mozlint-flake8",
                state: "failed",
                tags: vec![],
                // Declared but 404 on fetch
                artifacts: vec![("public/code-review/mozlint.json", None)],
            },
        ),
    ]);
    let dir = tempdir::TempDir::new("reviewbot-e2e").unwrap();
    let config = test_config(&srv.url("/"), dir.path().to_str().unwrap());

    let (summary, _revision) = run_pipeline(&config, &srv, None).await;

    assert_eq!(summary.issues.len(), 2);
    let synthetic = summary
        .issues
        .iter()
        .find(|i| i.analyzer == "pipeline")
        .expect("synthetic pipeline issue for the missing artifact");
    assert_eq!(synthetic.check.as_deref(), Some("artifact-missing"));
    assert_eq!(synthetic.level, Level::Error);
    assert!(synthetic.publishable());

    // The healthy task was still processed
    assert!(summary.issues.iter().any(|i| i.analyzer == "eslint"));
}

#[tokio::test]
async fn cross_diff_new_for_revision() {
    // Diff 1 adds `int bad;` at line 20
    let patch_d1 = "--- a/a.c\n+++ b/a.c\n@@ -20,0 +20,1 @@\n+int bad;\n";
    let artifact_d1 = json!({
        "a.c": [
            {"path": "a.c", "line": 20, "column": 1, "rule": "unused",
             "level": "warning", "message": "unused declaration", "linter": "clang"}
        ]
    });
    let store = create_test_store();
    let dir = tempdir::TempDir::new("reviewbot-e2e").unwrap();

    {
        let srv = start_mock_ci(vec![
            (REVIEW_TASK, review_task("1", patch_d1)),
            ("mozlint-d1", mozlint_task(artifact_d1)),
        ]);
        let config = test_config(&srv.url("/"), dir.path().to_str().unwrap());
        let (summary, _) = run_pipeline(&config, &srv, Some(&store)).await;
        assert!(summary.issues[0].new_for_revision);
        assert!(summary.issues[0].publishable());
    }

    // Diff 2 of the same revision: the same line content drifted to line 22,
    // plus a genuinely new issue at line 30.
    let patch_d2 = "--- a/a.c\n+++ b/a.c\n@@ -22,0 +22,1 @@\n+int bad;\n@@ -30,0 +31,1 @@\n+int worse;\n";
    let artifact_d2 = json!({
        "a.c": [
            {"path": "a.c", "line": 22, "column": 1, "rule": "unused",
             "level": "warning", "message": "unused declaration", "linter": "clang"},
            {"path": "a.c", "line": 31, "column": 1, "rule": "unused",
             "level": "warning", "message": "another unused declaration", "linter": "clang"}
        ]
    });
    {
        let srv = start_mock_ci(vec![
            (REVIEW_TASK, review_task("2", patch_d2)),
            ("mozlint-d2", mozlint_task(artifact_d2)),
        ]);
        let config = test_config(&srv.url("/"), dir.path().to_str().unwrap());
        let (summary, _) = run_pipeline(&config, &srv, Some(&store)).await;

        assert_eq!(summary.issues.len(), 2);
        let recurring = summary
            .issues
            .iter()
            .find(|i| i.message == "unused declaration")
            .unwrap();
        let fresh = summary
            .issues
            .iter()
            .find(|i| i.message == "another unused declaration")
            .unwrap();
        assert!(
            !recurring.new_for_revision,
            "hash recurs from diff 1 despite the line drift"
        );
        assert!(!recurring.publishable());
        assert!(fresh.new_for_revision);
        assert!(fresh.publishable());
    }
}

// ---- review platform mock, for the retry-convergence scenario ----

struct MockPlatform {
    state: Mutex<String>,
    comments: AtomicUsize,
    findings: AtomicUsize,
}

fn start_mock_platform() -> (TestServer, web::Data<MockPlatform>) {
    let state = web::Data::new(MockPlatform {
        state: Mutex::new(String::from("work")),
        comments: AtomicUsize::new(0),
        findings: AtomicUsize::new(0),
    });
    let app_state = state.clone();
    let srv = actix_test::start(move || {
        App::new()
            .app_data(app_state.clone())
            .route(
                "/build/{id}/",
                web::get().to(|data: web::Data<MockPlatform>| async move {
                    let state = data.state.lock().unwrap().clone();
                    HttpResponse::Ok().json(json!({ "state": state }))
                }),
            )
            .route(
                "/build/{id}/findings/",
                web::post().to(
                    |data: web::Data<MockPlatform>, body: web::Json<serde_json::Value>| async move {
                        let count = body.as_array().map_or(0, Vec::len);
                        data.findings.fetch_add(count, Ordering::SeqCst);
                        HttpResponse::Ok().json(json!({}))
                    },
                ),
            )
            .route(
                "/build/{id}/state/",
                web::post().to(
                    |data: web::Data<MockPlatform>, body: web::Json<serde_json::Value>| async move {
                        let new_state = body["state"].as_str().unwrap_or("work").to_string();
                        *data.state.lock().unwrap() = new_state;
                        HttpResponse::Ok().json(json!({}))
                    },
                ),
            )
            .route(
                "/revision/{id}/comments/",
                web::post().to(|data: web::Data<MockPlatform>| async move {
                    data.comments.fetch_add(1, Ordering::SeqCst);
                    HttpResponse::Ok().json(json!({}))
                }),
            )
    });
    (srv, state)
}

#[tokio::test]
async fn task_failure_alone_does_not_fail_build() {
    // A failed analyzer task whose artifact holds no issues: the failure is
    // surfaced to reviewers, but only publishable issues may fail the build.
    let srv = start_mock_ci(vec![
        (REVIEW_TASK, review_task("1", PATCH_8_12)),
        ("mozlint-empty", mozlint_task(json!({}))),
    ]);
    let dir = tempdir::TempDir::new("reviewbot-e2e").unwrap();
    let (platform_srv, platform_state) = start_mock_platform();
    let mut config = test_config(&srv.url("/"), dir.path().to_str().unwrap());
    config.platform = Some(PlatformConfig {
        url: platform_srv.url("/"),
        token: None,
    });
    config.reporters.push(ReporterConfig::Platform {
        analyzers_skipped: vec![],
    });

    let (summary, revision) = run_pipeline(&config, &srv, None).await;
    assert!(summary.issues.is_empty());
    assert_eq!(summary.task_failures.len(), 1);
    assert_eq!(summary.task_failures[0].name, "source-test-mozlint-eslint");

    let ci = Arc::new(CiClient::new(&config.ci).unwrap());
    let reporters = build_reporters(&config, &ci);
    assert!(publish_all(&reporters, &summary, &revision, &CancellationToken::never()).await);

    // A comment documents the erroneous task, with no inline findings, and
    // the terminal build state is still pass.
    assert_eq!(platform_state.comments.load(Ordering::SeqCst), 1);
    assert_eq!(platform_state.findings.load(Ordering::SeqCst), 0);
    assert_eq!(*platform_state.state.lock().unwrap(), "pass");
}

#[tokio::test]
async fn retry_convergence_publishes_once() {
    let artifact = json!({
        "src/a.js": [
            {"path": "src/a.js", "line": 10, "column": 1, "rule": "no-var",
             "level": "error", "message": "Unexpected var.", "linter": "eslint"}
        ]
    });
    let store = create_test_store();
    let dir = tempdir::TempDir::new("reviewbot-e2e").unwrap();
    let (platform_srv, platform_state) = start_mock_platform();

    let mut first_hashes = Vec::new();
    for _run in 0..2 {
        let srv = start_mock_ci(vec![
            (REVIEW_TASK, review_task("1", PATCH_8_12)),
            ("mozlint-task", mozlint_task(artifact.clone())),
        ]);
        let mut config = test_config(&srv.url("/"), dir.path().to_str().unwrap());
        config.platform = Some(PlatformConfig {
            url: platform_srv.url("/"),
            token: None,
        });
        config.reporters.push(ReporterConfig::Platform {
            analyzers_skipped: vec![],
        });

        let (summary, revision) = run_pipeline(&config, &srv, Some(&store)).await;

        let ci = Arc::new(CiClient::new(&config.ci).unwrap());
        let reporters = build_reporters(&config, &ci);
        assert!(publish_all(&reporters, &summary, &revision, &CancellationToken::never()).await);

        let stored = store.diff_issues(1, 1).await.unwrap();
        let hashes: Vec<String> = stored.results.iter().map(|r| r.hash.clone()).collect();
        if first_hashes.is_empty() {
            first_hashes = hashes;
        } else {
            // Backend state is unchanged by the retried run
            assert_eq!(first_hashes, hashes);
        }
    }

    // The platform saw exactly one publication: the second run observed the
    // terminal build and returned AlreadyPublished.
    assert_eq!(platform_state.comments.load(Ordering::SeqCst), 1);
    assert_eq!(platform_state.findings.load(Ordering::SeqCst), 1);
    assert_eq!(*platform_state.state.lock().unwrap(), "fail");

    // The debug reporter wrote the per-analyzer raw artifact passthrough
    assert!(dir.path().join("eslint").join("issues.json").exists());
}
