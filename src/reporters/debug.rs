// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::PathBuf};

use log::info;
use serde_json::json;

use crate::{
    cancel::CancellationToken,
    errors::ReporterError,
    pipeline::RunSummary,
    revision::Revision,
};

use super::{PublishOutcome, Reporter, calc_stats};

/// Always-on reporter writing the run's artifacts into the results
/// directory: `report.json` with the flagged issue list, one raw
/// `issues.json` passthrough per analyzer, and a human-readable `summary.md`.
pub struct DebugReporter {
    output_dir: PathBuf,
}

impl DebugReporter {
    #[must_use]
    pub fn new(output_dir: &str) -> DebugReporter {
        DebugReporter {
            output_dir: PathBuf::from(output_dir),
        }
    }

    fn report_json(summary: &RunSummary, revision: &Revision) -> serde_json::Value {
        json!({
            "revision": {
                "id": revision.id,
                "diff_id": revision.diff_id,
                "title": revision.title,
                "repository": revision.base_repository,
            },
            "issues": summary
                .issues
                .iter()
                .map(|issue| {
                    json!({
                        "analyzer": issue.analyzer,
                        "check": issue.check,
                        "path": issue.path,
                        "line": issue.line,
                        "nb_lines": issue.nb_lines,
                        "char": issue.column,
                        "level": issue.level,
                        "message": issue.message,
                        "hash": issue.hash,
                        "in_patch": issue.in_patch,
                        "new_for_revision": issue.new_for_revision,
                        "publishable": issue.publishable(),
                    })
                })
                .collect::<Vec<_>>(),
            "task_failures": summary
                .task_failures
                .iter()
                .map(|failure| json!({"id": failure.task_id, "name": failure.name}))
                .collect::<Vec<_>>(),
        })
    }

    fn summary_markdown(summary: &RunSummary, revision: &Revision) -> String {
        let mut out = format!(
            "# Analysis of {revision}\n\n{} issues, {} publishable\n\n## Analyzers\n\n",
            summary.issues.len(),
            summary.publishable_count(),
        );
        for stat in calc_stats(&summary.issues) {
            out.push_str(&format!(
                "- {}: {} total, {} publishable, {} errors\n",
                stat.analyzer, stat.total, stat.publishable, stat.errors
            ));
        }
        out.push_str("\n## Issues\n\n");
        for issue in &summary.issues {
            out.push_str(&format!("- {issue}\n"));
        }
        out
    }
}

impl Reporter for DebugReporter {
    fn name(&self) -> &'static str {
        "debug"
    }

    async fn publish(
        &self,
        summary: &RunSummary,
        revision: &Revision,
        _cancel: &CancellationToken,
    ) -> Result<PublishOutcome, ReporterError> {
        fs::create_dir_all(&self.output_dir)?;

        let report_path = self.output_dir.join("report.json");
        fs::write(
            &report_path,
            serde_json::to_string_pretty(&Self::report_json(summary, revision))?,
        )?;

        // Raw per-analyzer passthrough, one directory per analyzer since
        // every file keeps the canonical issues.json name.
        for artifact in &summary.raw_artifacts {
            let analyzer_dir = self.output_dir.join(&artifact.analyzer);
            fs::create_dir_all(&analyzer_dir)?;
            fs::write(analyzer_dir.join("issues.json"), &artifact.data)?;
        }

        let summary_path = self.output_dir.join("summary.md");
        fs::write(&summary_path, Self::summary_markdown(summary, revision))?;

        info!("wrote run artifacts into {}", self.output_dir.display());
        Ok(PublishOutcome::Published)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempdir::TempDir;

    use super::*;
    use crate::{
        analyzers::test_support::test_revision,
        cancel::CancellationToken,
        issues::{Issue, Level},
        pipeline::{RawArtifact, RunSummary, TaskTracker},
    };

    #[tokio::test]
    async fn writes_report_passthrough_and_summary() {
        let dir = TempDir::new("reviewbot-debug").unwrap();
        let reporter = DebugReporter::new(dir.path().to_str().unwrap());

        let mut issue = Issue::new(
            "eslint",
            Some(String::from("no-var")),
            "src/a.js",
            Some(10),
            1,
            Level::Error,
            "Unexpected var.",
        );
        issue.hash = String::from("abc123");
        let raw = br#"{"src/a.js": []}"#;
        let summary = RunSummary {
            issues: vec![issue],
            task_failures: vec![],
            raw_artifacts: vec![RawArtifact {
                analyzer: String::from("eslint"),
                data: raw.to_vec(),
            }],
            tracker: Arc::new(TaskTracker::default()),
        };

        let outcome = reporter
            .publish(&summary, &test_revision(), &CancellationToken::never())
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Published);

        let report: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("report.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(report["issues"][0]["hash"], "abc123");
        assert_eq!(report["issues"][0]["publishable"], true);

        // One issues.json per analyzer, byte-identical to the artifact
        let passthrough =
            std::fs::read(dir.path().join("eslint").join("issues.json")).unwrap();
        assert_eq!(passthrough, raw.to_vec());

        let markdown = std::fs::read_to_string(dir.path().join("summary.md")).unwrap();
        assert!(markdown.contains("eslint"));
    }
}
