// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::Arc;

use log::info;

use crate::{
    cancel::CancellationToken,
    ci::CiClient,
    config::AppChannel,
    errors::ReporterError,
    pipeline::RunSummary,
    revision::Revision,
};

use super::{PublishOutcome, Reporter, calc_stats};

/// Emails longer than this are truncated by the notification service.
const CONTENT_LIMIT: usize = 102_400;

/// Sends one digest email per configured address through the CI notification
/// service. The digest includes every issue, publishable or not.
pub struct MailReporter {
    emails: Vec<String>,
    channel: AppChannel,
    ci: Arc<CiClient>,
}

impl MailReporter {
    #[must_use]
    pub fn new(emails: Vec<String>, channel: AppChannel, ci: Arc<CiClient>) -> MailReporter {
        info!("mail reporter enabled for {} addresses", emails.len());
        MailReporter {
            emails,
            channel,
            ci,
        }
    }

    fn build_content(summary: &RunSummary, revision: &Revision) -> String {
        let publishable = summary.publishable_count();
        let stats = calc_stats(&summary.issues)
            .iter()
            .map(|stat| {
                format!(
                    "* **{}**: {} publishable ({} total)",
                    stat.analyzer, stat.publishable, stat.total
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut content = format!(
            "# Found {publishable} publishable issues ({} total)\n\n{stats}\n\nReview: {revision}\n\n",
            summary.issues.len(),
        );
        let build_errors = summary
            .issues
            .iter()
            .filter(|i| i.is_build_error())
            .count();
        if build_errors > 0 {
            content.push_str(&format!(
                "## Errors\n\nThe pipeline hit {build_errors} errors during this analysis; results below may be incomplete.\n\n"
            ));
        }
        if !summary.task_failures.is_empty() {
            content.push_str("## Task failures:\n\n");
            for failure in &summary.task_failures {
                content.push_str(&format!("* {} ({})\n", failure.name, failure.task_id));
            }
            content.push('\n');
        }
        content.push_str(
            &summary
                .issues
                .iter()
                .map(crate::issues::Issue::as_markdown)
                .collect::<Vec<_>>()
                .join("\n\n"),
        );
        if content.len() > CONTENT_LIMIT {
            let mut cut = CONTENT_LIMIT - 400;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            content.push_str("\n\n... Content max limit reached!");
        }
        content
    }
}

impl Reporter for MailReporter {
    fn name(&self) -> &'static str {
        "mail"
    }

    async fn publish(
        &self,
        summary: &RunSummary,
        revision: &Revision,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome, ReporterError> {
        if self.emails.is_empty() {
            return Ok(PublishOutcome::Skipped);
        }

        let subject = format!(
            "[{}] New static analysis {revision}",
            self.channel.as_str()
        );
        let content = Self::build_content(summary, revision);

        for email in &self.emails {
            self.ci
                .notify_email(email, &subject, &content, cancel)
                .await
                .map_err(|e| ReporterError::Notify(e.to_string()))?;
        }
        info!("sent digest email to {} addresses", self.emails.len());
        Ok(PublishOutcome::Published)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        analyzers::test_support::test_revision,
        issues::{Issue, Level},
        pipeline::{RunSummary, TaskTracker},
    };

    fn summary_with(issues: Vec<Issue>) -> RunSummary {
        RunSummary {
            issues,
            task_failures: vec![],
            raw_artifacts: vec![],
            tracker: Arc::new(TaskTracker::default()),
        }
    }

    #[test]
    fn digest_contains_every_issue() {
        let mut publishable = Issue::new("eslint", None, "a.js", Some(1), 1, Level::Error, "boom");
        publishable.in_patch = true;
        let suppressed = Issue::new("eslint", None, "b.js", Some(9), 1, Level::Warning, "meh");

        let summary = summary_with(vec![publishable, suppressed]);
        let content = MailReporter::build_content(&summary, &test_revision());
        assert!(content.contains("Found 1 publishable issues (2 total)"));
        assert!(content.contains("a.js"));
        // Unpublishable issues still appear in the digest
        assert!(content.contains("b.js"));
    }

    #[test]
    fn digest_is_truncated() {
        let issues: Vec<Issue> = (0..2000)
            .map(|i| {
                Issue::new(
                    "eslint",
                    None,
                    format!("file-{i}.js"),
                    Some(1),
                    1,
                    Level::Warning,
                    "some repeated message to inflate the digest body",
                )
            })
            .collect();
        let summary = summary_with(issues);
        let content = MailReporter::build_content(&summary, &test_revision());
        assert!(content.len() <= CONTENT_LIMIT);
        assert!(content.ends_with("Content max limit reached!"));
    }
}
