// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::Arc;

use log::info;

use crate::{
    cancel::CancellationToken,
    ci::CiClient,
    errors::ReporterError,
    pipeline::RunSummary,
    revision::Revision,
};

use super::{PublishOutcome, Reporter};

/// Emails the revision author when the analysis surfaced build errors, so
/// broken builds reach the developer even if they never open the review.
pub struct BuildErrorsReporter {
    ci: Arc<CiClient>,
}

impl BuildErrorsReporter {
    #[must_use]
    pub fn new(ci: Arc<CiClient>) -> BuildErrorsReporter {
        info!("build errors reporter enabled");
        BuildErrorsReporter { ci }
    }
}

impl Reporter for BuildErrorsReporter {
    fn name(&self) -> &'static str {
        "build-errors"
    }

    async fn publish(
        &self,
        summary: &RunSummary,
        revision: &Revision,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome, ReporterError> {
        let build_errors: Vec<_> = summary
            .issues
            .iter()
            .filter(|issue| issue.is_build_error())
            .collect();
        if build_errors.is_empty() {
            return Ok(PublishOutcome::Skipped);
        }

        let Some(ref author) = revision.author_email else {
            log::warn!("build errors present but no author email on {revision}");
            return Ok(PublishOutcome::Skipped);
        };

        let subject = format!(
            "Code review found {} build errors on {revision}",
            build_errors.len()
        );
        let content = format!(
            "# Found {} build errors on {revision}\n\n{}",
            build_errors.len(),
            build_errors
                .iter()
                .map(|issue| issue.as_markdown())
                .collect::<Vec<_>>()
                .join("\n\n"),
        );

        self.ci
            .notify_email(author, &subject, &content, cancel)
            .await
            .map_err(|e| ReporterError::Notify(e.to_string()))?;
        info!("sent build error email to the revision author");
        Ok(PublishOutcome::Published)
    }
}
