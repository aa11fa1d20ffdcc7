// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{collections::BTreeMap, sync::Arc};

use enum_dispatch::enum_dispatch;
use log::{error, info, warn};

use crate::{
    cancel::CancellationToken,
    ci::CiClient,
    config::{Config, ReporterConfig},
    errors::ReporterError,
    issues::{Issue, Level},
    pipeline::RunSummary,
    revision::Revision,
};

pub mod build_errors;
pub mod debug;
pub mod mail;
pub mod platform;

use build_errors::BuildErrorsReporter;
use debug::DebugReporter;
use mail::MailReporter;
use platform::PlatformReporter;

/// What a reporter did with the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// The target already carries this analysis; nothing was sent.
    AlreadyPublished,
    /// The reporter had nothing to do (no recipients, no build, ...).
    Skipped,
}

/// Per-analyzer aggregate used by summary comments and digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerStats {
    pub analyzer: String,
    pub total: usize,
    pub publishable: usize,
    pub errors: usize,
    pub warnings: usize,
    pub build_errors: usize,
}

#[must_use]
pub fn calc_stats(issues: &[Issue]) -> Vec<AnalyzerStats> {
    let mut stats: BTreeMap<String, AnalyzerStats> = BTreeMap::new();
    for issue in issues {
        let entry = stats
            .entry(issue.analyzer.clone())
            .or_insert_with(|| AnalyzerStats {
                analyzer: issue.analyzer.clone(),
                total: 0,
                publishable: 0,
                errors: 0,
                warnings: 0,
                build_errors: 0,
            });
        entry.total += 1;
        if issue.publishable() {
            entry.publishable += 1;
        }
        match issue.level {
            Level::Error => entry.errors += 1,
            Level::Warning => entry.warnings += 1,
        }
        if issue.is_build_error() {
            entry.build_errors += 1;
        }
    }
    stats.into_values().collect()
}

/// A publication sink for classified issues. The backend store is not a
/// `Reporter`: its write is transactional with the run and happens-before
/// every reporter here; these are all best-effort.
#[enum_dispatch]
#[allow(async_fn_in_trait)] // should be fine to the extent that this is only used internally to this project
pub trait Reporter {
    fn name(&self) -> &'static str;

    async fn publish(
        &self,
        summary: &RunSummary,
        revision: &Revision,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome, ReporterError>;
}

#[enum_dispatch(Reporter)]
pub enum ReporterDispatch {
    Platform(PlatformReporter),
    Mail(MailReporter),
    BuildErrors(BuildErrorsReporter),
    Debug(DebugReporter),
}

/// Instantiate the configured reporters, in configuration order, with the
/// debug reporter always appended.
#[must_use]
pub fn build_reporters(config: &Config, ci: &Arc<CiClient>) -> Vec<ReporterDispatch> {
    let mut reporters: Vec<ReporterDispatch> = Vec::new();
    for entry in &config.reporters {
        match entry {
            ReporterConfig::Platform { analyzers_skipped } => {
                match config.platform.as_ref() {
                    Some(platform) => match PlatformReporter::new(platform, analyzers_skipped.clone()) {
                        Ok(reporter) => reporters.push(reporter.into()),
                        Err(e) => error!("platform reporter misconfigured, skipping: {e}"),
                    },
                    None => {
                        error!("platform reporter configured without a [platform] section, skipping");
                    }
                }
            }
            ReporterConfig::Email { emails } => {
                reporters.push(
                    MailReporter::new(emails.clone(), config.app_channel, ci.clone()).into(),
                );
            }
            ReporterConfig::BuildError {} => {
                reporters.push(BuildErrorsReporter::new(ci.clone()).into());
            }
            // The backend entry configures the store, not a reporter.
            ReporterConfig::Backend { .. } => {}
        }
    }
    reporters.push(DebugReporter::new(&config.tuning.results_dir).into());
    if reporters.len() == 1 {
        warn!("no reporters configured, this analysis will not be published");
    }
    reporters
}

/// Dispatch the run to every reporter in order. A reporter failure is logged
/// and the run continues as a partial success; returns whether all sinks
/// accepted the publication.
pub async fn publish_all(
    reporters: &[ReporterDispatch],
    summary: &RunSummary,
    revision: &Revision,
    cancel: &CancellationToken,
) -> bool {
    let mut all_ok = true;
    for reporter in reporters {
        match reporter.publish(summary, revision, cancel).await {
            Ok(PublishOutcome::Published) => {
                info!("reporter {} published the run", reporter.name());
            }
            Ok(PublishOutcome::AlreadyPublished) => {
                info!("reporter {} found the run already published", reporter.name());
            }
            Ok(PublishOutcome::Skipped) => {
                info!("reporter {} had nothing to publish", reporter.name());
            }
            Err(e) => {
                error!("reporter {} failed: {e}", reporter.name());
                all_ok = false;
            }
        }
    }
    all_ok
}
