// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use log::{debug, info, warn};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    cancel::CancellationToken,
    ci::http_client,
    config::PlatformConfig,
    errors::ReporterError,
    issues::{Issue, Level},
    pipeline::RunSummary,
    revision::Revision,
};

use super::{PublishOutcome, Reporter, calc_stats};

/// Build object state on the review platform; `pass`/`fail` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    Pending,
    Work,
    Pass,
    Fail,
}

impl BuildState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildState::Pass | BuildState::Fail)
    }
}

#[derive(Deserialize)]
struct BuildResponse {
    state: BuildState,
}

/// One inline annotation on the review platform.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub path: String,
    pub line: Option<u32>,
    #[serde(rename = "char")]
    pub column: Option<u32>,
    pub code: Option<String>,
    pub severity: String,
    pub name: String,
    pub description: String,
}

impl Finding {
    fn from_issue(issue: &Issue) -> Finding {
        Finding {
            path: issue.path.clone(),
            line: issue.line,
            column: issue.column,
            code: issue.check.clone(),
            severity: String::from(issue.level.as_str()),
            name: issue.analyzer.clone(),
            description: issue.message.clone(),
        }
    }
}

/// Publishes inline findings and a summary comment on the code-review
/// platform, then moves the build object to its terminal state.
///
/// A terminal build short-circuits: the analysis was already published (by
/// this run or a previous retry) and nothing is sent twice.
pub struct PlatformReporter {
    api_url: Url,
    token: Option<String>,
    analyzers_skipped: Vec<String>,
}

impl PlatformReporter {
    pub fn new(
        config: &PlatformConfig,
        analyzers_skipped: Vec<String>,
    ) -> Result<PlatformReporter, ReporterError> {
        let api_url = Url::parse(&config.url).map_err(|e| ReporterError::Platform {
            status: 0,
            message: format!("bad platform URL: {e}"),
        })?;
        info!("platform reporter enabled");
        Ok(PlatformReporter {
            api_url,
            token: config.token.clone(),
            analyzers_skipped,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ReporterError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| ReporterError::Platform {
                status: 0,
                message: String::from("platform URL cannot take segments"),
            })?
            .extend(segments)
            .push("");
        Ok(url)
    }

    async fn request<B: Serialize>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ReporterError> {
        if cancel.is_cancelled() {
            return Err(ReporterError::Platform {
                status: 0,
                message: String::from("cancelled"),
            });
        }
        let client = http_client();
        debug!("HTTP request {method} {url}");
        let mut request = client.request(method, url);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| ReporterError::Platform {
            status: 0,
            message: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(ReporterError::Platform {
                status: status.as_u16(),
                message: format!("platform returned {status}"),
            });
        }
        Ok(response)
    }

    async fn build_state(
        &self,
        build_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<BuildState>, ReporterError> {
        let url = self.endpoint(&["build", build_id])?;
        let response = self.request::<()>(Method::GET, url, None, cancel).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let build = response
            .json::<BuildResponse>()
            .await
            .map_err(|e| ReporterError::Platform {
                status: 0,
                message: format!("parsing build object: {e}"),
            })?;
        Ok(Some(build.state))
    }

    fn build_comment(&self, summary: &RunSummary, revision: &Revision, findings: usize) -> String {
        let stats = calc_stats(&summary.issues);
        let mut comment = String::new();
        if findings > 0 {
            comment.push_str(&format!(
                "Code analysis found {} in diff {}:\n",
                pluralize("defect", findings),
                revision.diff_id
            ));
            for stat in &stats {
                if stat.publishable > 0 {
                    comment.push_str(&format!(
                        " - {} found by {}\n",
                        pluralize("defect", stat.publishable),
                        stat.analyzer
                    ));
                }
            }
            let errors = summary
                .issues
                .iter()
                .filter(|i| i.publishable() && i.level == Level::Error)
                .count();
            let warnings = summary
                .issues
                .iter()
                .filter(|i| i.publishable() && i.level == Level::Warning)
                .count();
            if warnings > 0 {
                comment.push_str(&format!(
                    "\nWARNING: Found {} (warning level) that can be dismissed.\n",
                    pluralize("issue", warnings)
                ));
            }
            if errors > 0 {
                comment.push_str(&format!(
                    "\nIMPORTANT: Found {} (error level) that must be fixed before landing.\n",
                    pluralize("issue", errors)
                ));
            }
        }
        for failure in &summary.task_failures {
            comment.push_str(&format!(
                "\nThe analysis task {} failed, but we could not detect any issue.\nPlease check this task manually.\n",
                failure.name
            ));
        }
        comment
    }

    /// Publishable issues minus the analyzers the configuration mutes.
    fn reportable<'a>(&self, issues: &'a [Issue]) -> Vec<&'a Issue> {
        issues
            .iter()
            .filter(|issue| issue.publishable())
            .filter(|issue| !self.analyzers_skipped.contains(&issue.analyzer))
            .collect()
    }
}

impl Reporter for PlatformReporter {
    fn name(&self) -> &'static str {
        "platform"
    }

    async fn publish(
        &self,
        summary: &RunSummary,
        revision: &Revision,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome, ReporterError> {
        let Some(ref build_id) = revision.build_id else {
            warn!("revision {revision} has no build object, skipping platform publication");
            return Ok(PublishOutcome::Skipped);
        };

        // A terminal build means a previous (or retried) run already
        // published; creating another comment would double-post.
        match self.build_state(build_id, cancel).await? {
            Some(state) if state.is_terminal() => {
                info!("build {build_id} is already {state:?}, not publishing again");
                return Ok(PublishOutcome::AlreadyPublished);
            }
            Some(_) => {}
            None => {
                warn!("build {build_id} does not exist on the platform, skipping");
                return Ok(PublishOutcome::Skipped);
            }
        }

        let reportable = self.reportable(&summary.issues);

        if !reportable.is_empty() {
            let findings: Vec<Finding> = reportable
                .iter()
                .map(|issue| Finding::from_issue(issue))
                .collect();
            let url = self.endpoint(&["build", build_id, "findings"])?;
            self.request(Method::POST, url, Some(&findings), cancel)
                .await?;
        }

        if !reportable.is_empty() || !summary.task_failures.is_empty() {
            let comment = self.build_comment(summary, revision, reportable.len());
            let revision_id = revision.id.to_string();
            let url = self.endpoint(&["revision", &revision_id, "comments"])?;
            self.request(
                Method::POST,
                url,
                Some(&serde_json::json!({ "content": comment })),
                cancel,
            )
            .await?;
        }

        // Terminal state last, so a failure above leaves the build
        // republishable by a retried run. Only publishable issues fail the
        // build; erroneous tasks stay in the comment body.
        let final_state = if reportable.is_empty() {
            BuildState::Pass
        } else {
            BuildState::Fail
        };
        let url = self.endpoint(&["build", build_id, "state"])?;
        self.request(
            Method::POST,
            url,
            Some(&serde_json::json!({ "state": final_state })),
            cancel,
        )
        .await?;

        Ok(PublishOutcome::Published)
    }
}

fn pluralize(word: &str, nb: usize) -> String {
    if nb == 1 {
        format!("{nb} {word}")
    } else {
        format!("{nb} {word}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(BuildState::Pass.is_terminal());
        assert!(BuildState::Fail.is_terminal());
        assert!(!BuildState::Work.is_terminal());
        assert!(!BuildState::Pending.is_terminal());
    }

    #[test]
    fn finding_payload_from_issue() {
        let mut issue = Issue::new(
            "eslint",
            Some(String::from("no-var")),
            "src/a.js",
            Some(10),
            1,
            Level::Error,
            "Unexpected var.",
        );
        issue.column = Some(1);
        let finding = Finding::from_issue(&issue);
        assert_eq!(finding.path, "src/a.js");
        assert_eq!(finding.line, Some(10));
        assert_eq!(finding.code.as_deref(), Some("no-var"));
        assert_eq!(finding.severity, "error");
        assert_eq!(finding.name, "eslint");
    }
}
