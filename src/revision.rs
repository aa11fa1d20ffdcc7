// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    cancel::CancellationToken,
    ci::CiClient,
    errors::{ArtifactError, IngestError},
    issues::Issue,
    patch::PatchAnalysis,
};

/// Artifact on the review task carrying the unified diff the external
/// patch-applier produced for this build.
const PATCH_ARTIFACT: &str = "public/patch.diff";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    Review,
    PullRequest,
}

impl Provider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Review => "review",
            Provider::PullRequest => "pull-request",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Provider> {
        match value {
            "review" => Some(Provider::Review),
            "pull-request" => Some(Provider::PullRequest),
            _ => None,
        }
    }
}

/// The logical change under review, with the diff currently being analyzed
/// and the unified patch covering it.
///
/// Reviews happen on a try/head tree against a base tree, so the two
/// repository slugs may differ.
#[derive(Debug, Clone)]
pub struct Revision {
    pub provider: Provider,
    /// Opaque identifier on the provider (eg. a PHID).
    pub provider_id: String,
    /// Numeric revision id on the provider.
    pub id: i64,
    /// Numeric id of the diff iteration under analysis.
    pub diff_id: i64,
    pub title: String,
    pub bugzilla_id: Option<u32>,
    pub author_email: Option<String>,
    /// Base tree the change targets.
    pub base_repository: String,
    /// Head/try tree the analysis ran on.
    pub head_repository: String,
    /// 40-hex commit of the applied patch on the head tree.
    pub commit_hash: String,
    /// The CI task that produced this build.
    pub review_task_id: String,
    /// Build object on the review platform, when one was created.
    pub build_id: Option<String>,
    pub patch: PatchAnalysis,
}

impl Revision {
    /// Load the revision under review from the review task's metadata tags
    /// and its published patch artifact.
    pub async fn from_review_task(
        ci: &CiClient,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Revision, IngestError> {
        let task = ci.get_task(task_id, cancel).await?;
        let tag = |name: &str| -> Result<String, IngestError> {
            task.tags.get(name).cloned().ok_or_else(|| {
                IngestError::BadResponse(format!("review task {task_id} has no `{name}` tag"))
            })
        };

        let provider = tag("review-provider")
            .ok()
            .and_then(|v| Provider::parse(&v))
            .unwrap_or(Provider::Review);
        let id = tag("revision-id")?.parse::<i64>().map_err(|e| {
            IngestError::BadResponse(format!("revision-id tag is not numeric: {e}"))
        })?;
        let diff_id = tag("diff-id")?.parse::<i64>().map_err(|e| {
            IngestError::BadResponse(format!("diff-id tag is not numeric: {e}"))
        })?;

        let patch = match ci
            .get_artifact(task_id, task.run_id, PATCH_ARTIFACT, cancel)
            .await
        {
            Ok(bytes) => PatchAnalysis::parse(&String::from_utf8_lossy(&bytes)),
            Err(ArtifactError::NotFound) => {
                warn!("review task {task_id} published no {PATCH_ARTIFACT}; issues will classify as outside the patch");
                PatchAnalysis::default()
            }
            Err(ArtifactError::Transport(e)) => return Err(e),
        };

        let revision = Revision {
            provider,
            provider_id: tag("revision-phid").unwrap_or_else(|_| format!("rev-{id}")),
            id,
            diff_id,
            title: tag("title").unwrap_or_else(|_| String::from("<untitled>")),
            bugzilla_id: tag("bugzilla-id").ok().and_then(|v| v.parse().ok()),
            author_email: tag("author-email").ok(),
            base_repository: tag("repository")?,
            head_repository: tag("target-repository").unwrap_or_else(|_| tag("repository").unwrap_or_default()),
            commit_hash: tag("commit-hash")?,
            review_task_id: String::from(task_id),
            build_id: tag("build-id").ok(),
            patch,
        };
        info!(
            "loaded revision {} diff {} on {}",
            revision.id, revision.diff_id, revision.base_repository
        );
        Ok(revision)
    }

    #[must_use]
    pub fn has_file(&self, path: &str) -> bool {
        self.patch.has_file(path)
    }

    /// The `in_patch` rule: the issue's file is modified by the patch and, for
    /// line-scoped issues, at least one affected line was added by it.
    /// Whole-file issues only need file membership.
    #[must_use]
    pub fn contains(&self, issue: &Issue) -> bool {
        match issue.line_range() {
            Some((start, end)) => self.patch.intersects(&issue.path, start, end),
            None => self.patch.has_file(&issue.path),
        }
    }

    /// Source line used for the issue fingerprint, from the patch after-image.
    ///
    /// `None` only for whole-file issues; a line that is not part of the
    /// after-image hashes as the literal `-` placeholder.
    #[must_use]
    pub fn hash_source_line(&self, issue: &Issue) -> Option<String> {
        issue.line.map(|line| {
            self.patch
                .line_content(&issue.path, line)
                .map_or_else(|| String::from("-"), String::from)
        })
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{} (diff {})", self.id, self.diff_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::Level;

    fn revision_with_patch(patch: &str) -> Revision {
        Revision {
            provider: Provider::Review,
            provider_id: String::from("PHID-DREV-1"),
            id: 1,
            diff_id: 1,
            title: String::from("test"),
            bugzilla_id: None,
            author_email: None,
            base_repository: String::from("base"),
            head_repository: String::from("try"),
            commit_hash: String::from("deadbeef"),
            review_task_id: String::from("task"),
            build_id: None,
            patch: PatchAnalysis::parse(patch),
        }
    }

    const PATCH: &str = "--- a/src/a.js\n+++ b/src/a.js\n@@ -8,0 +8,4 @@\n+l8\n+l9\n+l10\n+l11\n";

    #[test]
    fn contains_uses_line_intersection() {
        let revision = revision_with_patch(PATCH);
        let mut issue = Issue::new("eslint", None, "src/a.js", Some(10), 1, Level::Warning, "m");
        assert!(revision.contains(&issue));
        issue.line = Some(100);
        assert!(!revision.contains(&issue));
        // Multi-line issues intersect when any line is added
        issue.line = Some(99);
        issue.nb_lines = 20;
        assert!(!revision.contains(&issue));
        issue.line = Some(5);
        issue.nb_lines = 5;
        assert!(revision.contains(&issue));
    }

    #[test]
    fn contains_file_level() {
        let revision = revision_with_patch(PATCH);
        let in_patch = Issue::new("lint", None, "src/a.js", None, 1, Level::Warning, "m");
        let outside = Issue::new("lint", None, "other.js", None, 1, Level::Warning, "m");
        assert!(revision.contains(&in_patch));
        assert!(!revision.contains(&outside));
    }

    #[test]
    fn hash_source_line_prefers_after_image() {
        let revision = revision_with_patch(PATCH);
        let issue = Issue::new("eslint", None, "src/a.js", Some(9), 1, Level::Warning, "m");
        assert_eq!(revision.hash_source_line(&issue), Some(String::from("l9")));
        let unknown = Issue::new("eslint", None, "src/a.js", Some(7), 1, Level::Warning, "m");
        assert_eq!(revision.hash_source_line(&unknown), Some(String::from("-")));
        let file_level = Issue::new("eslint", None, "src/a.js", None, 1, Level::Warning, "m");
        assert_eq!(revision.hash_source_line(&file_level), None);
    }
}
