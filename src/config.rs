// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

use serde::Deserialize;

use crate::errors::ConfigError;

/// Channel label stamped on emitted telemetry and email subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppChannel {
    #[default]
    Dev,
    Testing,
    Production,
}

impl AppChannel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AppChannel::Dev => "dev",
            AppChannel::Testing => "testing",
            AppChannel::Production => "production",
        }
    }
}

/// Strategy used by the external patch-applier when preparing a checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutMode {
    Robust,
    Batch,
    #[default]
    Default,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    pub slug: String,
    pub url: String,
    pub try_url: Option<String>,
    #[serde(default)]
    pub checkout_mode: CheckoutMode,
    pub ssh_user: Option<String>,
    pub decision_env_prefix: Option<String>,
}

/// One configured reporter, tagged by kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReporterConfig {
    /// Inline findings + summary comment on the review platform.
    Platform {
        #[serde(default)]
        analyzers_skipped: Vec<String>,
    },
    /// Digest email to a fixed address list.
    Email { emails: Vec<String> },
    /// The backend system of record; transactional with the run.
    Backend {
        url: String,
        credentials: Option<String>,
    },
    /// Email to the revision author when build errors are present.
    BuildError {},
}

#[derive(Debug, Clone, Deserialize)]
pub struct CiConfig {
    pub queue_url: String,
    pub index_url: Option<String>,
    pub notify_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    pub url: String,
    pub token: Option<String>,
}

fn default_max_parallel_fetch() -> usize {
    8
}
fn default_parse_queue() -> usize {
    64
}
fn default_deadline_seconds() -> u64 {
    2 * 60 * 60
}
fn default_results_dir() -> String {
    String::from("/tmp/results")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tuning {
    /// Bounded parallelism for task/artifact fetching.
    #[serde(default = "default_max_parallel_fetch")]
    pub max_parallel_fetch: usize,
    /// Bound of the ingestion→parsing queue; ingestion blocks when full.
    #[serde(default = "default_parse_queue")]
    pub parse_queue: usize,
    /// Wall-clock deadline for one run.
    #[serde(default = "default_deadline_seconds")]
    pub deadline_seconds: u64,
    /// Where per-run artifacts (report.json, summary.md) are written.
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
}

impl Default for Tuning {
    fn default() -> Tuning {
        Tuning {
            max_parallel_fetch: default_max_parallel_fetch(),
            parse_queue: default_parse_queue(),
            deadline_seconds: default_deadline_seconds(),
            results_dir: default_results_dir(),
        }
    }
}

/// The whole run configuration; passed explicitly to each pipeline run, no
/// process-wide state.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app_channel: AppChannel,
    #[serde(default)]
    pub reporters: Vec<ReporterConfig>,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
    /// Enables the synthetic analyzer reporting uncovered-but-modified files.
    #[serde(default)]
    pub zero_coverage_enabled: bool,
    /// Probability that a run also consults the previous diff's issues to
    /// refine `new_for_revision`; best-effort, never gates publication.
    #[serde(default)]
    pub before_after_ratio: f64,
    pub ci: CiConfig,
    pub platform: Option<PlatformConfig>,
    #[serde(default)]
    pub tuning: Tuning,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from a remote secret payload (same shape, JSON).
    pub fn from_secret(value: serde_json::Value) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_value(value)
            .map_err(|e| ConfigError::Invalid(format!("secret payload: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Fetch a named secret from the CI secrets service and parse it as the
    /// configuration document.
    pub async fn load_secret(secrets_url: &str, name: &str) -> Result<Config, ConfigError> {
        let secret_error = |error: String| ConfigError::SecretError {
            name: String::from(name),
            error,
        };
        let url = format!("{}/secret/{name}", secrets_url.trim_end_matches('/'));
        let response = crate::ci::http_client()
            .get(&url)
            .send()
            .await
            .map_err(|e| secret_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(secret_error(format!(
                "secrets service returned {}",
                response.status()
            )));
        }
        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| secret_error(e.to_string()))?;
        // The secrets service wraps the payload in a `secret` envelope.
        Config::from_secret(body.get("secret").cloned().unwrap_or(body))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.before_after_ratio) {
            return Err(ConfigError::Invalid(format!(
                "before_after_ratio must be within [0, 1], got {}",
                self.before_after_ratio
            )));
        }
        if self.tuning.max_parallel_fetch == 0 || self.tuning.parse_queue == 0 {
            return Err(ConfigError::Invalid(String::from(
                "max_parallel_fetch and parse_queue must be positive",
            )));
        }
        for repository in &self.repositories {
            if repository.slug.is_empty() {
                return Err(ConfigError::Invalid(String::from("repository slug is empty")));
            }
        }
        Ok(())
    }

    /// The backend entry, when one is configured.
    #[must_use]
    pub fn backend(&self) -> Option<(&str, Option<&str>)> {
        self.reporters.iter().find_map(|reporter| match reporter {
            ReporterConfig::Backend { url, credentials } => {
                Some((url.as_str(), credentials.as_deref()))
            }
            _ => None,
        })
    }

    #[must_use]
    pub fn repository(&self, slug: &str) -> Option<&RepositoryConfig> {
        self.repositories.iter().find(|r| r.slug == slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
app_channel = "testing"
zero_coverage_enabled = true
before_after_ratio = 0.5

[ci]
queue_url = "https://ci.example.com/queue/v1"
notify_url = "https://ci.example.com/notify/v1"

[platform]
url = "https://review.example.com/api"
token = "api-token"

[[repositories]]
slug = "mozilla-central"
url = "https://hg.example.com/mozilla-central"
try_url = "https://hg.example.com/try"
checkout_mode = "robust"

[[reporters]]
kind = "backend"
url = "https://backend.example.com"
credentials = "bearer-token"

[[reporters]]
kind = "platform"
analyzers_skipped = ["doc-upload"]

[[reporters]]
kind = "email"
emails = ["admin@example.com"]

[[reporters]]
kind = "build_error"
"#;

    #[test]
    fn parses_full_document() {
        let config: Config = toml::from_str(EXAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.app_channel, AppChannel::Testing);
        assert!(config.zero_coverage_enabled);
        assert_eq!(config.reporters.len(), 4);
        assert_eq!(
            config.backend(),
            Some(("https://backend.example.com", Some("bearer-token")))
        );
        let repo = config.repository("mozilla-central").unwrap();
        assert_eq!(repo.checkout_mode, CheckoutMode::Robust);
        assert_eq!(config.tuning.max_parallel_fetch, 8);
        assert_eq!(config.tuning.deadline_seconds, 7200);
    }

    #[test]
    fn rejects_bad_ratio() {
        let mut config: Config = toml::from_str(EXAMPLE).unwrap();
        config.before_after_ratio = 1.5;
        assert!(config.validate().is_err());
    }
}
