// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io;

use thiserror::Error;

use crate::store::StoreDetailedError;

/// Error loading or validating the run configuration; always fatal (exit code 1).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("i/o error reading configuration: `{0}`")]
    IoError(#[from] io::Error),

    #[error("configuration parse error: `{0}`")]
    ParseError(#[from] toml::de::Error),

    #[error("remote secret `{name}` could not be loaded: {error}")]
    SecretError { name: String, error: String },

    #[error("missing environment variable `{0}`")]
    MissingEnvironment(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Error talking to the CI platform.
///
/// `Fatal` means authentication/permission problems that no retry will fix;
/// everything else has already been retried by the transport layer before it
/// surfaces here.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("CI platform denied the request ({status}): {message}")]
    Fatal { status: u16, message: String },

    #[error("transient CI error persisted after retries: {0}")]
    Transient(String),

    #[error("unexpected CI response: {0}")]
    BadResponse(String),

    #[error("run cancelled")]
    Cancelled,
}

/// Error fetching a single declared artifact.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact not found")]
    NotFound,

    #[error(transparent)]
    Transport(#[from] IngestError),
}

/// Error from a single reporter publication.
#[derive(Error, Debug)]
pub enum ReporterError {
    #[error("review platform error ({status}): {message}")]
    Platform { status: u16, message: String },

    #[error("notification service error: {0}")]
    Notify(String),

    #[error("i/o error writing report artifacts: `{0}`")]
    IoError(#[from] io::Error),

    #[error("JSON serialize error: `{0}`")]
    SerializeError(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] IngestError),
}

/// Error that aborts a whole pipeline run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("backend store failure: {0}")]
    Store(#[from] StoreDetailedError),

    #[error("run deadline exceeded, cancelled cooperatively")]
    Killed,
}
