use serde::Serialize;
use thiserror::Error;

use crate::cdm::SessionState;

#[derive(Error, Debug)]
pub enum DrmdlError {
    #[error("Stream resolution failed: {0}")]
    StreamResolution(String),

    #[error("No Widevine pssh found in manifest")]
    PsshNotFound,

    #[error("Invalid manifest: {0}")]
    ManifestParse(String),

    #[error("Failed to open CDM session: {0}")]
    SessionOpen(String),

    #[error("CDM session is {found:?}, expected {expected}")]
    IllegalState {
        expected: &'static str,
        found: SessionState,
    },

    #[error("License challenge error: {0}")]
    Challenge(String),

    #[error("License acquisition failed: {0}")]
    LicenseAcquisition(String),

    #[error("Key retrieval failed: {0}")]
    KeyRetrieval(String),

    #[error("Key service unavailable: {0}")]
    KeyService(String),

    #[error("Track acquisition failed: {0}")]
    Acquisition(String),

    #[error("Decryption key required")]
    NoKeys,

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    TomlError(#[from] toml::de::Error),
}

impl DrmdlError {
    /// Classifies the error for [crate::PipelineResult].
    ///
    /// Transparent wrappers return `None`; the caller knows which stage they came from.
    pub fn kind(&self) -> Option<ErrorKind> {
        Some(match self {
            Self::StreamResolution(_) => ErrorKind::StreamResolution,
            Self::PsshNotFound | Self::ManifestParse(_) => ErrorKind::ManifestParse,
            Self::SessionOpen(_) => ErrorKind::SessionOpen,
            Self::IllegalState { .. } => ErrorKind::IllegalState,
            Self::Challenge(_) => ErrorKind::Challenge,
            Self::LicenseAcquisition(_) => ErrorKind::LicenseAcquisition,
            Self::KeyRetrieval(_) => ErrorKind::KeyRetrieval,
            Self::KeyService(_) => ErrorKind::KeyService,
            Self::Acquisition(_) => ErrorKind::Acquisition,
            Self::NoKeys => ErrorKind::NoKeys,
            Self::Decryption(_) => ErrorKind::Decryption,
            Self::Processing(_) => ErrorKind::Processing,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StreamResolution,
    ManifestParse,
    SessionOpen,
    IllegalState,
    Challenge,
    LicenseAcquisition,
    KeyRetrieval,
    KeyService,
    Acquisition,
    NoKeys,
    Decryption,
    Processing,
    Cancelled,
    Config,
    /// Failure without a more specific classification.
    Internal,
}

impl ErrorKind {
    /// Entitlement problems rather than transport or tooling faults.
    pub fn is_entitlement(&self) -> bool {
        matches!(self, Self::KeyRetrieval)
    }
}

pub type DrmdlResult<T> = Result<T, DrmdlError>;
