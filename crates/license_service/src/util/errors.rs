use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

#[derive(Error, Debug)]
pub enum StdError {
    #[error("JsonSerializationError: {0}")]
    JsonSerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    /// An API error with a description of what the operator was doing.
    #[error("{context}: {source}")]
    KubeContext {
        context: String,
        #[source]
        source: kube::Error,
    },

    /// Create was refused because the object exists although the read said it did not.
    #[error(
        "failed to create resource: {0}. Most likely configured client has such cache'ing that does not allow reading this resource, check k8s client configuration"
    )]
    StaleCache(#[source] kube::Error),

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("ConfigError: {0}")]
    ConfigError(String),

    #[error("DecodingError: {0}")]
    DecodingError(String),

    #[error("CryptoError: {0}")]
    CryptoError(String),

    #[error("SerializationError: {0}")]
    SerializationError(String),
}

impl StdError {
    pub fn metric_label(&self) -> String {
        match self {
            StdError::JsonSerializationError(_) => "jsonserializationerror",
            StdError::KubeError(_) | StdError::KubeContext { .. } => "kubeerror",
            StdError::StaleCache(_) => "stalecache",
            StdError::MetadataMissing(_) => "metadatamissing",
            StdError::InvalidArgument(_) => "invalidargument",
            StdError::ConfigError(_) => "configerror",
            StdError::DecodingError(_) => "decodingerror",
            StdError::CryptoError(_) => "cryptoerror",
            StdError::SerializationError(_) => "serializationerror",
        }
        .to_string()
    }

    /// Wraps an API error with what was being attempted.
    pub fn kube(context: impl Into<String>, source: kube::Error) -> StdError {
        StdError::KubeContext {
            context: context.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub struct ErrorWithRequeue {
    pub duration: Duration,
    pub error: StdError,
}

impl ErrorWithRequeue {
    pub fn new(error: StdError, duration: Duration) -> ErrorWithRequeue {
        ErrorWithRequeue { error, duration }
    }

    pub fn metric_label(&self) -> String {
        self.error.metric_label()
    }
}

impl fmt::Display for ErrorWithRequeue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Standard Error: {0}")]
    StdError(#[source] StdError),

    #[error("Error With Requeue: {0}")]
    ErrorWithRequeue(#[source] ErrorWithRequeue),
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::StdError(e) => e.metric_label(),
            Error::ErrorWithRequeue(e) => e.metric_label(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Error {
        Error::StdError(StdError::InvalidArgument(message.into()))
    }
}

impl From<StdError> for Error {
    fn from(error: StdError) -> Self {
        Error::StdError(error)
    }
}

/// True when the API answered with 404.
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(err) if err.code == 404)
}

pub fn is_already_exists(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(err) if err.code == 409 && err.reason == "AlreadyExists")
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
