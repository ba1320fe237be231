use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Reconcile error: {0}")]
    Reconcile(String),

    #[error("unknown installation type: {0}")]
    UnknownInstallationType(String),

    /// The quota parameter has not been provided yet but the grace period is
    /// still running.  Callers retry instead of failing.
    #[error("{0}")]
    QuotaWaiting(String),

    #[error("Quota error: {0}")]
    Quota(String),

    #[error("Watch error: {0}")]
    WatchSync(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

/// Short alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn reconcile(msg: impl Into<String>) -> Self {
        Self::Reconcile(msg.into())
    }
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
    pub fn quota(msg: impl Into<String>) -> Self {
        Self::Quota(msg.into())
    }

    /// Prefix the message with context (stage, product, operation).
    pub fn context(self, ctx: impl fmt::Display) -> Self {
        Self::Context {
            context: ctx.to_string(),
            source: Box::new(self),
        }
    }

    /// True for a Kubernetes 404, including "resource type not served".
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Kube(e) => is_not_found(e),
            Self::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_quota_waiting(&self) -> bool {
        match self {
            Self::QuotaWaiting(_) => true,
            Self::Context { source, .. } => source.is_quota_waiting(),
            _ => false,
        }
    }
}

/// True for a Kubernetes 404 on a raw kube error.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

/// Growable list of errors collected over one stage or uninstall pass.
///
/// Collection never short-circuits: every product gets a chance to report.
/// The list renders the way the status `lastError` field shows it, one error
/// per line.
#[derive(Debug, Default)]
pub struct ErrorList {
    errors: Vec<Error>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: Error) {
        self.errors.push(err);
    }

    pub fn merge(&mut self, other: ErrorList) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.errors.iter()
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msgs: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", msgs.join("\n"))
    }
}
