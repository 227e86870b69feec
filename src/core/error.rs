use thiserror::Error;

use crate::fixed::Token;

/// Failures raised by the network engine.
///
/// Every kind is unrecoverable for the call that triggered it; the engine
/// never retries.
#[derive(Debug, Error)]
pub enum NetError {
    /// A network could not be constructed or inserted.
    #[error("construction failed: {0}")]
    Construction(String),

    /// An allocation could not be satisfied.
    #[error("storage exhausted allocating {bytes} bytes")]
    StorageExhausted { bytes: usize },

    /// No network in the tree owns the token (a wiring defect).
    #[error("token {token:#x} is not owned by any network")]
    Lookup { token: Token },

    /// A container-only or leaf-only operation reached the wrong kind.
    #[error("{class}.{what} not implemented")]
    NotImplemented {
        class: &'static str,
        what: &'static str,
    },

    /// An internal invariant was violated.
    #[error("should not occur: {0}")]
    ShouldNotOccur(&'static str),

    /// Clock-cycle race detected. The double-buffered cycle never raises it.
    #[error("clock synchronization violated: {0}")]
    Synchronization(String),

    /// A worker's sub-range sweep failed.
    #[error("worker {worker} failed: {source}")]
    Worker {
        worker: usize,
        #[source]
        source: Box<NetError>,
    },

    /// A worker panicked.
    #[error("worker {worker} panicked: {message}")]
    WorkerPanic { worker: usize, message: String },

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type NetResult<T> = Result<T, NetError>;

impl NetError {
    pub fn not_implemented(class: &'static str, what: &'static str) -> Self {
        NetError::NotImplemented { class, what }
    }

    pub fn construction(msg: impl Into<String>) -> Self {
        NetError::Construction(msg.into())
    }

    pub(crate) fn worker(worker: usize, source: NetError) -> Self {
        NetError::Worker {
            worker,
            source: Box::new(source),
        }
    }
}

#[cfg(feature = "serde")]
impl From<serde_json::Error> for NetError {
    fn from(e: serde_json::Error) -> Self {
        NetError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        let e = NetError::Lookup { token: 0x40 };
        assert_eq!(e.to_string(), "token 0x40 is not owned by any network");

        let e = NetError::not_implemented("OutBuffer", "locate");
        assert_eq!(e.to_string(), "OutBuffer.locate not implemented");

        let e = NetError::Synchronization("token 3 fanned out twice".into());
        assert!(e.to_string().contains("token 3"));
    }

    #[test]
    fn worker_error_keeps_source() {
        let e = NetError::worker(2, NetError::ShouldNotOccur("x"));
        assert!(e.to_string().starts_with("worker 2 failed"));
        let src = std::error::Error::source(&e).map(|s| s.to_string());
        assert_eq!(src.as_deref(), Some("should not occur: x"));
    }
}
