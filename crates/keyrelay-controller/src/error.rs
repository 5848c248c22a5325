//! Controller error types.
//!
//! Provides strongly-typed errors for controller operations:
//! - Bus client calls (subscribe, poll, send, commit)
//! - Provisioner source loading
//! - Controller construction and the processing loop

use keyrelay_crypto::CryptoKeyError;
use thiserror::Error;

/// Errors from a bus client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Subscribing to the topic pattern failed.
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// Polling for records failed.
    #[error("poll failed: {0}")]
    Poll(String),

    /// Publishing a record failed.
    #[error("send to {topic} failed: {reason}")]
    Send {
        /// Destination topic
        topic: String,
        /// Error message
        reason: String,
    },

    /// Committing consumed offsets failed.
    #[error("commit failed: {0}")]
    Commit(String),

    /// Client is closed and cannot be used again.
    #[error("bus client closed")]
    Closed,
}

impl BusError {
    /// Returns true if a restarted controller may succeed.
    ///
    /// A closed client is permanent; everything else is network or broker
    /// state that can recover.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// Errors loading a provisioner source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionerError {
    /// Provisioners file could not be read.
    #[error("cannot read provisioners file {path}: {reason}")]
    Io {
        /// File that failed to load
        path: String,
        /// Error message
        reason: String,
    },

    /// A line in the provisioners file is not a valid verifying key.
    #[error("invalid provisioner entry on line {line}: {reason}")]
    InvalidEntry {
        /// 1-based line number
        line: usize,
        /// What is wrong with it
        reason: String,
    },
}

/// Errors that stop a controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// Bus client failure, propagated without retry.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Provisioner source is unusable.
    #[error("provisioner error: {0}")]
    Provisioner(#[from] ProvisionerError),

    /// Controller key source is unusable.
    #[error("cryptokey error: {0}")]
    CryptoKey(#[from] CryptoKeyError),
}

impl ControllerError {
    /// Returns true if restarting the controller cannot help.
    ///
    /// Bad key or provisioner sources are configuration errors. Bus errors
    /// defer to [`BusError::is_transient`].
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Bus(err) => !err.is_transient(),
            Self::Provisioner(_) | Self::CryptoKey(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_errors_are_transient_unless_closed() {
        assert!(BusError::Poll("broker unavailable".to_string()).is_transient());
        assert!(BusError::Commit("rebalance".to_string()).is_transient());
        assert!(!BusError::Closed.is_transient());
    }

    #[test]
    fn source_errors_are_fatal() {
        let err = ControllerError::from(ProvisionerError::InvalidEntry {
            line: 3,
            reason: "bad hex".to_string(),
        });
        assert!(err.is_fatal());

        let err = ControllerError::from(BusError::Send {
            topic: "orders.reqs".to_string(),
            reason: "timeout".to_string(),
        });
        assert!(!err.is_fatal());
    }

    #[test]
    fn error_display() {
        let err = BusError::Send { topic: "orders.reqs".to_string(), reason: "timeout".to_string() };
        assert_eq!(err.to_string(), "send to orders.reqs failed: timeout");

        let err = ProvisionerError::InvalidEntry { line: 2, reason: "bad hex".to_string() };
        assert_eq!(err.to_string(), "invalid provisioner entry on line 2: bad hex");
    }
}
