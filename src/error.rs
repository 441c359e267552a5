//! Error types for the operator service.

use thiserror::Error;

use crate::wire::TransportType;

/// Errors surfaced by the ceremony switch and its instances.
///
/// Every error reaching an HTTP handler is rendered as a 400 with a JSON
/// body carrying [`Error::public_message`]; some variant texts are part of
/// the wire contract and must not change.
#[derive(Debug, Error)]
pub enum Error {
    /// A message failed to decode or violated a codec cap.
    #[error("malformed message: {0}")]
    Malformed(#[from] commonware_codec::Error),
    /// The envelope was built by a peer running a different protocol version.
    #[error("wrong version: remote {remote} local {local}")]
    VersionMismatch { remote: String, local: String },
    /// Committee size or threshold outside the accepted `3f+1` / `2f+1` set.
    #[error("threshold set is invalid")]
    ThresholdSetInvalid,
    /// Operator list is not strictly ascending by id.
    #[error("operators not unique or not ordered")]
    OperatorsNotUniqueOrOrdered,
    /// The outer signature did not verify against the initiator key.
    #[error("initiator signature isn't valid")]
    BadInitiatorSignature,
    /// An inner message signature did not verify against its operator key.
    #[error("invalid signature from operator {0}")]
    BadOperatorSignature(u64),
    /// A message was signed by a key that is not part of the ceremony.
    #[error("message signer is not a ceremony operator")]
    UnknownOperator,
    /// Our public key is bound to a different id in the operator list.
    #[error("wrong operator ID")]
    WrongOperatorID,
    /// The switch is saturated and sweeping freed nothing.
    #[error("max number of DKG instances reached, try again later")]
    MaxInstances,
    /// A live ceremony with this identifier already exists.
    #[error("ceremony with this identifier is already running")]
    AlreadyExists,
    /// No live ceremony is registered under this identifier.
    #[error("no active ceremony instance for this identifier")]
    MissingInstance,
    /// A message of the wrong type arrived for the current phase.
    #[error("unexpected {got} message in {phase} phase")]
    UnexpectedMessageType { got: TransportType, phase: &'static str },
    /// A protocol message could not be applied to the instance.
    #[error("processing failed in {phase} phase: {reason}")]
    ProcessingFailed { phase: &'static str, reason: String },
    /// The instance latched a failure earlier and refuses further input.
    #[error("ceremony instance failed: {0}")]
    InstanceFailed(String),
    /// Withdrawal credentials do not carry the ETH1 prefix.
    #[error("invalid withdrawal prefix: {0:#04x}")]
    InvalidWithdrawalPrefix(u8),
    /// Key files already exist and `--force` was not specified.
    #[error("key files already exist, use --force to overwrite")]
    KeysAlreadyExist,
    /// An RSA public or private key could not be parsed.
    #[error("invalid RSA key: {0}")]
    InvalidKey(String),
    /// An RSA primitive failed.
    #[error("rsa: {0}")]
    Rsa(#[from] rsa::Error),
    /// A JSON artifact embedded in a result record failed to parse.
    #[error("invalid result artifact: {0}")]
    InvalidArtifact(String),
    /// Filesystem failure while persisting results.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Wraps an error whose details must not reach the client. Only
    /// `public` is rendered into the response; the full chain is logged.
    #[error("{public}")]
    Sensitive {
        public: &'static str,
        #[source]
        private: Box<Error>,
    },
}

impl Error {
    /// Wrap an error so that clients only see `public`.
    pub fn sensitive(public: &'static str, private: Error) -> Self {
        Self::Sensitive {
            public,
            private: Box::new(private),
        }
    }

    /// The message rendered into the HTTP error envelope.
    pub fn public_message(&self) -> String {
        match self {
            Self::Sensitive { public, .. } => (*public).to_string(),
            other => other.to_string(),
        }
    }
}
