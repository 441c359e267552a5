//! Protocol constants and operational limits.

use std::time::Duration;

/// Protocol version exchanged in every transport envelope. Peers running a
/// different build are rejected at admission.
pub const PROTOCOL_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

/// Maximum number of ceremony instances held by the switch at once.
pub const MAX_INSTANCES: usize = 1024;

/// A ceremony that has not concluded within this window is eligible for
/// reclamation, and its identifier may be reused.
pub const MAX_INSTANCE_AGE: Duration = Duration::from_secs(5 * 60);

/// Committee sizes accepted by the init validator. Values of the form
/// `3f + 1` for `f >= 1`, capped at 13 operators.
pub const ACCEPTED_COMMITTEE_SIZES: &[usize] = &[4, 7, 10, 13];

/// First byte of ETH1-style withdrawal credentials.
pub const ETH1_WITHDRAWAL_PREFIX: u8 = 0x01;

/// Deposit amount signed into the deposit message, in gwei (32 ETH).
pub const DEPOSIT_AMOUNT_GWEI: u64 = 32_000_000_000;

/// Time allowed for a client to send its request headers.
pub const READ_HEADER_TIMEOUT: Duration = Duration::from_secs(10);

/// Request limits applied by the HTTP router, per minute.
pub mod rate {
    /// Requests per minute allowed across all routes.
    pub const GENERAL_LIMIT: u32 = 5000;
    /// Requests per minute allowed on each individual route.
    pub const ROUTE_LIMIT: u32 = 500;
}

/// Size caps enforced by the wire codec before any allocation.
pub mod caps {
    /// Encoded RSA public key (PEM-wrapped PKIX DER).
    pub const KEY_BYTES: usize = 2048;
    /// RSA signature over an envelope.
    pub const SIGNATURE_BYTES: usize = 512;
    /// Opaque payload carried by a transport envelope.
    pub const DATA_BYTES: usize = 1024 * 1024;
    /// Version string inside an envelope.
    pub const VERSION_BYTES: usize = 32;
    /// Operators in an init message or result record.
    pub const OPERATORS: usize = 13;
    /// Inner messages in one signed batch.
    pub const BATCH_MESSAGES: usize = 13;
    /// Withdrawal credentials field.
    pub const WITHDRAWAL_CREDENTIALS_BYTES: usize = 64;
    /// RSA ciphertext carrying an encrypted share.
    pub const CIPHERTEXT_BYTES: usize = 1024;
    /// Encoded polynomial commitment.
    pub const COMMITMENT_BYTES: usize = 4096;
    /// A JSON artifact embedded in a result record.
    pub const ARTIFACT_BYTES: usize = 1024 * 1024;
}

/// Signature domains for the partial BLS signatures produced at the end of
/// a ceremony.
pub mod namespaces {
    /// Namespace for the partial signature over the deposit message root.
    pub const DEPOSIT: &[u8] = b"_DKG_DEPOSIT";
    /// Namespace for the partial signature binding the share to its owner.
    pub const OWNERSHIP: &[u8] = b"_DKG_OWNERSHIP";
}

/// Output filenames for persisted ceremony results.
pub mod output {
    /// Deposit data for the generated validator key.
    pub const DEPOSIT_DATA: &str = "deposit_data.json";
    /// Key share records for every operator in the ceremony.
    pub const KEYSHARES: &str = "keyshares.json";
    /// Ownership proofs for the generated shares.
    pub const PROOFS: &str = "proofs.json";
}
