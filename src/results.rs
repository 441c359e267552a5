//! Parsing and persistence of ceremony result artifacts.
//!
//! The initiator aggregates every operator's output into three JSON
//! documents and posts them back through `/results`. The operator only
//! validates their shape and the withdrawal credentials; the documents are
//! then persisted verbatim under a per-ceremony directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    constants::output,
    error::Error,
    wire::{CeremonyId, ResultData},
};

/// Deposit data for the generated validator key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositData {
    pub pubkey: String,
    pub withdrawal_credentials: String,
    pub amount: u64,
    pub signature: String,
    pub fork_version: String,
}

/// Key share records for every operator in the ceremony.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyShares {
    pub version: String,
    pub shares: Vec<KeyShare>,
}

/// One operator's share record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyShare {
    pub operator_id: u64,
    pub public_key: String,
    pub encrypted_share: String,
    pub owner_address: String,
    pub owner_nonce: u64,
}

/// An ownership proof signed under the group key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedProof {
    pub proof: Proof,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
    pub validator_public_key: String,
    pub owner: String,
    pub encrypted_share: String,
}

/// The three parsed artifacts of a concluded ceremony.
pub struct Artifacts {
    pub deposit_data: DepositData,
    pub keyshares: KeyShares,
    pub proofs: Vec<SignedProof>,
}

impl Artifacts {
    /// Parse the embedded JSON documents of a result record.
    pub fn parse(data: &ResultData) -> Result<Self, Error> {
        let deposit_data = serde_json::from_slice(&data.deposit_data)
            .map_err(|err| Error::InvalidArtifact(format!("deposit data: {err}")))?;
        let keyshares = serde_json::from_slice(&data.keyshares)
            .map_err(|err| Error::InvalidArtifact(format!("keyshares: {err}")))?;
        let proofs = serde_json::from_slice(&data.proofs)
            .map_err(|err| Error::InvalidArtifact(format!("proofs: {err}")))?;
        Ok(Self {
            deposit_data,
            keyshares,
            proofs,
        })
    }
}

/// Persist the artifacts under `<output>/ceremony-<id>/`, returning the
/// directory written to.
pub fn write_results(
    output_path: &Path,
    identifier: &CeremonyId,
    artifacts: &Artifacts,
) -> Result<PathBuf, Error> {
    let dir = output_path.join(format!("ceremony-{identifier}"));
    std::fs::create_dir_all(&dir)?;

    let deposit_path = dir.join(output::DEPOSIT_DATA);
    std::fs::write(&deposit_path, pretty(&artifacts.deposit_data)?)?;
    info!("Wrote {}", deposit_path.display());

    let keyshares_path = dir.join(output::KEYSHARES);
    std::fs::write(&keyshares_path, pretty(&artifacts.keyshares)?)?;
    info!("Wrote {}", keyshares_path.display());

    let proofs_path = dir.join(output::PROOFS);
    std::fs::write(&proofs_path, pretty(&artifacts.proofs)?)?;
    info!("Wrote {}", proofs_path.display());

    Ok(dir)
}

fn pretty<T: Serialize>(value: &T) -> Result<String, Error> {
    serde_json::to_string_pretty(value)
        .map_err(|err| Error::InvalidArtifact(format!("serializing artifact: {err}")))
}
