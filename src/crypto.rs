//! RSA transport authentication, BLS12-381 aliases, and message roots.
//!
//! Operators authenticate every envelope with RSA-PKCS#1 v1.5 over SHA-256
//! and move secret shares between each other as RSA ciphertexts. The
//! generated validator key lives on BLS12-381 with 48-byte G1 public keys.

use alloy_primitives::Address;
use commonware_cryptography::bls12381::primitives::{
    group::Share,
    poly::Public,
    variant::{MinPk, Variant},
};
use rsa::{
    Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey,
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding},
    signature::{SignatureEncoding, Signer, Verifier},
};
use sha2::{Digest, Sha256};

use crate::{
    constants::{DEPOSIT_AMOUNT_GWEI, ETH1_WITHDRAWAL_PREFIX},
    error::Error,
    wire::{self, CeremonyId, SignedTransport, Transport, TransportType},
};

/// Modulus size of operator and initiator identities.
pub const RSA_KEY_BITS: usize = 2048;

/// Pairing variant for generated validator keys: public keys on G1.
pub type BlsVariant = MinPk;
/// Public polynomial commitment of a dealing.
pub type Commitment = Public<BlsVariant>;
/// An indexed share of the group secret.
pub type GroupShare = Share;
/// The generated validator public key.
pub type ValidatorPublicKey = <BlsVariant as Variant>::Public;
/// A (partial) BLS signature under the group key.
pub type BlsSignature = <BlsVariant as Variant>::Signature;

/// Generate a fresh operator identity.
pub fn generate_rsa_keypair() -> Result<RsaPrivateKey, Error> {
    Ok(RsaPrivateKey::new(&mut rand::thread_rng(), RSA_KEY_BITS)?)
}

/// RSA-PKCS#1 v1.5 signature over `message` with SHA-256.
pub fn sign_rsa(key: &RsaPrivateKey, message: &[u8]) -> Vec<u8> {
    SigningKey::<Sha256>::new(key.clone()).sign(message).to_vec()
}

/// Verify an RSA-PKCS#1 v1.5 signature. Callers map a `false` into the
/// identity-specific error for their context.
pub fn verify_rsa(key: &RsaPublicKey, message: &[u8], signature: &[u8]) -> bool {
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };
    VerifyingKey::<Sha256>::new(key.clone())
        .verify(message, &signature)
        .is_ok()
}

/// RSA-PKCS#1 v1.5 encryption of a short message (a share) to `key`.
pub fn encrypt_rsa(key: &RsaPublicKey, message: &[u8]) -> Result<Vec<u8>, Error> {
    Ok(key.encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, message)?)
}

/// Decrypt an RSA-PKCS#1 v1.5 ciphertext with the operator key.
pub fn decrypt_rsa(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    Ok(key.decrypt(Pkcs1v15Encrypt, ciphertext)?)
}

/// Encode a public key as PEM-wrapped PKIX DER, the format carried on the
/// wire and stored in operator lists.
pub fn encode_rsa_public_key(key: &RsaPublicKey) -> Result<Vec<u8>, Error> {
    Ok(key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|err| Error::InvalidKey(err.to_string()))?
        .into_bytes())
}

/// Parse a PEM-wrapped PKIX public key.
pub fn parse_rsa_public_key(bytes: &[u8]) -> Result<RsaPublicKey, Error> {
    let pem = std::str::from_utf8(bytes).map_err(|err| Error::InvalidKey(err.to_string()))?;
    RsaPublicKey::from_public_key_pem(pem).map_err(|err| Error::InvalidKey(err.to_string()))
}

/// Load a PKCS#8 PEM private key from disk.
pub fn load_rsa_private_key(path: &std::path::Path) -> Result<RsaPrivateKey, Error> {
    let pem = std::fs::read_to_string(path)?;
    RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|err| Error::InvalidKey(err.to_string()))
}

/// Write a private key to disk as PKCS#8 PEM.
pub fn save_rsa_private_key(path: &std::path::Path, key: &RsaPrivateKey) -> Result<(), Error> {
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|err| Error::InvalidKey(err.to_string()))?;
    Ok(std::fs::write(path, pem.as_bytes())?)
}

/// Envelope `data` into a [`Transport`], sign it, and encode the resulting
/// [`SignedTransport`].
pub fn seal_transport(
    private_key: &RsaPrivateKey,
    signer: &[u8],
    kind: TransportType,
    identifier: CeremonyId,
    data: Vec<u8>,
    version: &[u8],
) -> Vec<u8> {
    let message = Transport {
        kind,
        identifier,
        data,
        version: version.to_vec(),
    };
    let signature = sign_rsa(private_key, &wire::encode_to_vec(&message));
    wire::encode_to_vec(&SignedTransport {
        message,
        signer: signer.to_vec(),
        signature,
    })
}

/// Decode an encoded polynomial commitment of degree `threshold - 1`.
pub fn decode_commitment(bytes: &[u8], threshold: u32) -> Result<Commitment, Error> {
    use commonware_codec::Read as _;
    let mut buf = bytes;
    let commitment = Commitment::read_cfg(&mut buf, &(threshold as usize))?;
    if !buf.is_empty() {
        return Err(Error::Malformed(commonware_codec::Error::Invalid(
            "commitment",
            "trailing bytes",
        )));
    }
    Ok(commitment)
}

/// Decode an indexed group share from a decrypted plaintext.
pub fn decode_share(bytes: &[u8]) -> Result<GroupShare, Error> {
    use commonware_codec::ReadExt as _;
    let mut buf = bytes;
    let share = GroupShare::read(&mut buf)?;
    if !buf.is_empty() {
        return Err(Error::Malformed(commonware_codec::Error::Invalid(
            "share",
            "trailing bytes",
        )));
    }
    Ok(share)
}

/// Root signed by every operator's partial deposit signature:
/// `sha256(pubkey || withdrawal_credentials || amount || fork)`.
pub fn deposit_message_root(
    validator_public_key: &[u8],
    withdrawal_credentials: &[u8],
    fork: &alloy_primitives::FixedBytes<4>,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(validator_public_key);
    hasher.update(withdrawal_credentials);
    hasher.update(DEPOSIT_AMOUNT_GWEI.to_be_bytes());
    hasher.update(fork.as_slice());
    hasher.finalize().into()
}

/// Root signed by every operator's partial ownership proof, binding the
/// generated key to the owner address and nonce from the init payload:
/// `sha256(identifier || owner || nonce || pubkey)`.
pub fn ownership_proof_root(
    identifier: &CeremonyId,
    owner: &Address,
    nonce: u64,
    validator_public_key: &[u8],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(identifier.0);
    hasher.update(owner.as_slice());
    hasher.update(nonce.to_be_bytes());
    hasher.update(validator_public_key);
    hasher.finalize().into()
}

/// Split 32-byte withdrawal credentials into prefix and execution address.
/// Only the ETH1 prefix (`0x01`) is accepted.
pub fn parse_withdrawal_credentials(credentials: &[u8]) -> Result<(u8, Address), Error> {
    if credentials.len() != 32 {
        return Err(Error::InvalidArtifact(format!(
            "withdrawal credentials must be 32 bytes, got {}",
            credentials.len()
        )));
    }
    let prefix = credentials[0];
    if prefix != ETH1_WITHDRAWAL_PREFIX {
        return Err(Error::InvalidWithdrawalPrefix(prefix));
    }
    Ok((prefix, Address::from_slice(&credentials[12..32])))
}
