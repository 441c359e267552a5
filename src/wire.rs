//! Transport envelopes and their deterministic binary codec.
//!
//! Every message exchanged with the initiator uses the same scheme:
//! fixed-width scalars big-endian, variable-length fields prefixed with a
//! 4-byte length, ceremony identifiers transmitted as raw 24-byte strings.
//! Compatibility across operators is bit-exact; decoders enforce per-field
//! caps and reject trailing bytes.

use bytes::{Buf, BufMut};
use commonware_codec::{Encode, EncodeSize, Error as CodecError, Read, ReadExt, Write};

use crate::{constants::caps, error::Error};

/// Opaque 24-byte ceremony identifier chosen by the initiator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CeremonyId(pub [u8; 24]);

impl CeremonyId {
    /// The all-zero identifier used by unaddressed envelopes such as pong.
    pub const NONE: Self = Self([0u8; 24]);
}

impl std::fmt::Display for CeremonyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&const_hex::encode(self.0))
    }
}

impl Write for CeremonyId {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0);
    }
}

impl EncodeSize for CeremonyId {
    fn encode_size(&self) -> usize {
        24
    }
}

impl Read for CeremonyId {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _cfg: &Self::Cfg) -> Result<Self, CodecError> {
        Ok(Self(read_array::<24>(buf)?))
    }
}

/// Discriminant carried by every transport envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportType {
    Init = 1,
    Exchange = 2,
    Deal = 3,
    Result = 4,
    Pong = 5,
    Error = 6,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Exchange => "exchange",
            Self::Deal => "deal",
            Self::Result => "result",
            Self::Pong => "pong",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

impl Write for TransportType {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(*self as u8);
    }
}

impl EncodeSize for TransportType {
    fn encode_size(&self) -> usize {
        1
    }
}

impl Read for TransportType {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _cfg: &Self::Cfg) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            1 => Ok(Self::Init),
            2 => Ok(Self::Exchange),
            3 => Ok(Self::Deal),
            4 => Ok(Self::Result),
            5 => Ok(Self::Pong),
            6 => Ok(Self::Error),
            tag => Err(CodecError::InvalidEnum(tag)),
        }
    }
}

/// Envelope around every protocol payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transport {
    pub kind: TransportType,
    pub identifier: CeremonyId,
    pub data: Vec<u8>,
    pub version: Vec<u8>,
}

impl Write for Transport {
    fn write(&self, buf: &mut impl BufMut) {
        self.kind.write(buf);
        self.identifier.write(buf);
        write_bytes(buf, &self.data);
        write_bytes(buf, &self.version);
    }
}

impl EncodeSize for Transport {
    fn encode_size(&self) -> usize {
        self.kind.encode_size() + self.identifier.encode_size() + 4 + self.data.len() + 4 + self.version.len()
    }
}

impl Read for Transport {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _cfg: &Self::Cfg) -> Result<Self, CodecError> {
        Ok(Self {
            kind: TransportType::read(buf)?,
            identifier: CeremonyId::read(buf)?,
            data: read_bytes(buf, caps::DATA_BYTES)?,
            version: read_bytes(buf, caps::VERSION_BYTES)?,
        })
    }
}

/// A transport envelope plus the RSA identity and signature of its author.
///
/// The signature covers the encoded [`Transport`]; `signer` is the author's
/// PEM-encoded public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTransport {
    pub message: Transport,
    pub signer: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Write for SignedTransport {
    fn write(&self, buf: &mut impl BufMut) {
        self.message.write(buf);
        write_bytes(buf, &self.signer);
        write_bytes(buf, &self.signature);
    }
}

impl EncodeSize for SignedTransport {
    fn encode_size(&self) -> usize {
        self.message.encode_size() + 4 + self.signer.len() + 4 + self.signature.len()
    }
}

impl Read for SignedTransport {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _cfg: &Self::Cfg) -> Result<Self, CodecError> {
        Ok(Self {
            message: Transport::read(buf)?,
            signer: read_bytes(buf, caps::KEY_BYTES)?,
            signature: read_bytes(buf, caps::SIGNATURE_BYTES)?,
        })
    }
}

/// A batch of per-operator messages aggregated by the initiator.
///
/// The outer signature covers the concatenation of every inner
/// [`SignedTransport`], re-serialized in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipleSignedTransports {
    pub identifier: CeremonyId,
    pub messages: Vec<SignedTransport>,
    pub signature: Vec<u8>,
}

impl Write for MultipleSignedTransports {
    fn write(&self, buf: &mut impl BufMut) {
        self.identifier.write(buf);
        buf.put_u32(self.messages.len() as u32);
        for message in &self.messages {
            message.write(buf);
        }
        write_bytes(buf, &self.signature);
    }
}

impl EncodeSize for MultipleSignedTransports {
    fn encode_size(&self) -> usize {
        self.identifier.encode_size()
            + 4
            + self.messages.iter().map(EncodeSize::encode_size).sum::<usize>()
            + 4
            + self.signature.len()
    }
}

impl Read for MultipleSignedTransports {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _cfg: &Self::Cfg) -> Result<Self, CodecError> {
        let identifier = CeremonyId::read(buf)?;
        let count = read_len(buf, caps::BATCH_MESSAGES)?;
        let mut messages = Vec::with_capacity(count);
        for _ in 0..count {
            messages.push(SignedTransport::read(buf)?);
        }
        Ok(Self {
            identifier,
            messages,
            signature: read_bytes(buf, caps::SIGNATURE_BYTES)?,
        })
    }
}

/// One ceremony participant: stable id plus transport RSA public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operator {
    pub id: u64,
    pub public_key: Vec<u8>,
}

impl Write for Operator {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.id);
        write_bytes(buf, &self.public_key);
    }
}

impl EncodeSize for Operator {
    fn encode_size(&self) -> usize {
        8 + 4 + self.public_key.len()
    }
}

impl Read for Operator {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _cfg: &Self::Cfg) -> Result<Self, CodecError> {
        Ok(Self {
            id: read_u64(buf)?,
            public_key: read_bytes(buf, caps::KEY_BYTES)?,
        })
    }
}

/// Structural parameters of a ceremony, chosen by the initiator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Init {
    /// Participants, strictly ascending by operator id.
    pub operators: Vec<Operator>,
    /// Number of shares required to sign with the generated key.
    pub threshold: u64,
    /// 32-byte ETH1 withdrawal credentials for the generated validator.
    pub withdrawal_credentials: Vec<u8>,
    /// Fork version the deposit is bound to.
    pub fork: alloy_primitives::FixedBytes<4>,
    /// Address owning the resulting validator.
    pub owner: alloy_primitives::Address,
    /// Owner nonce bound into the ownership proofs.
    pub nonce: u64,
}

impl Write for Init {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.operators.len() as u32);
        for operator in &self.operators {
            operator.write(buf);
        }
        buf.put_u64(self.threshold);
        write_bytes(buf, &self.withdrawal_credentials);
        buf.put_slice(self.fork.as_slice());
        buf.put_slice(self.owner.as_slice());
        buf.put_u64(self.nonce);
    }
}

impl EncodeSize for Init {
    fn encode_size(&self) -> usize {
        4 + self.operators.iter().map(EncodeSize::encode_size).sum::<usize>()
            + 8
            + 4
            + self.withdrawal_credentials.len()
            + 4
            + 20
            + 8
    }
}

impl Read for Init {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _cfg: &Self::Cfg) -> Result<Self, CodecError> {
        let count = read_len(buf, caps::OPERATORS)?;
        let mut operators = Vec::with_capacity(count);
        for _ in 0..count {
            operators.push(Operator::read(buf)?);
        }
        Ok(Self {
            operators,
            threshold: read_u64(buf)?,
            withdrawal_credentials: read_bytes(buf, caps::WITHDRAWAL_CREDENTIALS_BYTES)?,
            fork: alloy_primitives::FixedBytes(read_array::<4>(buf)?),
            owner: alloy_primitives::Address::from(read_array::<20>(buf)?),
            nonce: read_u64(buf)?,
        })
    }
}

/// First outbound message of an operator: its polynomial commitment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exchange {
    /// Encoded public polynomial of the operator's dealing.
    pub commitment: Vec<u8>,
}

impl Write for Exchange {
    fn write(&self, buf: &mut impl BufMut) {
        write_bytes(buf, &self.commitment);
    }
}

impl EncodeSize for Exchange {
    fn encode_size(&self) -> usize {
        4 + self.commitment.len()
    }
}

impl Read for Exchange {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _cfg: &Self::Cfg) -> Result<Self, CodecError> {
        Ok(Self {
            commitment: read_bytes(buf, caps::COMMITMENT_BYTES)?,
        })
    }
}

/// An encrypted share addressed to one operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedShare {
    pub operator_id: u64,
    /// RSA-PKCS#1 v1.5 ciphertext of the recipient's encoded share.
    pub ciphertext: Vec<u8>,
}

impl Write for EncryptedShare {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.operator_id);
        write_bytes(buf, &self.ciphertext);
    }
}

impl EncodeSize for EncryptedShare {
    fn encode_size(&self) -> usize {
        8 + 4 + self.ciphertext.len()
    }
}

impl Read for EncryptedShare {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _cfg: &Self::Cfg) -> Result<Self, CodecError> {
        Ok(Self {
            operator_id: read_u64(buf)?,
            ciphertext: read_bytes(buf, caps::CIPHERTEXT_BYTES)?,
        })
    }
}

/// Second outbound message of an operator: one encrypted share per peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deal {
    pub shares: Vec<EncryptedShare>,
}

impl Write for Deal {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.shares.len() as u32);
        for share in &self.shares {
            share.write(buf);
        }
    }
}

impl EncodeSize for Deal {
    fn encode_size(&self) -> usize {
        4 + self.shares.iter().map(EncodeSize::encode_size).sum::<usize>()
    }
}

impl Read for Deal {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _cfg: &Self::Cfg) -> Result<Self, CodecError> {
        let count = read_len(buf, caps::OPERATORS)?;
        let mut shares = Vec::with_capacity(count);
        for _ in 0..count {
            shares.push(EncryptedShare::read(buf)?);
        }
        Ok(Self { shares })
    }
}

/// Final outbound message of an operator after a successful ceremony.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorResult {
    pub operator_id: u64,
    pub identifier: CeremonyId,
    /// 48-byte public key of the generated validator.
    pub validator_public_key: Vec<u8>,
    /// Group public polynomial the partial signatures verify against.
    pub commitments: Vec<u8>,
    /// This operator's partial signature over the deposit message root.
    pub partial_deposit_signature: Vec<u8>,
    /// Partial signature binding the share to the owner address and nonce.
    pub partial_ownership_signature: Vec<u8>,
    /// The operator's share, encrypted to its own RSA key.
    pub encrypted_share: Vec<u8>,
}

impl Write for OperatorResult {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.operator_id);
        self.identifier.write(buf);
        write_bytes(buf, &self.validator_public_key);
        write_bytes(buf, &self.commitments);
        write_bytes(buf, &self.partial_deposit_signature);
        write_bytes(buf, &self.partial_ownership_signature);
        write_bytes(buf, &self.encrypted_share);
    }
}

impl EncodeSize for OperatorResult {
    fn encode_size(&self) -> usize {
        8 + self.identifier.encode_size()
            + 4
            + self.validator_public_key.len()
            + 4
            + self.commitments.len()
            + 4
            + self.partial_deposit_signature.len()
            + 4
            + self.partial_ownership_signature.len()
            + 4
            + self.encrypted_share.len()
    }
}

impl Read for OperatorResult {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _cfg: &Self::Cfg) -> Result<Self, CodecError> {
        Ok(Self {
            operator_id: read_u64(buf)?,
            identifier: CeremonyId::read(buf)?,
            validator_public_key: read_bytes(buf, caps::KEY_BYTES)?,
            commitments: read_bytes(buf, caps::COMMITMENT_BYTES)?,
            partial_deposit_signature: read_bytes(buf, caps::SIGNATURE_BYTES)?,
            partial_ownership_signature: read_bytes(buf, caps::SIGNATURE_BYTES)?,
            encrypted_share: read_bytes(buf, caps::CIPHERTEXT_BYTES)?,
        })
    }
}

/// Aggregated ceremony artifacts submitted by the initiator to `/results`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultData {
    pub identifier: CeremonyId,
    pub operators: Vec<Operator>,
    /// JSON deposit data for the generated validator.
    pub deposit_data: Vec<u8>,
    /// JSON key share records.
    pub keyshares: Vec<u8>,
    /// JSON ownership proofs.
    pub proofs: Vec<u8>,
}

impl Write for ResultData {
    fn write(&self, buf: &mut impl BufMut) {
        self.identifier.write(buf);
        buf.put_u32(self.operators.len() as u32);
        for operator in &self.operators {
            operator.write(buf);
        }
        write_bytes(buf, &self.deposit_data);
        write_bytes(buf, &self.keyshares);
        write_bytes(buf, &self.proofs);
    }
}

impl EncodeSize for ResultData {
    fn encode_size(&self) -> usize {
        self.identifier.encode_size()
            + 4
            + self.operators.iter().map(EncodeSize::encode_size).sum::<usize>()
            + 4
            + self.deposit_data.len()
            + 4
            + self.keyshares.len()
            + 4
            + self.proofs.len()
    }
}

impl Read for ResultData {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _cfg: &Self::Cfg) -> Result<Self, CodecError> {
        let identifier = CeremonyId::read(buf)?;
        let count = read_len(buf, caps::OPERATORS)?;
        let mut operators = Vec::with_capacity(count);
        for _ in 0..count {
            operators.push(Operator::read(buf)?);
        }
        Ok(Self {
            identifier,
            operators,
            deposit_data: read_bytes(buf, caps::ARTIFACT_BYTES)?,
            keyshares: read_bytes(buf, caps::ARTIFACT_BYTES)?,
            proofs: read_bytes(buf, caps::ARTIFACT_BYTES)?,
        })
    }
}

/// Signed liveness reply identifying the operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pong {
    pub operator_id: u64,
    pub public_key: Vec<u8>,
}

impl Write for Pong {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.operator_id);
        write_bytes(buf, &self.public_key);
    }
}

impl EncodeSize for Pong {
    fn encode_size(&self) -> usize {
        8 + 4 + self.public_key.len()
    }
}

impl Read for Pong {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _cfg: &Self::Cfg) -> Result<Self, CodecError> {
        Ok(Self {
            operator_id: read_u64(buf)?,
            public_key: read_bytes(buf, caps::KEY_BYTES)?,
        })
    }
}

/// Encode a value into a standalone byte vector.
pub fn encode_to_vec<T: Encode>(value: &T) -> Vec<u8> {
    value.encode().as_ref().to_vec()
}

/// Decode a value and reject any trailing bytes.
pub fn decode_exact<T>(mut bytes: &[u8]) -> Result<T, Error>
where
    T: Read<Cfg = ()>,
{
    let value = T::read(&mut bytes)?;
    if !bytes.is_empty() {
        return Err(Error::Malformed(CodecError::Invalid("wire", "trailing bytes")));
    }
    Ok(value)
}

fn write_bytes(buf: &mut impl BufMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

fn read_len(buf: &mut impl Buf, cap: usize) -> Result<usize, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::EndOfBuffer);
    }
    let len = buf.get_u32() as usize;
    if len > cap {
        return Err(CodecError::Invalid("wire", "length exceeds cap"));
    }
    Ok(len)
}

fn read_bytes(buf: &mut impl Buf, cap: usize) -> Result<Vec<u8>, CodecError> {
    let len = read_len(buf, cap)?;
    if buf.remaining() < len {
        return Err(CodecError::EndOfBuffer);
    }
    let mut data = vec![0u8; len];
    buf.copy_to_slice(&mut data);
    Ok(data)
}

fn read_array<const N: usize>(buf: &mut impl Buf) -> Result<[u8; N], CodecError> {
    if buf.remaining() < N {
        return Err(CodecError::EndOfBuffer);
    }
    let mut array = [0u8; N];
    buf.copy_to_slice(&mut array);
    Ok(array)
}

fn read_u64(buf: &mut impl Buf) -> Result<u64, CodecError> {
    if buf.remaining() < 8 {
        return Err(CodecError::EndOfBuffer);
    }
    Ok(buf.get_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transport() -> Transport {
        Transport {
            kind: TransportType::Init,
            identifier: CeremonyId([7u8; 24]),
            data: vec![1, 2, 3, 4],
            version: b"v2.1.0".to_vec(),
        }
    }

    fn sample_init() -> Init {
        Init {
            operators: (1..=4)
                .map(|id| Operator {
                    id,
                    public_key: vec![id as u8; 32],
                })
                .collect(),
            threshold: 3,
            withdrawal_credentials: {
                let mut creds = vec![0u8; 32];
                creds[0] = 0x01;
                creds
            },
            fork: alloy_primitives::FixedBytes([0, 0, 16, 32]),
            owner: alloy_primitives::Address::repeat_byte(0xAA),
            nonce: 9,
        }
    }

    #[test]
    fn transport_roundtrip() {
        let transport = sample_transport();
        let bytes = encode_to_vec(&transport);
        assert_eq!(bytes.len(), transport.encode_size());
        assert_eq!(decode_exact::<Transport>(&bytes).unwrap(), transport);
    }

    #[test]
    fn signed_transport_roundtrip() {
        let signed = SignedTransport {
            message: sample_transport(),
            signer: vec![9u8; 64],
            signature: vec![8u8; 128],
        };
        let bytes = encode_to_vec(&signed);
        assert_eq!(bytes.len(), signed.encode_size());
        assert_eq!(decode_exact::<SignedTransport>(&bytes).unwrap(), signed);
    }

    #[test]
    fn batch_roundtrip() {
        let signed = SignedTransport {
            message: sample_transport(),
            signer: vec![9u8; 64],
            signature: vec![8u8; 128],
        };
        let batch = MultipleSignedTransports {
            identifier: CeremonyId([7u8; 24]),
            messages: vec![signed.clone(), signed],
            signature: vec![5u8; 128],
        };
        let bytes = encode_to_vec(&batch);
        assert_eq!(bytes.len(), batch.encode_size());
        assert_eq!(decode_exact::<MultipleSignedTransports>(&bytes).unwrap(), batch);
    }

    #[test]
    fn init_roundtrip() {
        let init = sample_init();
        let bytes = encode_to_vec(&init);
        assert_eq!(bytes.len(), init.encode_size());
        assert_eq!(decode_exact::<Init>(&bytes).unwrap(), init);
    }

    #[test]
    fn payload_roundtrips() {
        let exchange = Exchange {
            commitment: vec![3u8; 96],
        };
        assert_eq!(
            decode_exact::<Exchange>(&encode_to_vec(&exchange)).unwrap(),
            exchange
        );

        let deal = Deal {
            shares: vec![EncryptedShare {
                operator_id: 4,
                ciphertext: vec![1u8; 256],
            }],
        };
        assert_eq!(decode_exact::<Deal>(&encode_to_vec(&deal)).unwrap(), deal);

        let result = OperatorResult {
            operator_id: 2,
            identifier: CeremonyId([1u8; 24]),
            validator_public_key: vec![2u8; 48],
            commitments: vec![3u8; 144],
            partial_deposit_signature: vec![4u8; 96],
            partial_ownership_signature: vec![5u8; 96],
            encrypted_share: vec![6u8; 256],
        };
        assert_eq!(
            decode_exact::<OperatorResult>(&encode_to_vec(&result)).unwrap(),
            result
        );

        let pong = Pong {
            operator_id: 11,
            public_key: vec![7u8; 64],
        };
        assert_eq!(decode_exact::<Pong>(&encode_to_vec(&pong)).unwrap(), pong);

        let data = ResultData {
            identifier: CeremonyId([2u8; 24]),
            operators: sample_init().operators,
            deposit_data: br#"{"amount":32000000000}"#.to_vec(),
            keyshares: br#"{"shares":[]}"#.to_vec(),
            proofs: br#"[]"#.to_vec(),
        };
        assert_eq!(
            decode_exact::<ResultData>(&encode_to_vec(&data)).unwrap(),
            data
        );
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = encode_to_vec(&sample_transport());
        bytes.push(0);
        assert!(decode_exact::<Transport>(&bytes).is_err());
    }

    #[test]
    fn truncated_input_rejected() {
        let bytes = encode_to_vec(&sample_transport());
        assert!(decode_exact::<Transport>(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn unknown_discriminant_rejected() {
        let mut bytes = encode_to_vec(&sample_transport());
        bytes[0] = 9;
        assert!(decode_exact::<Transport>(&bytes).is_err());
    }

    #[test]
    fn oversized_field_rejected() {
        // A batch claiming more inner messages than the cap permits.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0u8; 24]);
        bytes.extend_from_slice(&(caps::BATCH_MESSAGES as u32 + 1).to_be_bytes());
        assert!(decode_exact::<MultipleSignedTransports>(&bytes).is_err());
    }
}
