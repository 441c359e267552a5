//! Per-ceremony DKG state machine.
//!
//! Each ceremony instance owns one run of the protocol from admission to
//! either its final result or a latched failure. The initiator relays the
//! phase messages: every operator deals a polynomial, broadcasts its
//! commitment (`exchange`), distributes RSA-encrypted shares (`deal`), and
//! finally derives the group key and its own share from the sum of all
//! dealings (`result`).

use std::{collections::BTreeMap, sync::Arc};

use commonware_cryptography::bls12381::{
    dkg::ops::generate_shares,
    primitives::{
        group::{Element, Scalar},
        ops::partial_sign_message,
        poly::{self, Poly},
    },
};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info};

use crate::{
    constants::namespaces,
    crypto::{self, BlsVariant, Commitment, GroupShare, ValidatorPublicKey},
    error::Error,
    wire::{
        self, CeremonyId, Deal, EncryptedShare, Exchange, Init, OperatorResult, SignedTransport,
        TransportType,
    },
};

/// A ceremony participant with its transport key parsed once at admission.
#[derive(Debug)]
struct OperatorEntry {
    id: u64,
    index: u32,
    public_key_pem: Vec<u8>,
    public_key: RsaPublicKey,
}

/// Protocol phase of an instance. Failures latch: a failed instance
/// refuses all further input and keeps its reason.
#[derive(Debug)]
enum Phase {
    AwaitingExchange,
    AwaitingDeal,
    Finished,
    Failed(String),
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Self::AwaitingExchange => "exchange",
            Self::AwaitingDeal => "deal",
            Self::Finished => "finished",
            Self::Failed(_) => "failed",
        }
    }
}

/// One ceremony's protocol state.
#[derive(Debug)]
pub struct Ceremony {
    identifier: CeremonyId,
    operator_id: u64,
    /// Our position in the strictly ordered operator list.
    index: u32,
    threshold: u32,
    version: Vec<u8>,
    private_key: Arc<RsaPrivateKey>,
    public_key_pem: Vec<u8>,
    operators: Vec<OperatorEntry>,
    init: Init,
    /// Commitment of our own dealing.
    dealer_commitment: Commitment,
    /// Shares we dealt, one per operator in list order.
    dealt_shares: Vec<GroupShare>,
    /// Commitments collected from the exchange phase, by operator index.
    received_commitments: BTreeMap<u32, Commitment>,
    /// Decrypted shares addressed to us, by dealer index.
    received_shares: BTreeMap<u32, GroupShare>,
    /// The most recent outbound envelope, kept so a re-sent batch (after a
    /// lost response) can be answered again.
    last_outbound: Option<Vec<u8>>,
    phase: Phase,
}

impl Ceremony {
    /// Construct an instance from a validated init payload and produce the
    /// signed `exchange` message for the initiator.
    ///
    /// Fails if our public key is absent from the operator list or bound to
    /// an id other than the configured one.
    pub fn new<R: rand::RngCore + rand::CryptoRng>(
        rng: &mut R,
        identifier: CeremonyId,
        operator_id: u64,
        private_key: Arc<RsaPrivateKey>,
        public_key_pem: Vec<u8>,
        version: Vec<u8>,
        init: Init,
    ) -> Result<(Self, Vec<u8>), Error> {
        let position = init
            .operators
            .iter()
            .position(|operator| operator.public_key == public_key_pem)
            .ok_or(Error::UnknownOperator)?;
        if init.operators[position].id != operator_id {
            return Err(Error::WrongOperatorID);
        }

        let operators = init
            .operators
            .iter()
            .enumerate()
            .map(|(index, operator)| {
                Ok(OperatorEntry {
                    id: operator.id,
                    index: index as u32,
                    public_key_pem: operator.public_key.clone(),
                    public_key: crypto::parse_rsa_public_key(&operator.public_key)?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let threshold = init.threshold as u32;
        let (dealer_commitment, dealt_shares) =
            generate_shares::<_, BlsVariant>(rng, None, operators.len() as u32, threshold);

        let exchange = Exchange {
            commitment: wire::encode_to_vec(&dealer_commitment),
        };

        let mut ceremony = Self {
            identifier,
            operator_id,
            index: position as u32,
            threshold,
            version,
            private_key,
            public_key_pem,
            operators,
            init,
            dealer_commitment,
            dealt_shares,
            received_commitments: BTreeMap::new(),
            received_shares: BTreeMap::new(),
            last_outbound: None,
            phase: Phase::AwaitingExchange,
        };
        let outbound = ceremony.seal(TransportType::Exchange, wire::encode_to_vec(&exchange));
        ceremony.last_outbound = Some(outbound.clone());
        info!(instance = %identifier, operator = operator_id, "initialized ceremony instance");
        Ok((ceremony, outbound))
    }

    /// Apply one authenticated protocol message.
    ///
    /// Returns the next outbound envelope once a phase completes; `None`
    /// while the batch is still partial or the message is a duplicate.
    /// Verification and processing failures latch the instance.
    pub fn process(&mut self, signed: &SignedTransport) -> Result<Option<Vec<u8>>, Error> {
        if let Phase::Failed(reason) = &self.phase {
            return Err(Error::InstanceFailed(reason.clone()));
        }
        let result = self.step(signed);
        if let Err(err) = &result {
            // Out-of-phase input is rejected without poisoning the ceremony.
            if !matches!(err, Error::UnexpectedMessageType { .. }) {
                self.phase = Phase::Failed(err.to_string());
            }
        }
        result
    }

    /// Name of the current phase, for error reporting.
    pub fn phase_name(&self) -> &'static str {
        self.phase.name()
    }

    /// The most recent outbound envelope, if any. A batch made entirely of
    /// already-processed messages is answered with this, so an initiator
    /// that lost a response can retry its last request.
    pub fn last_outbound(&self) -> Option<&[u8]> {
        self.last_outbound.as_deref()
    }

    fn step(&mut self, signed: &SignedTransport) -> Result<Option<Vec<u8>>, Error> {
        let message = &signed.message;
        if message.identifier != self.identifier {
            return Err(Error::ProcessingFailed {
                phase: self.phase.name(),
                reason: "message addressed to a different ceremony".into(),
            });
        }
        if message.version != self.version {
            return Err(Error::VersionMismatch {
                remote: String::from_utf8_lossy(&message.version).into_owned(),
                local: String::from_utf8_lossy(&self.version).into_owned(),
            });
        }

        let expected = match &self.phase {
            Phase::AwaitingExchange => TransportType::Exchange,
            Phase::AwaitingDeal => TransportType::Deal,
            Phase::Finished => {
                return Err(Error::UnexpectedMessageType {
                    got: message.kind,
                    phase: "finished",
                });
            }
            Phase::Failed(reason) => return Err(Error::InstanceFailed(reason.clone())),
        };
        if message.kind != expected {
            return Err(Error::UnexpectedMessageType {
                got: message.kind,
                phase: self.phase.name(),
            });
        }

        let (sender_id, sender_index) = {
            let sender = self
                .operators
                .iter()
                .find(|operator| operator.public_key_pem == signed.signer)
                .ok_or(Error::UnknownOperator)?;
            let encoded = wire::encode_to_vec(message);
            if !crypto::verify_rsa(&sender.public_key, &encoded, &signed.signature) {
                return Err(Error::BadOperatorSignature(sender.id));
            }
            (sender.id, sender.index)
        };

        match expected {
            TransportType::Exchange => self.handle_exchange(sender_id, sender_index, &message.data),
            TransportType::Deal => self.handle_deal(sender_id, sender_index, &message.data),
            _ => unreachable!("phase gate only admits exchange and deal"),
        }
    }

    /// Collect a dealer's commitment; once all are in, answer with our deal.
    fn handle_exchange(
        &mut self,
        from_id: u64,
        from_index: u32,
        data: &[u8],
    ) -> Result<Option<Vec<u8>>, Error> {
        if self.received_commitments.contains_key(&from_index) {
            debug!(instance = %self.identifier, from = from_id, "duplicate exchange message");
            return Ok(None);
        }
        let exchange: Exchange = wire::decode_exact(data)?;
        let commitment = crypto::decode_commitment(&exchange.commitment, self.threshold)?;
        if from_index == self.index && commitment != self.dealer_commitment {
            return Err(Error::ProcessingFailed {
                phase: "exchange",
                reason: "own commitment does not match the dealt polynomial".into(),
            });
        }
        self.received_commitments.insert(from_index, commitment);
        debug!(
            instance = %self.identifier,
            from = from_id,
            collected = self.received_commitments.len(),
            "collected dealer commitment"
        );
        if self.received_commitments.len() < self.operators.len() {
            return Ok(None);
        }

        let mut shares = Vec::with_capacity(self.operators.len());
        for operator in &self.operators {
            let share = &self.dealt_shares[operator.index as usize];
            let ciphertext =
                crypto::encrypt_rsa(&operator.public_key, &wire::encode_to_vec(share))?;
            shares.push(EncryptedShare {
                operator_id: operator.id,
                ciphertext,
            });
        }
        let deal = Deal { shares };
        self.phase = Phase::AwaitingDeal;
        let outbound = self.seal(TransportType::Deal, wire::encode_to_vec(&deal));
        self.last_outbound = Some(outbound.clone());
        Ok(Some(outbound))
    }

    /// Decrypt and verify our share of a dealing; once all are in, finalize.
    fn handle_deal(
        &mut self,
        from_id: u64,
        from_index: u32,
        data: &[u8],
    ) -> Result<Option<Vec<u8>>, Error> {
        if self.received_shares.contains_key(&from_index) {
            debug!(instance = %self.identifier, from = from_id, "duplicate deal message");
            return Ok(None);
        }
        let deal: Deal = wire::decode_exact(data)?;
        let encrypted = deal
            .shares
            .iter()
            .find(|share| share.operator_id == self.operator_id)
            .ok_or_else(|| Error::ProcessingFailed {
                phase: "deal",
                reason: "no share addressed to this operator".into(),
            })?;
        let plaintext = crypto::decrypt_rsa(&self.private_key, &encrypted.ciphertext)?;
        let share = crypto::decode_share(&plaintext)?;
        if share.index != self.index {
            return Err(Error::ProcessingFailed {
                phase: "deal",
                reason: "share carries the wrong evaluation index".into(),
            });
        }

        let commitment =
            self.received_commitments
                .get(&from_index)
                .ok_or_else(|| Error::ProcessingFailed {
                    phase: "deal",
                    reason: "no commitment from this dealer".into(),
                })?;
        let mut expected = ValidatorPublicKey::one();
        expected.mul(&share.private);
        if commitment.evaluate(self.index).value != expected {
            return Err(Error::ProcessingFailed {
                phase: "deal",
                reason: "share does not match the dealer commitment".into(),
            });
        }

        self.received_shares.insert(from_index, share);
        debug!(
            instance = %self.identifier,
            from = from_id,
            collected = self.received_shares.len(),
            "collected dealt share"
        );
        if self.received_shares.len() < self.operators.len() {
            return Ok(None);
        }
        self.finalize().map(Some)
    }

    /// Sum the dealings into the group key, derive our share, and produce
    /// the signed result message.
    fn finalize(&mut self) -> Result<Vec<u8>, Error> {
        let mut private = Scalar::zero();
        for share in self.received_shares.values() {
            private.add(&share.private);
        }
        let mut group_commitment: Commitment = Poly::zero();
        for commitment in self.received_commitments.values() {
            group_commitment.add(commitment);
        }
        let share = GroupShare {
            index: self.index,
            private,
        };
        let validator_public_key = poly::public::<BlsVariant>(&group_commitment).clone();
        let public_key_bytes = wire::encode_to_vec(&validator_public_key);

        let deposit_root = crypto::deposit_message_root(
            &public_key_bytes,
            &self.init.withdrawal_credentials,
            &self.init.fork,
        );
        let deposit_partial =
            partial_sign_message::<BlsVariant>(&share, Some(namespaces::DEPOSIT), &deposit_root);

        let proof_root = crypto::ownership_proof_root(
            &self.identifier,
            &self.init.owner,
            self.init.nonce,
            &public_key_bytes,
        );
        let ownership_partial =
            partial_sign_message::<BlsVariant>(&share, Some(namespaces::OWNERSHIP), &proof_root);

        // The share never leaves this process in the clear; it rides along
        // encrypted to our own key so it can be archived with the results.
        let own_key = &self.operators[self.index as usize].public_key;
        let encrypted_share = crypto::encrypt_rsa(own_key, &wire::encode_to_vec(&share))?;

        let result = OperatorResult {
            operator_id: self.operator_id,
            identifier: self.identifier,
            validator_public_key: public_key_bytes,
            commitments: wire::encode_to_vec(&group_commitment),
            partial_deposit_signature: wire::encode_to_vec(&deposit_partial.value),
            partial_ownership_signature: wire::encode_to_vec(&ownership_partial.value),
            encrypted_share,
        };
        self.phase = Phase::Finished;
        info!(
            instance = %self.identifier,
            operator = self.operator_id,
            validator = %const_hex::encode(&result.validator_public_key),
            "ceremony finished, result ready"
        );
        let outbound = self.seal(TransportType::Result, wire::encode_to_vec(&result));
        self.last_outbound = Some(outbound.clone());
        Ok(outbound)
    }

    fn seal(&self, kind: TransportType, data: Vec<u8>) -> Vec<u8> {
        crypto::seal_transport(
            &self.private_key,
            &self.public_key_pem,
            kind,
            self.identifier,
            data,
            &self.version,
        )
    }
}
