//! Concurrent registry of ceremony instances.
//!
//! The switch is the process-wide owner of every live ceremony: it admits
//! new instances, routes batched protocol messages to them, authenticates
//! result submissions, and ages out abandoned ceremonies. Requests arrive
//! concurrently from the HTTP layer; the registry sits behind a
//! readers-writer lock held only for map operations, and each instance
//! serializes its own message processing.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, RwLock},
    time::SystemTime,
};

use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info};

use crate::{
    constants::{MAX_INSTANCE_AGE, MAX_INSTANCES},
    crypto,
    error::Error,
    protocol::Ceremony,
    results,
    validation::validate_init,
    wire::{
        self, CeremonyId, Init, MultipleSignedTransports, Pong, ResultData, SignedTransport,
        Transport, TransportType,
    },
};

/// A live ceremony owned by the switch.
///
/// The initiator key is pinned at admission and immutable for the
/// instance's life: no message signed by any other key is ever accepted.
pub struct Instance {
    created_at: SystemTime,
    initiator_public_key: RsaPublicKey,
    ceremony: tokio::sync::Mutex<Ceremony>,
}

impl Instance {
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }
}

#[derive(Default)]
struct Registry {
    instances: HashMap<CeremonyId, Arc<Instance>>,
    init_times: HashMap<CeremonyId, SystemTime>,
}

/// Process-wide ceremony multiplexer.
pub struct Switch {
    private_key: Arc<RsaPrivateKey>,
    public_key_bytes: Vec<u8>,
    operator_id: u64,
    version: Vec<u8>,
    registry: RwLock<Registry>,
}

impl Switch {
    pub fn new(private_key: RsaPrivateKey, operator_id: u64, version: Vec<u8>) -> Result<Self, Error> {
        let public_key_bytes = crypto::encode_rsa_public_key(&RsaPublicKey::from(&private_key))?;
        Ok(Self {
            private_key: Arc::new(private_key),
            public_key_bytes,
            operator_id,
            version,
            registry: RwLock::new(Registry::default()),
        })
    }

    pub fn operator_id(&self) -> u64 {
        self.operator_id
    }

    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key_bytes
    }

    /// Admit a new ceremony and return the encoded `exchange` reply.
    ///
    /// An identifier may be reused once its previous instance has aged out;
    /// the stale instance is deleted after the initiator signature check and
    /// before the replacement is constructed, so a failing construction
    /// leaves neither.
    pub fn init_instance(
        &self,
        identifier: CeremonyId,
        message: &Transport,
        signer: &[u8],
        signature: &[u8],
    ) -> Result<Vec<u8>, Error> {
        if message.version != self.version {
            return Err(Error::VersionMismatch {
                remote: String::from_utf8_lossy(&message.version).into_owned(),
                local: String::from_utf8_lossy(&self.version).into_owned(),
            });
        }

        let init: Init = wire::decode_exact(&message.data)?;
        validate_init(&init)?;

        let initiator_public_key = crypto::parse_rsa_public_key(signer)?;
        let encoded = wire::encode_to_vec(message);
        if !crypto::verify_rsa(&initiator_public_key, &encoded, signature) {
            return Err(Error::BadInitiatorSignature);
        }

        let now = SystemTime::now();
        {
            let mut registry = self.registry.write().expect("registry lock poisoned");
            if registry.instances.len() >= MAX_INSTANCES {
                let cleaned = Self::sweep(&mut registry, now);
                debug!(cleaned, "swept instances under admission pressure");
                if registry.instances.len() >= MAX_INSTANCES {
                    return Err(Error::MaxInstances);
                }
            }
            if let Some(started) = registry.init_times.get(&identifier).copied() {
                let age = now.duration_since(started).unwrap_or_default();
                if age <= MAX_INSTANCE_AGE {
                    return Err(Error::AlreadyExists);
                }
                registry.instances.remove(&identifier);
                registry.init_times.remove(&identifier);
                debug!(instance = %identifier, "deleted expired instance for reused identifier");
            }
        }

        let (ceremony, outbound) = Ceremony::new(
            &mut rand::thread_rng(),
            identifier,
            self.operator_id,
            self.private_key.clone(),
            self.public_key_bytes.clone(),
            self.version.clone(),
            init,
        )?;
        let instance = Arc::new(Instance {
            created_at: now,
            initiator_public_key,
            ceremony: tokio::sync::Mutex::new(ceremony),
        });

        {
            let mut registry = self.registry.write().expect("registry lock poisoned");
            registry.instances.insert(identifier, instance);
            registry.init_times.insert(identifier, now);
        }
        info!(instance = %identifier, "ceremony instance started");
        Ok(outbound)
    }

    /// Route a batched protocol message to its instance and return the
    /// instance's next outbound envelope.
    pub async fn process_message(&self, raw: &[u8]) -> Result<Vec<u8>, Error> {
        let batch: MultipleSignedTransports = wire::decode_exact(raw)?;

        let instance = self.lookup(&batch.identifier)?;

        // The outer signature covers the inner envelopes re-serialized and
        // concatenated in order.
        let mut concatenated = Vec::new();
        for message in &batch.messages {
            concatenated.extend_from_slice(&wire::encode_to_vec(message));
        }
        if !crypto::verify_rsa(
            &instance.initiator_public_key,
            &concatenated,
            &batch.signature,
        ) {
            return Err(Error::BadInitiatorSignature);
        }

        let mut ceremony = instance.ceremony.lock().await;
        let mut outbound = None;
        for message in &batch.messages {
            let phase = ceremony.phase_name();
            match ceremony.process(message) {
                Ok(Some(reply)) => outbound = Some(reply),
                Ok(None) => {}
                Err(err) => {
                    return Err(Error::ProcessingFailed {
                        phase,
                        reason: err.to_string(),
                    });
                }
            }
        }
        // A batch of already-processed messages (an initiator retry after a
        // lost response) is answered with the cached outbound envelope.
        outbound
            .or_else(|| ceremony.last_outbound().map(|cached| cached.to_vec()))
            .ok_or_else(|| Error::ProcessingFailed {
                phase: ceremony.phase_name(),
                reason: "batch did not complete a protocol phase".into(),
            })
    }

    /// Authenticate a result submission against the still-live instance it
    /// belongs to and confirm our membership in its operator list.
    pub fn verify_incoming(&self, signed: &SignedTransport) -> Result<ResultData, Error> {
        if signed.message.kind != TransportType::Result {
            return Err(Error::UnexpectedMessageType {
                got: signed.message.kind,
                phase: "result",
            });
        }
        let data: ResultData = wire::decode_exact(&signed.message.data)?;

        let instance = self.lookup(&data.identifier)?;
        let encoded = wire::encode_to_vec(&signed.message);
        if !crypto::verify_rsa(&instance.initiator_public_key, &encoded, &signed.signature) {
            return Err(Error::BadInitiatorSignature);
        }

        let entry = data
            .operators
            .iter()
            .find(|operator| operator.public_key == self.public_key_bytes)
            .ok_or(Error::UnknownOperator)?;
        if entry.id != self.operator_id {
            return Err(Error::WrongOperatorID);
        }
        Ok(data)
    }

    /// Verify and persist a concluded ceremony's artifacts.
    pub fn save_result(&self, signed: &SignedTransport, output_path: &Path) -> Result<(), Error> {
        let data = self.verify_incoming(signed)?;
        let artifacts = results::Artifacts::parse(&data)?;

        let credentials = const_hex::decode(&artifacts.deposit_data.withdrawal_credentials)
            .map_err(|err| Error::InvalidArtifact(format!("withdrawal credentials: {err}")))?;
        crypto::parse_withdrawal_credentials(&credentials)?;

        results::write_results(output_path, &data.identifier, &artifacts)?;
        Ok(())
    }

    /// Signed liveness reply carrying this operator's identity.
    pub fn pong(&self) -> Vec<u8> {
        let pong = Pong {
            operator_id: self.operator_id,
            public_key: self.public_key_bytes.clone(),
        };
        crypto::seal_transport(
            &self.private_key,
            &self.public_key_bytes,
            TransportType::Pong,
            CeremonyId::NONE,
            wire::encode_to_vec(&pong),
            &self.version,
        )
    }

    /// Delete every instance older than [`MAX_INSTANCE_AGE`], returning the
    /// number removed.
    pub fn clean_instances(&self) -> usize {
        let mut registry = self.registry.write().expect("registry lock poisoned");
        Self::sweep(&mut registry, SystemTime::now())
    }

    /// Number of live instances.
    pub fn instance_count(&self) -> usize {
        self.registry
            .read()
            .expect("registry lock poisoned")
            .instances
            .len()
    }

    fn lookup(&self, identifier: &CeremonyId) -> Result<Arc<Instance>, Error> {
        self.registry
            .read()
            .expect("registry lock poisoned")
            .instances
            .get(identifier)
            .cloned()
            .ok_or(Error::MissingInstance)
    }

    fn sweep(registry: &mut Registry, now: SystemTime) -> usize {
        let expired: Vec<CeremonyId> = registry
            .init_times
            .iter()
            .filter(|(_, started)| {
                now.duration_since(**started)
                    .map_or(false, |age| age > MAX_INSTANCE_AGE)
            })
            .map(|(identifier, _)| *identifier)
            .collect();
        for identifier in &expired {
            registry.instances.remove(identifier);
            registry.init_times.remove(identifier);
        }
        expired.len()
    }

    #[cfg(test)]
    fn backdate(&self, identifier: &CeremonyId, by: std::time::Duration) {
        let mut registry = self.registry.write().expect("registry lock poisoned");
        if let Some(started) = registry.init_times.get_mut(identifier) {
            *started = *started - by;
        }
    }
}
