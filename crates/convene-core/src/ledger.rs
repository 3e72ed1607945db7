//! Meeting ledger: drafts, sealing, signing and publication.
//!
//! The creator's device turns discovered identities into a draft meeting,
//! seals its payload under a key derived from a fresh meeting secret, builds
//! a signing block of pseudonyms, signs it and publishes meeting, block,
//! signature and key usage to the store.
//!
//! # Publication
//!
//! ```text
//! Signed ──put meeting──> Submitted ──put block, signature, key──> Confirmed
//!        ──read back block, check hash, put status──> Stored
//! ```
//!
//! Any store failure halts the meeting in `Error` and surfaces the
//! [`StoreError`]; retry policy is the caller's.

use convene_crypto::{CryptoError, decrypt, derive_meeting_key, encrypt, generate_chain};

use crate::{
    config::ProtocolConfig,
    env::Environment,
    error::{ConveneError, FormatError, StateError},
    handshake::DiscoveredIdentity,
    key_registry::SigningKeyRecord,
    meeting::{
        DecryptOutcome, Meeting, MeetingEncryptedPayload, MeetingSecret, MeetingStatus, PublicMeeting,
    },
    signer::Signer,
    signing::{MEETING_BLOCK_SIGNATURE, SignatureRecord, SigningBlock, pseudonymize},
    store::{DocumentStore, MEETINGS, PUBLIC_KEYS, SIGNATURES, SIGNING_BLOCKS, StoreError},
};

/// A verified signature over a meeting's signing block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBlock {
    /// The signed block
    pub block: SigningBlock,
    /// Signature record to publish
    pub signature: SignatureRecord,
    /// Key record with this signature counted
    pub key_record: SigningKeyRecord,
}

/// Creates, seals, signs and publishes meetings.
pub struct MeetingLedger<E: Environment> {
    env: E,
    config: ProtocolConfig,
}

impl<E: Environment> MeetingLedger<E> {
    /// Ledger drawing secrets, nonces and timestamps from `env`.
    pub fn new(env: E, config: ProtocolConfig) -> Self {
        Self { env, config }
    }

    /// Active configuration.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// New meeting in `ClientCreated` with a fresh secret.
    ///
    /// Participants are the creator followed by every distinct discovered
    /// user.
    pub fn create_draft(
        &self,
        creator_id: &str,
        name: &str,
        digest: &str,
        discovered: &[DiscoveredIdentity],
    ) -> Result<Meeting, ConveneError> {
        let secret = MeetingSecret::generate(&self.env);
        let chain = generate_chain(secret.as_bytes(), self.config.chain_rounds)?;

        let mut participant_ids = vec![creator_id.to_string()];
        merge_participants(&mut participant_ids, discovered);

        let payload = MeetingEncryptedPayload {
            meeting_name: name.to_string(),
            public_digest_used: digest.to_string(),
            participant_ids,
            discovered_identities: dedup_identities(discovered),
            signatures: Vec::new(),
        };

        let meeting = Meeting::draft(
            self.env.random_id(),
            creator_id.to_string(),
            self.env.wall_clock_secs(),
            chain.terminal_hex(),
            secret,
            payload,
        );

        tracing::info!(
            meeting_id = %meeting.id,
            participants = meeting.participant_count,
            "meeting draft created"
        );
        Ok(meeting)
    }

    /// Open the discovery window.
    pub fn open(&self, meeting: &mut Meeting) -> Result<(), StateError> {
        meeting.transition(MeetingStatus::ClientOpen)
    }

    /// Close the discovery window.
    pub fn close(&self, meeting: &mut Meeting) -> Result<(), StateError> {
        meeting.transition(MeetingStatus::ClientClosed)
    }

    /// Add identities discovered while the window is open.
    ///
    /// Returns the number of new participants. Any previously sealed payload
    /// is discarded since it no longer matches.
    pub fn add_discovered(
        &self,
        meeting: &mut Meeting,
        discovered: &[DiscoveredIdentity],
    ) -> Result<usize, StateError> {
        if meeting.status() != MeetingStatus::ClientOpen {
            return Err(StateError::InvalidTransition {
                from: meeting.status(),
                to: MeetingStatus::ClientOpen,
            });
        }
        let payload = meeting
            .decrypted_payload
            .as_mut()
            .ok_or_else(|| StateError::MissingPayload { meeting_id: meeting.id.clone() })?;

        let before = payload.participant_ids.len();
        merge_participants(&mut payload.participant_ids, discovered);
        for identity in discovered {
            if !payload.discovered_identities.contains(identity) {
                payload.discovered_identities.push(identity.clone());
            }
        }
        let added = payload.participant_ids.len() - before;

        meeting.participant_count = payload.participant_ids.len() as u64;
        meeting.encrypted_payload = None;
        meeting.encryption_nonce = None;

        tracing::debug!(meeting_id = %meeting.id, added, "participants added");
        Ok(added)
    }

    /// Encrypt the payload under a fresh nonce and return the publishable
    /// view.
    ///
    /// An encoding failure halts the meeting in `Error`.
    pub fn seal_for_publish(&self, meeting: &mut Meeting) -> Result<PublicMeeting, ConveneError> {
        let key = meeting
            .meeting_secret
            .as_ref()
            .map(|secret| derive_meeting_key(secret.as_bytes()))
            .ok_or_else(|| StateError::MissingSecret { meeting_id: meeting.id.clone() })?;
        let encoded = meeting
            .decrypted_payload
            .as_ref()
            .map(MeetingEncryptedPayload::encode)
            .ok_or_else(|| StateError::MissingPayload { meeting_id: meeting.id.clone() })?;

        let plaintext = match encoded {
            Ok(plaintext) => plaintext,
            Err(err) => {
                meeting.fail(format!("payload encoding failed: {err}"));
                return Err(err.into());
            },
        };

        let nonce = self.env.random_array();
        let blob = encrypt(&key, &plaintext, nonce);

        meeting.encryption_nonce = Some(nonce);
        meeting.encrypted_payload = Some(blob);
        Ok(meeting.public_view(self.config.max_protocol_version)?)
    }

    /// Try to open a meeting's payload with `candidate`.
    ///
    /// A payload that decrypts under a secret whose chain terminal is not the
    /// published `hashed_meeting_secret` is reported as corrupt.
    pub fn decrypt(&self, mut meeting: Meeting, candidate: &MeetingSecret) -> DecryptOutcome {
        let Some(blob) = meeting.encrypted_payload.as_ref() else {
            return DecryptOutcome::Corrupt { meeting, reason: "no sealed payload".to_string() };
        };

        let key = derive_meeting_key(candidate.as_bytes());
        let plaintext = match decrypt(&key, blob) {
            Ok(plaintext) => plaintext,
            Err(CryptoError::AuthenticationFailure) => {
                tracing::debug!(meeting_id = %meeting.id, "meeting secret does not open payload");
                return DecryptOutcome::WrongSecret(meeting);
            },
            Err(err) => return DecryptOutcome::Corrupt { meeting, reason: err.to_string() },
        };

        let payload = match MeetingEncryptedPayload::decode(&plaintext) {
            Ok(payload) => payload,
            Err(err) => return DecryptOutcome::Corrupt { meeting, reason: err.to_string() },
        };

        match generate_chain(candidate.as_bytes(), self.config.chain_rounds) {
            Ok(chain) if chain.terminal_hex() == meeting.hashed_meeting_secret => {},
            Ok(_) => {
                return DecryptOutcome::Corrupt {
                    meeting,
                    reason: "hashed meeting secret does not match".to_string(),
                };
            },
            Err(err) => return DecryptOutcome::Corrupt { meeting, reason: err.to_string() },
        }

        meeting.creator_id = payload.participant_ids.first().cloned();
        meeting.meeting_name.clone_from(&payload.meeting_name);
        meeting.meeting_secret = Some(candidate.clone());
        meeting.decrypted_payload = Some(payload);
        DecryptOutcome::Decrypted(meeting)
    }

    /// Block of pseudonyms sealing `meeting`, linked to `previous_block_hash`.
    ///
    /// Related meetings are the distinct meeting ids carried by discovered
    /// identities, excluding this meeting.
    pub fn build_signing_block(
        &self,
        meeting: &Meeting,
        previous_block_hash: &str,
    ) -> Result<SigningBlock, ConveneError> {
        let secret = meeting
            .meeting_secret
            .as_ref()
            .ok_or_else(|| StateError::MissingSecret { meeting_id: meeting.id.clone() })?;
        let payload = meeting
            .decrypted_payload
            .as_ref()
            .ok_or_else(|| StateError::MissingPayload { meeting_id: meeting.id.clone() })?;
        let rounds = self.config.chain_rounds;

        let participants = payload
            .participant_ids
            .iter()
            .map(|id| pseudonymize(id, secret, rounds))
            .collect::<Result<Vec<_>, _>>()?;

        let mut related_ids: Vec<&str> = Vec::new();
        for identity in &payload.discovered_identities {
            let id = identity.meeting_id.as_str();
            if id != meeting.id && !related_ids.contains(&id) {
                related_ids.push(id);
            }
        }
        let related = related_ids
            .into_iter()
            .map(|id| pseudonymize(id, secret, rounds))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SigningBlock::new(
            meeting.id.clone(),
            participants,
            related,
            meeting.hashed_meeting_secret.clone(),
            previous_block_hash,
            self.env.wall_clock_secs(),
        ))
    }

    /// Build, sign and locally verify the meeting's block.
    ///
    /// On success the meeting is `Signed` and the returned key record counts
    /// one more use. A signer failure or a signature that does not verify
    /// against `key_record` halts the meeting in `Error`; usage is then not
    /// incremented.
    pub async fn sign<G: Signer + ?Sized>(
        &self,
        meeting: &mut Meeting,
        previous_block_hash: &str,
        signer: &G,
        key_record: &SigningKeyRecord,
    ) -> Result<SignedBlock, ConveneError> {
        if !meeting.status().can_transition_to(MeetingStatus::Signed) {
            return Err(
                StateError::InvalidTransition { from: meeting.status(), to: MeetingStatus::Signed }.into()
            );
        }

        let block = self.build_signing_block(meeting, previous_block_hash)?;
        let hash = block.signable_hash();

        let signature = match signer.sign(&hash).await {
            Ok(signature) => signature,
            Err(err) => {
                meeting.fail(format!("signer failed: {err}"));
                return Err(err);
            },
        };

        if !signer.verify(&signature, &key_record.public_key_bytes, &hash) {
            meeting.fail("signature does not verify against the signing key");
            return Err(ConveneError::SignatureMismatch {
                public_key_id: key_record.public_key_id.clone(),
            });
        }

        let key_record = match key_record.record_usage() {
            Ok(record) => record,
            Err(err) => {
                meeting.fail(err.to_string());
                return Err(err.into());
            },
        };

        let signature_hex = hex::encode(&signature);
        if let Some(payload) = meeting.decrypted_payload.as_mut() {
            payload.signatures.push(signature_hex.clone());
        }
        meeting.transition(MeetingStatus::Signed)?;

        let signature = SignatureRecord {
            signature: signature_hex,
            signed_by: key_record.hashed_owner_id.clone(),
            public_key_id: key_record.public_key_id.clone(),
            generation: key_record.usage_count,
            record_type: MEETING_BLOCK_SIGNATURE.to_string(),
            created_at: self.env.wall_clock_secs(),
            signed_data_hash: hex::encode(hash),
        };

        if key_record.is_overuse_suspicious(self.config.overuse_threshold) {
            tracing::warn!(
                public_key_id = %key_record.public_key_id,
                usage_count = key_record.usage_count,
                "signing key usage above threshold"
            );
        }
        tracing::info!(meeting_id = %meeting.id, block = %signature.signed_data_hash, "meeting signed");

        Ok(SignedBlock { block, signature, key_record })
    }

    /// Write a signed meeting to the store and confirm it.
    pub async fn publish<S: DocumentStore + ?Sized>(
        &self,
        meeting: &mut Meeting,
        signed: &SignedBlock,
        store: &S,
    ) -> Result<(), ConveneError> {
        if meeting.status() != MeetingStatus::Signed {
            return Err(StateError::InvalidTransition {
                from: meeting.status(),
                to: MeetingStatus::Submitted,
            }
            .into());
        }

        let mut public = self.seal_for_publish(meeting)?;
        public.status = MeetingStatus::Submitted;
        let result = store.put(MEETINGS, &meeting.id, public.to_document()).await;
        halt_on_store_error(meeting, result)?;
        meeting.transition(MeetingStatus::Submitted)?;

        let block_id = signed.block.signable_hash_hex();
        let result = store.put(SIGNING_BLOCKS, &block_id, signed.block.to_document()).await;
        halt_on_store_error(meeting, result)?;
        let result = store.put(SIGNATURES, &block_id, signed.signature.to_document()).await;
        halt_on_store_error(meeting, result)?;
        let result = store
            .put(PUBLIC_KEYS, &signed.key_record.public_key_id, signed.key_record.to_document())
            .await;
        halt_on_store_error(meeting, result)?;
        meeting.transition(MeetingStatus::Confirmed)?;

        let result = store.get(SIGNING_BLOCKS, &block_id).await;
        let Some(doc) = halt_on_store_error(meeting, result)? else {
            let err = StoreError::NotFound { collection: SIGNING_BLOCKS.to_string(), id: block_id };
            meeting.fail(err.to_string());
            return Err(err.into());
        };
        let stored_hash = match SigningBlock::from_document(&doc) {
            Ok(block) => block.signable_hash_hex(),
            Err(err) => {
                meeting.fail(err.to_string());
                return Err(err.into());
            },
        };
        if stored_hash != block_id {
            let err = FormatError::InvalidField {
                collection: SIGNING_BLOCKS,
                field: "signable_hash",
                reason: format!("read back {stored_hash}, wrote {block_id}"),
            };
            meeting.fail(err.to_string());
            return Err(err.into());
        }

        public.status = MeetingStatus::Stored;
        let result = store.put(MEETINGS, &meeting.id, public.to_document()).await;
        halt_on_store_error(meeting, result)?;
        meeting.transition(MeetingStatus::Stored)?;

        tracing::info!(meeting_id = %meeting.id, block = %block_id, "meeting stored");
        Ok(())
    }

    /// Fetch a published meeting.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no such meeting
    /// - `UnsupportedVersion` if written by an unsupported protocol version
    pub async fn fetch<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        meeting_id: &str,
    ) -> Result<Meeting, ConveneError> {
        let doc = store.get(MEETINGS, meeting_id).await?.ok_or_else(|| StoreError::NotFound {
            collection: MEETINGS.to_string(),
            id: meeting_id.to_string(),
        })?;

        let public = PublicMeeting::from_document(meeting_id, &doc)?;
        if !self.config.supports_version(public.protocol_version) {
            return Err(FormatError::UnsupportedVersion(public.protocol_version).into());
        }
        Ok(Meeting::from_public(public))
    }
}

/// Halt `meeting` in `Error` if a store call failed.
fn halt_on_store_error<T>(meeting: &mut Meeting, result: Result<T, StoreError>) -> Result<T, ConveneError> {
    result.map_err(|err| {
        meeting.fail(format!("store failure: {err}"));
        err.into()
    })
}

fn merge_participants(participant_ids: &mut Vec<String>, discovered: &[DiscoveredIdentity]) {
    for identity in discovered {
        if !participant_ids.contains(&identity.user_id) {
            participant_ids.push(identity.user_id.clone());
        }
    }
}

fn dedup_identities(discovered: &[DiscoveredIdentity]) -> Vec<DiscoveredIdentity> {
    let mut out: Vec<DiscoveredIdentity> = Vec::with_capacity(discovered.len());
    for identity in discovered {
        if !out.contains(identity) {
            out.push(identity.clone());
        }
    }
    out
}
