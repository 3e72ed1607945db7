//! Discovery session: publish own handshakes, poll for counterparts.
//!
//! A session belongs to one user collecting participants for one meeting.
//! Every proximity event becomes a published handshake; every poll queries
//! the store under each own pattern hash and matches all candidates found
//! there. Every await point races the session's cancel signal.

use std::{future::Future, sync::Arc};

use tokio::sync::watch;

use crate::{
    env::Environment,
    error::ConveneError,
    handshake::{DiscoveredIdentity, Handshake, HandshakeProtocol, PublicHandshake},
    store::{DocumentStore, FieldValue, HANDSHAKES},
    technology::ProximityEvent,
};

/// Who is announcing themselves in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Raw user id (sealed in handshakes, never published)
    pub user_id: String,
    /// Contact email (sealed)
    pub email: String,
    /// Meeting this session collects participants for
    pub meeting_id: String,
}

/// Cancels a session from anywhere.
///
/// Cancellation is sticky: once cancelled, every later operation on the
/// session returns [`ConveneError::Cancelled`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Signal cancellation.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation was signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// One user's discovery window.
pub struct DiscoverySession<E: Environment, S: DocumentStore + ?Sized> {
    protocol: Arc<HandshakeProtocol<E>>,
    store: Arc<S>,
    identity: SessionIdentity,
    handshakes: Vec<Handshake>,
    discovered: Vec<DiscoveredIdentity>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl<E: Environment, S: DocumentStore + ?Sized> DiscoverySession<E, S> {
    /// New session with nothing published.
    pub fn new(protocol: Arc<HandshakeProtocol<E>>, store: Arc<S>, identity: SessionIdentity) -> Self {
        let (tx, cancel_rx) = watch::channel(false);
        Self {
            protocol,
            store,
            identity,
            handshakes: Vec::new(),
            discovered: Vec::new(),
            cancel_tx: Arc::new(tx),
            cancel_rx,
        }
    }

    /// Handle that cancels this session.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle { tx: Arc::clone(&self.cancel_tx) }
    }

    /// Session owner.
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Handshakes published so far.
    pub fn handshakes(&self) -> &[Handshake] {
        &self.handshakes
    }

    /// Every identity discovered so far, in discovery order.
    pub fn discovered(&self) -> &[DiscoveredIdentity] {
        &self.discovered
    }

    /// Build a handshake for `event` and publish it.
    ///
    /// The store write happens only after the handshake is fully built.
    pub async fn publish(
        &mut self,
        event: &ProximityEvent,
        digest: &str,
    ) -> Result<PublicHandshake, ConveneError> {
        self.ensure_live()?;
        let handshake = self
            .guard(self.protocol.create(
                &event.secret,
                digest,
                &self.identity.user_id,
                &self.identity.meeting_id,
                &self.identity.email,
                event.technology,
            ))
            .await?;

        let public = self.protocol.publishable_view(&handshake);
        self.guard(self.store.put(HANDSHAKES, &public.id, public.to_document())).await?;

        tracing::info!(
            handshake_id = %public.id,
            technology = %event.technology,
            "handshake published"
        );
        self.handshakes.push(handshake);
        Ok(public)
    }

    /// Query the store for every own pattern hash and match all candidates.
    ///
    /// Returns identities not seen in earlier polls. Malformed candidate
    /// documents are skipped.
    pub async fn poll(&mut self) -> Result<Vec<DiscoveredIdentity>, ConveneError> {
        self.ensure_live()?;
        let mut fresh = Vec::new();

        for own in &self.handshakes {
            let pattern = FieldValue::Str(own.public().public_pattern_hash.clone());
            let docs = self.guard(self.store.query(HANDSHAKES, "argon_pattern", &pattern)).await?;

            let candidates: Vec<PublicHandshake> = docs
                .iter()
                .filter_map(|doc| match PublicHandshake::from_document(&doc.id, &doc.fields) {
                    Ok(candidate) => Some(candidate),
                    Err(err) => {
                        tracing::warn!(handshake_id = %doc.id, %err, "skipping malformed handshake");
                        None
                    },
                })
                .collect();

            let matches = self.guard(self.protocol.find_matches(own, &candidates)).await?;
            for identity in matches {
                if !self.discovered.contains(&identity) && !fresh.contains(&identity) {
                    fresh.push(identity);
                }
            }
        }

        tracing::debug!(
            handshakes = self.handshakes.len(),
            new = fresh.len(),
            total = self.discovered.len() + fresh.len(),
            "poll complete"
        );
        self.discovered.extend(fresh.iter().cloned());
        Ok(fresh)
    }

    fn ensure_live(&self) -> Result<(), ConveneError> {
        if *self.cancel_rx.borrow() {
            return Err(ConveneError::Cancelled);
        }
        Ok(())
    }

    /// Run `fut` unless the session is cancelled first.
    async fn guard<T, Err, F>(&self, fut: F) -> Result<T, ConveneError>
    where
        F: Future<Output = Result<T, Err>>,
        Err: Into<ConveneError>,
    {
        let mut rx = self.cancel_rx.clone();
        if *rx.borrow() {
            return Err(ConveneError::Cancelled);
        }

        tokio::select! {
            biased;
            () = cancelled(&mut rx) => Err(ConveneError::Cancelled),
            result = fut => result.map_err(Into::into),
        }
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
