// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cluster dispatch.
//!
//! A node serves the directions its own decoder pool supports and forwards the
//! rest to a peer that does. The request priority travels in the wire message,
//! so the receiving node enqueues at the same level as the sender would have.
//! Membership and transport are capabilities supplied by the host.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TranslationError;
use crate::protocols::{LanguageDirection, Priority, Sentence, Suggestion, Translation};
use crate::service::{TranslationRequest, TranslationService};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A translation request as sent to another node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRequestMessage {
    pub id: Uuid,
    pub direction: LanguageDirection,
    pub sentence: Sentence,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<Suggestion>>,
    #[serde(default)]
    pub alternatives: usize,
    /// Time the caller is still willing to wait in the remote queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Sentence>,
}

impl TranslationRequestMessage {
    pub fn from_request(id: Uuid, request: &TranslationRequest) -> Self {
        Self {
            id,
            direction: request.direction.clone(),
            sentence: request.sentence.clone(),
            priority: request.priority,
            suggestions: request.suggestions.clone(),
            alternatives: request.alternatives,
            timeout_ms: request
                .timeout
                .map(|timeout| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
            reference: request.reference.clone(),
        }
    }

    pub fn into_request(self) -> TranslationRequest {
        TranslationRequest {
            direction: self.direction,
            sentence: self.sentence,
            priority: self.priority,
            suggestions: self.suggestions,
            alternatives: self.alternatives,
            timeout: self.timeout_ms.map(Duration::from_millis),
            reference: self.reference,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResponseMessage {
    pub id: Uuid,
    pub result: Result<Translation, TranslationError>,
}

/// Which peers can serve a direction.
pub trait ClusterMembership: Send + Sync {
    fn peers_for(&self, direction: &LanguageDirection) -> Vec<PeerId>;
}

/// Request/response delivery to a peer. Delivery failures are reported as
/// [`TranslationError::Dispatch`].
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send(
        &self,
        peer: &PeerId,
        message: TranslationRequestMessage,
    ) -> Result<TranslationResponseMessage, TranslationError>;
}

/// Routes requests to the local service or to a capable peer.
pub struct DistributedTranslator {
    local: Option<Arc<TranslationService>>,
    membership: Arc<dyn ClusterMembership>,
    transport: Arc<dyn PeerTransport>,
    next_peer: AtomicUsize,
}

impl DistributedTranslator {
    pub fn new(
        local: Option<Arc<TranslationService>>,
        membership: Arc<dyn ClusterMembership>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            local,
            membership,
            transport,
            next_peer: AtomicUsize::new(0),
        }
    }

    /// Translates locally when possible, otherwise on the next capable peer.
    pub async fn translate(
        &self,
        request: TranslationRequest,
    ) -> Result<Translation, TranslationError> {
        if let Some(local) = self.local_for(&request.direction) {
            return local.submit(request)?.await;
        }

        let peers = self.membership.peers_for(&request.direction);
        if peers.is_empty() {
            return Err(TranslationError::UnsupportedLanguage(request.direction));
        }
        let peer = &peers[self.next_peer.fetch_add(1, Ordering::Relaxed) % peers.len()];

        let message = TranslationRequestMessage::from_request(Uuid::new_v4(), &request);
        let id = message.id;
        tracing::debug!(%peer, request = %id, direction = %request.direction, priority = %request.priority, "forwarding translation");

        let response = self.transport.send(peer, message).await?;
        if response.id != id {
            return Err(TranslationError::Dispatch(format!(
                "peer {peer} answered request {} instead of {id}",
                response.id
            )));
        }
        response.result
    }

    /// Serves a request forwarded by another node, at the priority it carries.
    pub async fn handle_remote(
        &self,
        message: TranslationRequestMessage,
    ) -> TranslationResponseMessage {
        let id = message.id;
        let result = match self.local_for(&message.direction) {
            Some(local) => match local.submit(message.into_request()) {
                Ok(pending) => pending.await,
                Err(e) => Err(e),
            },
            None => Err(TranslationError::UnsupportedLanguage(message.direction)),
        };
        if let Err(e) = &result {
            tracing::debug!(request = %id, error = %e, "remote translation failed");
        }
        TranslationResponseMessage { id, result }
    }

    fn local_for(&self, direction: &LanguageDirection) -> Option<&Arc<TranslationService>> {
        self.local
            .as_ref()
            .filter(|service| service.supports(direction))
    }
}
