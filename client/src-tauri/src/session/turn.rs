//! TURN credential provider (external interface, spec §6).
//!
//! Nothing in the teacher or the rest of the pack fetches TURN credentials
//! — the teacher's `webrtc/mod.rs::IceServerConfig` ships a STUN-only
//! default and nothing else. This trait is modeled on
//! [`crate::signaling::transport::SignalingTransport`]'s shape: a
//! request/response method plus a renewal channel the session controller
//! subscribes to once, so a real implementation (fetching short-lived
//! credentials from the application server) can be dropped in later
//! without touching [`super::VoiceCore`].

use async_trait::async_trait;
use webrtc::ice_transport::ice_server::RTCIceServer;

#[derive(Debug, Clone)]
pub struct TurnCredentials {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl TurnCredentials {
    pub fn into_ice_server(self) -> RTCIceServer {
        RTCIceServer {
            urls: self.urls,
            username: self.username,
            credential: self.credential,
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait TurnCredentialProvider: Send + Sync {
    /// Fetch (or return a cached, still-valid) set of TURN credentials.
    /// `Ok(None)` means "no TURN relay available", not an error — the
    /// session proceeds STUN-only.
    async fn fetch(&self) -> Result<Option<TurnCredentials>, String>;

    /// Takes ownership of the renewal receiver, once. A real provider
    /// pushes new credentials here ahead of the old ones expiring; the
    /// session controller reacts by updating every peer's ICE servers and
    /// restarting ICE. Returns `None` if already taken or if this provider
    /// never renews.
    async fn take_renewal_receiver(&self) -> Option<tokio::sync::mpsc::Receiver<TurnCredentials>> {
        None
    }
}

/// STUN-only default: no relay, no renewals. Used until a real provider is
/// wired to the application server's TURN credential endpoint.
pub struct NoTurnProvider;

#[async_trait]
impl TurnCredentialProvider for NoTurnProvider {
    async fn fetch(&self) -> Result<Option<TurnCredentials>, String> {
        Ok(None)
    }
}
