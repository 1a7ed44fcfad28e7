//! Voice Session Controller (Component G).
//!
//! The single object the Tauri commands layer drives: join/leave a voice
//! channel, track the authoritative participant list, reconcile peer
//! connections against it, run the heartbeat and analyser loops, and route
//! classified remote tracks to the audio mixer or the video stream map.
//! Grounded in the teacher's `commands/voice.rs` join/leave/mute/deafen flow
//! (a single-peer, direct-await style), generalized to drive the mesh
//! registry and signaling engine built in [`crate::peer`] and
//! [`crate::signaling`] instead of one `WebRtcClient`.
//!
//! Every event that previously had to flow straight back into `VoiceCore`
//! from inside a WebRTC callback (ICE candidates, connection-state changes,
//! inbound tracks) is instead funneled through one internal [`CoreEvent`]
//! channel, consumed by a background task holding an `Arc<VoiceCore>`. This
//! avoids constructing the peer registry, the signaling engine, and the
//! controller in a cycle: every callback only needs a channel sender, which
//! exists before any of those components do.

pub mod state;
pub mod turn;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use state::{ConnectionState, VoiceMode, VoiceSessionState};
use turn::TurnCredentialProvider;

use crate::audio::analyser::VoiceActivityGate;
use crate::audio::keepalive;
use crate::audio::RemoteAudioMixer;
use crate::consts::{
    ANALYSER_TICK_INTERVAL, BUFFERED_JOIN_WINDOW, HEARTBEAT_INTERVAL, TRACK_INFO_WAIT_TIMEOUT,
};
use crate::device::{DeviceKind, DeviceResolver};
use crate::error::VoiceError;
use crate::fanout;
use crate::media::{LocalMedia, LocalTrackSource};
use crate::peer::{PeerHandlers, PeerId, PeerRegistry};
use crate::signaling::transport::{ClientEvent, SignalingEvent, SignalingTransport};
use crate::signaling::SignalingEngine;
use crate::stats::{StatsCollector, StatsSnapshot};
use crate::track_demux::{ClassifiedTrack, TrackDemultiplexer, TrackType};

/// Internal event funnel fed by every WebRTC callback closure and by the
/// signaling engine's `on_track_resolved`/`on_connection_state`/
/// `on_user_notice` slots. Consumed by [`VoiceCore::run_core_events`].
enum CoreEvent {
    IceCandidate(PeerId, String),
    IceStateChange(PeerId, RTCIceConnectionState),
    ConnectionStateChange(PeerId, RTCPeerConnectionState),
    TrackRaw(PeerId, Arc<TrackRemote>),
    TrackClassified(ClassifiedTrack),
    SessionConnectionState(ConnectionState),
    UserNotice(PeerId, String),
}

/// Pushed to the commands layer's `on_notify` callback, which re-emits it as
/// a Tauri event. This crate has no UI of its own, so rendering is entirely
/// the caller's concern; these variants only say *what changed*.
#[derive(Debug, Clone)]
pub enum CoreNotification {
    ConnectionState(ConnectionState),
    UserNotice { peer_id: PeerId, message: String },
    ParticipantsChanged,
    SpeakingChanged,
    TrackUpdated { peer_id: PeerId, kind: &'static str },
    SessionReplaced(String),
}

/// Read-only view of [`VoiceSessionState`] for commands that need to return
/// the current session to the UI in one shot.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceSessionSnapshot {
    pub connection_state: ConnectionState,
    pub current_channel_id: Option<String>,
    pub is_muted: bool,
    pub is_deafened: bool,
    pub voice_mode: VoiceMode,
    pub participants: HashMap<PeerId, String>,
    pub active_sharers: HashMap<PeerId, String>,
    pub active_cameras: HashMap<PeerId, String>,
    pub watching_user_id: Option<PeerId>,
    pub speaking: Vec<PeerId>,
    pub user_volumes: HashMap<PeerId, u32>,
}

#[derive(Default)]
struct BufferedJoinState {
    active: bool,
    buffer: HashMap<PeerId, String>,
    timer: Option<JoinHandle<()>>,
}

pub struct VoiceCore {
    pub state: RwLock<VoiceSessionState>,
    pub registry: Arc<PeerRegistry>,
    pub signaling: Arc<SignalingEngine>,
    pub local_media: Arc<LocalMedia>,
    pub mixer: Arc<RemoteAudioMixer>,
    pub device_resolver: Arc<DeviceResolver>,
    transport: Arc<dyn SignalingTransport>,
    turn: Arc<dyn TurnCredentialProvider>,
    local_user_id: PeerId,
    stats: RwLock<Option<StatsCollector>>,
    buffered_joins: Mutex<BufferedJoinState>,
    session_shutdown: Mutex<Option<watch::Sender<bool>>>,
    on_notify: Box<dyn Fn(CoreNotification) + Send + Sync>,
    va_gate: Arc<VoiceActivityGate>,
    ui_visible: AtomicBool,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<CoreEvent>>>,
}

impl VoiceCore {
    /// Build the controller and every sub-component it owns. Does not start
    /// any background task; call [`Self::start`] once, immediately after,
    /// to begin consuming the signaling transport and the internal event
    /// channel.
    pub fn new(
        transport: Arc<dyn SignalingTransport>,
        turn: Arc<dyn TurnCredentialProvider>,
        local_user_id: String,
        on_notify: Box<dyn Fn(CoreNotification) + Send + Sync>,
    ) -> Result<Arc<Self>, VoiceError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel::<CoreEvent>();

        let tx_ice = event_tx.clone();
        let tx_ice_state = event_tx.clone();
        let tx_conn_state = event_tx.clone();
        let tx_track = event_tx.clone();
        let handlers = PeerHandlers {
            on_ice_candidate: Box::new(move |peer_id, candidate_json| {
                let _ = tx_ice.send(CoreEvent::IceCandidate(peer_id, candidate_json));
            }),
            on_ice_state_change: Box::new(move |peer_id, state| {
                let _ = tx_ice_state.send(CoreEvent::IceStateChange(peer_id, state));
            }),
            on_connection_state_change: Box::new(move |peer_id, state| {
                let _ = tx_conn_state.send(CoreEvent::ConnectionStateChange(peer_id, state));
            }),
            on_track: Box::new(move |peer_id, track| {
                let _ = tx_track.send(CoreEvent::TrackRaw(peer_id, track));
            }),
        };

        let registry = Arc::new(PeerRegistry::new(handlers)?);
        let local_media = Arc::new(LocalMedia::new()?);
        let mixer = Arc::new(RemoteAudioMixer::new());
        let device_resolver = Arc::new(DeviceResolver::new());

        let tx_session_state = event_tx.clone();
        let on_connection_state = Box::new(move |cs: ConnectionState| {
            let _ = tx_session_state.send(CoreEvent::SessionConnectionState(cs));
        });
        let tx_notice = event_tx.clone();
        let on_user_notice = Box::new(move |peer_id: String, message: String| {
            let _ = tx_notice.send(CoreEvent::UserNotice(peer_id, message));
        });
        let on_track_resolved = Box::new(move |classified: ClassifiedTrack| {
            let _ = event_tx.send(CoreEvent::TrackClassified(classified));
        });

        let signaling = Arc::new(SignalingEngine::new(
            registry.clone(),
            transport.clone(),
            local_media.clone() as Arc<dyn LocalTrackSource>,
            local_user_id.clone(),
            on_connection_state,
            on_user_notice,
            on_track_resolved,
        ));

        Ok(Arc::new(Self {
            state: RwLock::new(VoiceSessionState::default()),
            registry,
            signaling,
            local_media,
            mixer,
            device_resolver,
            transport,
            turn,
            local_user_id,
            stats: RwLock::new(None),
            buffered_joins: Mutex::new(BufferedJoinState::default()),
            session_shutdown: Mutex::new(None),
            on_notify,
            va_gate: Arc::new(VoiceActivityGate::new(0.5)),
            ui_visible: AtomicBool::new(true),
            event_rx: Mutex::new(Some(event_rx)),
        }))
    }

    /// Spawn the background consumers. Must be called exactly once, right
    /// after [`Self::new`], with the `Arc` it returned.
    pub async fn start(self: &Arc<Self>) {
        if let Some(event_rx) = self.event_rx.lock().await.take() {
            let core = self.clone();
            tokio::spawn(async move { core.run_core_events(event_rx).await });
        }
        if let Some(transport_rx) = self.transport.take_event_receiver().await {
            let core = self.clone();
            tokio::spawn(async move { core.run_transport_events(transport_rx).await });
        }
    }

    async fn run_core_events(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<CoreEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle_core_event(event).await;
        }
    }

    async fn run_transport_events(self: Arc<Self>, mut rx: mpsc::Receiver<SignalingEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle_signaling_event(event).await;
        }
    }

    async fn handle_core_event(self: &Arc<Self>, event: CoreEvent) {
        match event {
            CoreEvent::IceCandidate(peer_id, candidate_json) => {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&candidate_json) {
                    let _ = self
                        .transport
                        .send(ClientEvent::SendSignal { target_user_id: peer_id, payload: value })
                        .await;
                }
            }
            CoreEvent::IceStateChange(peer_id, state) => {
                self.signaling.ice_recovery.on_ice_state_change(peer_id, state).await;
            }
            CoreEvent::ConnectionStateChange(_peer_id, _state) => {
                self.signaling.ice_recovery.recheck_connected().await;
            }
            CoreEvent::TrackRaw(peer_id, track) => {
                if let Some(track_type) = self.signaling.track_demux.on_track(&peer_id, track.clone()).await {
                    self.route_track(peer_id, track, track_type).await;
                } else {
                    self.spawn_track_inference(peer_id, track);
                }
            }
            CoreEvent::TrackClassified(classified) => {
                self.route_track(classified.peer_id, classified.track, classified.track_type).await;
            }
            CoreEvent::SessionConnectionState(cs) => {
                self.state.write().await.connection_state = cs;
                (self.on_notify)(CoreNotification::ConnectionState(cs));
            }
            CoreEvent::UserNotice(peer_id, message) => {
                (self.on_notify)(CoreNotification::UserNotice { peer_id, message });
            }
        }
    }

    async fn handle_signaling_event(self: &Arc<Self>, event: SignalingEvent) {
        match event {
            SignalingEvent::UserJoinedVoice { user_id, display_name } => {
                self.handle_user_joined(user_id, display_name).await;
            }
            SignalingEvent::UserLeftVoice { user_id } => {
                self.signaling.close_peer(&user_id).await;
                self.mixer.remove_peer(&user_id).await;
                self.mixer.remove_peer(&format!("{user_id}-screen-audio")).await;
                {
                    let mut st = self.state.write().await;
                    st.participants.remove(&user_id);
                    st.active_sharers.remove(&user_id);
                    st.active_cameras.remove(&user_id);
                    st.camera_video_streams.remove(&user_id);
                    st.screen_video_streams.remove(&user_id);
                    st.user_volumes.remove(&user_id);
                    st.speaking.remove(&user_id);
                    st.clear_watching_if_not_sharer();
                }
                (self.on_notify)(CoreNotification::ParticipantsChanged);
            }
            SignalingEvent::ReceiveSignal { from_user_id, payload } => {
                self.signaling.handle_signal(&from_user_id, payload).await;
            }
            SignalingEvent::VoiceChannelUsers { participants } => {
                self.handle_authoritative_snapshot(participants).await;
            }
            SignalingEvent::ActiveSharers { sharers } => {
                let mut st = self.state.write().await;
                st.active_sharers = sharers;
                st.clear_watching_if_not_sharer();
            }
            SignalingEvent::ScreenShareStarted { user_id, display_name } => {
                self.state.write().await.active_sharers.insert(user_id, display_name);
            }
            SignalingEvent::ScreenShareStopped { user_id } => {
                let mut st = self.state.write().await;
                st.active_sharers.remove(&user_id);
                st.screen_video_streams.remove(&user_id);
                st.clear_watching_if_not_sharer();
            }
            SignalingEvent::CameraStarted { user_id, display_name } => {
                self.state.write().await.active_cameras.insert(user_id, display_name);
            }
            SignalingEvent::CameraStopped { user_id } => {
                let mut st = self.state.write().await;
                st.active_cameras.remove(&user_id);
                st.camera_video_streams.remove(&user_id);
            }
            SignalingEvent::ActiveCameras { cameras } => {
                self.state.write().await.active_cameras = cameras;
            }
            SignalingEvent::WatchStreamRequested { viewer_id } => {
                fanout::on_watch_stream_requested(&self.registry, &self.transport, &self.local_media, &viewer_id)
                    .await;
            }
            SignalingEvent::StopWatchingRequested { viewer_id } => {
                fanout::on_stop_watching_requested(&self.registry, &self.transport, &viewer_id).await;
            }
            SignalingEvent::VoiceSessionReplaced { reason } => {
                self.teardown_local().await;
                (self.on_notify)(CoreNotification::SessionReplaced(reason));
            }
            SignalingEvent::Error { code, message } => {
                warn!(code, message, "signaling server reported an error");
                (self.on_notify)(CoreNotification::UserNotice { peer_id: String::new(), message });
            }
            SignalingEvent::TransportReconnected => {
                self.handle_transport_reconnected().await;
            }
        }
    }

    fn spawn_track_inference(self: &Arc<Self>, peer_id: PeerId, track: Arc<TrackRemote>) {
        let core = self.clone();
        let track_id = track.id();
        tokio::spawn(async move {
            tokio::time::sleep(TRACK_INFO_WAIT_TIMEOUT).await;
            let (is_active_sharer, already_has_camera_stream, is_watching, have_screen_stream) = {
                let st = core.state.read().await;
                (
                    st.active_sharers.contains_key(&peer_id),
                    st.camera_video_streams.get(&peer_id).map_or(false, |v| v.track_id.is_some()),
                    st.watching_user_id.as_deref() == Some(peer_id.as_str()),
                    st.screen_video_streams.get(&peer_id).map_or(false, |v| v.track_id.is_some()),
                )
            };

            let Some(track) = core
                .signaling
                .track_demux
                .resolve_pending(&peer_id, &track_id, is_active_sharer, already_has_camera_stream)
                .await
            else {
                return;
            };

            let track_type = if track.kind() == RTPCodecType::Audio {
                TrackType::Microphone
            } else {
                TrackDemultiplexer::infer_video_type(is_watching, have_screen_stream, is_active_sharer, already_has_camera_stream)
            };
            core.route_track(peer_id, track, track_type).await;
        });
    }

    async fn route_track(&self, peer_id: PeerId, track: Arc<TrackRemote>, track_type: TrackType) {
        match track_type {
            TrackType::Microphone => self.route_mic_audio(peer_id, track).await,
            TrackType::ScreenAudio => self.route_screen_audio(peer_id, track).await,
            TrackType::Camera => self.route_camera_video(peer_id, track).await,
            TrackType::Screen => self.route_screen_video(peer_id, track).await,
        }
    }

    async fn route_mic_audio(&self, peer_id: PeerId, track: Arc<TrackRemote>) {
        let Ok((_gain, _analyser, tx)) = self.mixer.add_peer(peer_id.clone()).await else {
            return;
        };
        if let Some(pct) = self.state.read().await.user_volumes.get(&peer_id).copied() {
            if let Some(gain) = self.mixer.gain_for(&peer_id).await {
                gain.set_target(pct as f32 / 100.0);
            }
        }
        spawn_rtp_forwarder(track, tx);
    }

    /// Screen-share audio rides its own sink, keyed distinctly from the
    /// peer's microphone sink so one never overwrites the other in the
    /// mixer's peer map.
    async fn route_screen_audio(&self, peer_id: PeerId, track: Arc<TrackRemote>) {
        let sink_id = format!("{peer_id}-screen-audio");
        let Ok((_gain, _analyser, tx)) = self.mixer.add_peer(sink_id).await else {
            return;
        };
        spawn_rtp_forwarder(track, tx);
    }

    async fn route_camera_video(&self, peer_id: PeerId, track: Arc<TrackRemote>) {
        {
            let mut st = self.state.write().await;
            st.camera_video_streams.entry(peer_id.clone()).or_default().replace(track.id());
        }
        (self.on_notify)(CoreNotification::TrackUpdated { peer_id, kind: "camera" });
    }

    async fn route_screen_video(&self, peer_id: PeerId, track: Arc<TrackRemote>) {
        {
            let mut st = self.state.write().await;
            st.screen_video_streams.entry(peer_id.clone()).or_default().replace(track.id());
        }
        (self.on_notify)(CoreNotification::TrackUpdated { peer_id, kind: "screen" });
    }

    // -- Join / leave / reconciliation -------------------------------------

    pub async fn join_voice(self: &Arc<Self>, channel_id: String) -> Result<(), VoiceError> {
        if self.state.read().await.is_in_session() {
            return Err(VoiceError::AlreadyInSession);
        }

        let mut servers = vec![RTCIceServer { urls: vec![crate::consts::stun_url()], ..Default::default() }];
        if let Ok(Some(creds)) = self.turn.fetch().await {
            servers.push(creds.into_ice_server());
        }
        self.registry.set_ice_servers(servers).await;
        self.spawn_turn_renewal_watcher();

        let input_device_id = { self.state.read().await.input_device_id.clone() };
        let host = cpal::default_host();
        let resolved_input = self
            .device_resolver
            .resolve_name(input_device_id.as_deref(), &host, DeviceKind::Input)?;
        {
            let mut audio = self.local_media.microphone.audio().lock().await;
            audio.set_input_device(resolved_input.as_deref())?;
        }
        self.local_media.microphone.acquire().await?;

        let output_device_id = { self.state.read().await.output_device_id.clone() };
        let resolved_output = self
            .device_resolver
            .resolve_name(output_device_id.as_deref(), &host, DeviceKind::Output)?;
        self.mixer.start(resolved_output.as_deref()).await?;

        let (muted, deafened) = {
            let st = self.state.read().await;
            (st.is_muted, st.is_deafened)
        };
        self.local_media.microphone.set_muted(muted).await;
        self.local_media.microphone.set_deafened(deafened).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.session_shutdown.lock().await = Some(shutdown_tx);
        keepalive::spawn(self.local_media.microphone.audio().clone(), shutdown_rx.clone());
        self.spawn_analyser_loop(shutdown_rx.clone());
        self.start_buffered_join_window();

        self.transport
            .send(ClientEvent::JoinVoiceChannel { channel_id: channel_id.clone(), muted, deafened })
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))?;

        {
            let mut st = self.state.write().await;
            st.current_channel_id = Some(channel_id);
            st.connection_state = ConnectionState::Connecting;
            st.suppress_device_reactor_once = true;
        }
        *self.stats.write().await = Some(StatsCollector::start(self.registry.clone()));
        self.spawn_heartbeat_loop(shutdown_rx);

        Ok(())
    }

    pub async fn leave_voice(&self) -> Result<(), VoiceError> {
        let channel_id = { self.state.read().await.current_channel_id.clone() };
        let Some(channel_id) = channel_id else {
            return Err(VoiceError::NotInSession);
        };
        let _ = self.transport.send(ClientEvent::LeaveVoiceChannel { channel_id }).await;
        self.teardown_local().await;
        (self.on_notify)(CoreNotification::ConnectionState(ConnectionState::Disconnected));
        Ok(())
    }

    async fn teardown_local(&self) {
        if let Some(tx) = self.session_shutdown.lock().await.take() {
            let _ = tx.send(true);
        }
        self.signaling.close_all().await;
        if let Some(stats) = self.stats.write().await.take() {
            stats.stop();
        }
        self.mixer.stop().await;
        self.local_media.microphone.release().await;
        if self.local_media.camera.is_active().await {
            let _ = self.local_media.camera.stop().await;
        }
        if self.local_media.screen.is_active().await {
            let _ = self.local_media.screen.stop().await;
        }
        {
            let mut bj = self.buffered_joins.lock().await;
            if let Some(t) = bj.timer.take() {
                t.abort();
            }
            bj.active = false;
            bj.buffer.clear();
        }
        self.state.write().await.reset_for_leave();
    }

    async fn reconcile_peers(&self, server_participants: &HashMap<PeerId, String>) {
        let existing = self.registry.peer_ids().await;
        for id in &existing {
            if !server_participants.contains_key(id) {
                self.signaling.close_peer(id).await;
            }
        }
        for id in server_participants.keys() {
            if !existing.contains(id) {
                self.signaling.create_and_offer(id).await;
            }
        }
    }

    async fn handle_authoritative_snapshot(self: &Arc<Self>, participants: HashMap<PeerId, String>) {
        let buffered = self.take_buffered_joins().await;
        let mut merged = participants;
        for (id, name) in buffered {
            merged.entry(id).or_insert(name);
        }
        merged.remove(&self.local_user_id);

        {
            let mut st = self.state.write().await;
            st.participants = merged.clone();
        }
        self.reconcile_peers(&merged).await;
        (self.on_notify)(CoreNotification::ParticipantsChanged);
    }

    async fn handle_user_joined(self: &Arc<Self>, peer_id: PeerId, display_name: String) {
        if peer_id == self.local_user_id {
            return;
        }
        {
            let mut bj = self.buffered_joins.lock().await;
            if bj.active {
                bj.buffer.insert(peer_id, display_name);
                return;
            }
        }
        self.state.write().await.participants.insert(peer_id.clone(), display_name);
        self.signaling.create_and_offer(&peer_id).await;
        (self.on_notify)(CoreNotification::ParticipantsChanged);
    }

    async fn take_buffered_joins(&self) -> HashMap<PeerId, String> {
        let mut bj = self.buffered_joins.lock().await;
        bj.active = false;
        if let Some(t) = bj.timer.take() {
            t.abort();
        }
        std::mem::take(&mut bj.buffer)
    }

    /// Opens a window during which individual `UserJoinedVoice` events are
    /// buffered instead of acted on immediately, so a join that races the
    /// authoritative snapshot does not create the same peer twice.
    fn start_buffered_join_window(self: &Arc<Self>) {
        let core = self.clone();
        tokio::spawn(async move {
            {
                let mut bj = core.buffered_joins.lock().await;
                bj.active = true;
                bj.buffer.clear();
                if let Some(t) = bj.timer.take() {
                    t.abort();
                }
            }
            let core2 = core.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(BUFFERED_JOIN_WINDOW).await;
                let buffered = core2.take_buffered_joins().await;
                for (id, name) in buffered {
                    core2.handle_user_joined(id, name).await;
                }
            });
            core.buffered_joins.lock().await.timer = Some(handle);
        });
    }

    // -- Transport reconnection / visibility -------------------------------

    pub fn set_ui_visibility(&self, visible: bool) {
        self.ui_visible.store(visible, Ordering::Relaxed);
    }

    pub async fn on_ui_became_visible(self: &Arc<Self>) {
        self.ui_visible.store(true, Ordering::Relaxed);
        let should_rejoin = {
            let mut st = self.state.write().await;
            if st.pending_visibility_rejoin {
                st.pending_visibility_rejoin = false;
                true
            } else {
                false
            }
        };
        if should_rejoin {
            self.try_rejoin().await;
        }
    }

    async fn handle_transport_reconnected(self: &Arc<Self>) {
        if !self.state.read().await.is_in_session() {
            return;
        }
        if !self.ui_visible.load(Ordering::Relaxed) {
            self.state.write().await.pending_visibility_rejoin = true;
            return;
        }
        self.try_rejoin().await;
    }

    async fn try_rejoin(self: &Arc<Self>) {
        let already_in_progress = {
            let mut st = self.state.write().await;
            if st.rejoin_in_progress {
                true
            } else {
                st.rejoin_in_progress = true;
                false
            }
        };
        if already_in_progress {
            return;
        }

        let channel_id = { self.state.read().await.current_channel_id.clone() };
        if let Some(channel_id) = channel_id {
            self.signaling.close_all().await;
            self.state.write().await.participants.clear();
            self.start_buffered_join_window();

            let (muted, deafened) = {
                let st = self.state.read().await;
                (st.is_muted, st.is_deafened)
            };
            if let Err(e) = self
                .transport
                .send(ClientEvent::JoinVoiceChannel { channel_id, muted, deafened })
                .await
            {
                warn!(error = %e, "rejoin failed");
            }
        }
        self.state.write().await.rejoin_in_progress = false;
    }

    // -- TURN credential renewal --------------------------------------------

    fn spawn_turn_renewal_watcher(self: &Arc<Self>) {
        let core = self.clone();
        tokio::spawn(async move {
            let Some(mut rx) = core.turn.take_renewal_receiver().await else {
                return;
            };
            while let Some(creds) = rx.recv().await {
                let servers = vec![
                    RTCIceServer { urls: vec![crate::consts::stun_url()], ..Default::default() },
                    creds.into_ice_server(),
                ];
                core.registry.set_ice_servers(servers).await;
                for peer_id in core.registry.peer_ids().await {
                    core.signaling.ice_recovery.restart(&peer_id).await;
                }
            }
        });
    }

    // -- Local intent: mute / deafen / mode / sensitivity / volume ---------

    pub async fn set_mute(&self, muted: bool) -> Result<(), VoiceError> {
        self.state.write().await.is_muted = muted;
        self.local_media.microphone.set_muted(muted).await;
        self.notify_voice_state().await;
        Ok(())
    }

    pub async fn set_deafen(&self, deafened: bool) -> Result<(), VoiceError> {
        {
            let mut st = self.state.write().await;
            st.is_deafened = deafened;
            if deafened {
                st.is_muted = true;
            }
        }
        self.local_media.microphone.set_deafened(deafened).await;
        if deafened {
            self.local_media.microphone.set_muted(true).await;
        }
        self.notify_voice_state().await;
        Ok(())
    }

    async fn notify_voice_state(&self) {
        if !self.state.read().await.is_in_session() {
            return;
        }
        let (muted, deafened) = {
            let st = self.state.read().await;
            (st.is_muted, st.is_deafened)
        };
        let _ = self.transport.send(ClientEvent::UpdateVoiceState { muted, deafened }).await;
    }

    pub async fn set_voice_mode(&self, mode: VoiceMode) {
        self.state.write().await.voice_mode = mode;
    }

    pub async fn set_ptt_active(&self, active: bool) {
        self.state.write().await.ptt_active = active;
    }

    pub async fn set_input_sensitivity(&self, sensitivity: f32) {
        self.state.write().await.input_sensitivity = sensitivity.clamp(0.0, 1.0);
    }

    pub async fn set_user_volume(&self, peer_id: &str, pct: u32) {
        self.state.write().await.user_volumes.insert(peer_id.to_string(), pct);
        if let Some(gain) = self.mixer.gain_for(peer_id).await {
            gain.set_target(pct as f32 / 100.0);
        }
    }

    pub async fn moderate_voice_state(&self, target_user_id: String, muted: bool, deafened: bool) -> Result<(), VoiceError> {
        self.transport
            .send(ClientEvent::ModerateVoiceState { target_user_id, muted, deafened })
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))
    }

    // -- Device selection ----------------------------------------------------

    pub async fn set_input_device(self: &Arc<Self>, device_id: Option<String>) -> Result<(), VoiceError> {
        self.state.write().await.input_device_id = device_id.clone();
        {
            let mut audio = self.local_media.microphone.audio().lock().await;
            audio.set_input_device(device_id.as_deref())?;
        }
        if self.state.read().await.is_in_session() {
            self.local_media.microphone.replace(&self.registry).await?;
            let muted = self.state.read().await.is_muted;
            self.local_media.microphone.set_muted(muted).await;
        }
        Ok(())
    }

    pub async fn set_output_device(&self, device_id: Option<String>) -> Result<(), VoiceError> {
        self.state.write().await.output_device_id = device_id.clone();
        if self.state.read().await.is_in_session() {
            self.mixer.start(device_id.as_deref()).await?;
        }
        Ok(())
    }

    pub async fn set_camera_device(&self, device_id: Option<String>) {
        self.state.write().await.camera_device_id = device_id;
    }

    // -- Camera / screen share / watch --------------------------------------

    pub async fn start_camera(&self, device_index: Option<u32>, quality: &str) -> Result<(), VoiceError> {
        self.local_media.camera.start(device_index, quality).await?;
        self.local_media.camera.publish_to_existing_peers(&self.registry, &self.transport).await;
        self.notify_camera_state(true).await;
        Ok(())
    }

    pub async fn stop_camera(&self) -> Result<(), VoiceError> {
        self.local_media.camera.unpublish_from_existing_peers(&self.registry, &self.transport).await;
        self.local_media.camera.stop().await?;
        self.notify_camera_state(false).await;
        Ok(())
    }

    async fn notify_camera_state(&self, active: bool) {
        if let Some(channel_id) = self.state.read().await.current_channel_id.clone() {
            let _ = self.transport.send(ClientEvent::NotifyCamera { channel_id, active }).await;
        }
    }

    pub async fn start_screen_share(&self, source_id: &str, quality: &str) -> Result<(), VoiceError> {
        self.local_media.screen.start(source_id, quality).await?;
        self.notify_screen_share_state(true).await;
        Ok(())
    }

    pub async fn stop_screen_share(&self) -> Result<(), VoiceError> {
        fanout::stop_sharing_with_all_viewers(&self.registry, &self.transport).await;
        self.local_media.screen.stop().await?;
        self.notify_screen_share_state(false).await;
        Ok(())
    }

    async fn notify_screen_share_state(&self, active: bool) {
        if let Some(channel_id) = self.state.read().await.current_channel_id.clone() {
            let _ = self.transport.send(ClientEvent::NotifyScreenShare { channel_id, active }).await;
        }
    }

    pub async fn watch_stream(&self, sharer_id: String) -> Result<(), VoiceError> {
        if !self.state.read().await.active_sharers.contains_key(&sharer_id) {
            return Err(VoiceError::UnknownPeer(sharer_id));
        }
        self.transport
            .send(ClientEvent::RequestWatchStream { sharer_id: sharer_id.clone() })
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))?;
        self.state.write().await.watching_user_id = Some(sharer_id);
        Ok(())
    }

    pub async fn stop_watching(&self) -> Result<(), VoiceError> {
        let sharer_id = self.state.write().await.watching_user_id.take();
        if let Some(sharer_id) = sharer_id {
            let _ = self.transport.send(ClientEvent::StopWatchingStream { sharer_id }).await;
        }
        Ok(())
    }

    // -- Heartbeat / analyser loops ------------------------------------------

    fn spawn_heartbeat_loop(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let core = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(channel_id) = core.state.read().await.current_channel_id.clone() else {
                            break;
                        };
                        let _ = core.transport.send(ClientEvent::VoiceHeartbeat).await;
                        let _ = core.transport.send(ClientEvent::GetVoiceChannelUsers { channel_id }).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn spawn_analyser_loop(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let core = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ANALYSER_TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        core.analyser_tick().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn analyser_tick(&self) {
        let (mode, ptt_active, muted, sensitivity) = {
            let st = self.state.read().await;
            (st.voice_mode, st.ptt_active, st.is_muted, st.input_sensitivity)
        };

        let mic_analyser = self.local_media.microphone.analyser().await;
        let track_enabled = match mode {
            VoiceMode::PushToTalk => {
                let enabled = ptt_active && !muted;
                mic_analyser.set_speaking(enabled);
                enabled
            }
            VoiceMode::VoiceActivity => {
                self.va_gate.set_sensitivity(sensitivity);
                let rms = mic_analyser.rms();
                self.va_gate.tick(rms, muted)
            }
        };
        self.local_media.microphone.audio().lock().await.set_track_enabled(track_enabled);

        let mut speaking_now = HashSet::new();
        if mic_analyser.is_speaking() && !muted {
            speaking_now.insert(self.local_user_id.clone());
        }
        for peer_id in self.registry.peer_ids().await {
            if self.mixer.is_speaking(&peer_id).await {
                speaking_now.insert(peer_id);
            }
        }

        let changed = {
            let mut st = self.state.write().await;
            let changed = st.speaking != speaking_now;
            st.speaking = speaking_now;
            changed
        };
        if changed {
            (self.on_notify)(CoreNotification::SpeakingChanged);
        }
    }

    // -- Read-only access for commands ---------------------------------------

    pub async fn stats(&self) -> Option<StatsSnapshot> {
        self.stats.read().await.as_ref().map(|s| s.snapshot())
    }

    pub async fn snapshot(&self) -> VoiceSessionSnapshot {
        let st = self.state.read().await;
        VoiceSessionSnapshot {
            connection_state: st.connection_state,
            current_channel_id: st.current_channel_id.clone(),
            is_muted: st.is_muted,
            is_deafened: st.is_deafened,
            voice_mode: st.voice_mode,
            participants: st.participants.clone(),
            active_sharers: st.active_sharers.clone(),
            active_cameras: st.active_cameras.clone(),
            watching_user_id: st.watching_user_id.clone(),
            speaking: st.speaking.iter().cloned().collect(),
            user_volumes: st.user_volumes.clone(),
        }
    }
}

fn spawn_rtp_forwarder(track: Arc<TrackRemote>, tx: mpsc::Sender<Vec<u8>>) {
    tokio::spawn(async move {
        loop {
            match track.read_rtp().await {
                Ok((packet, _attrs)) => {
                    if tx.send(packet.payload.to_vec()).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        debug!(track = %track.id(), "remote track rtp read loop ended");
    });
}
