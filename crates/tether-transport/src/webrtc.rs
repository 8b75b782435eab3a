//! WebRTC DataChannel transport.
//!
//! Carries tether datagrams between peers behind NATs:
//! - DataChannel configured with `ordered: false, maxRetransmits: 0`
//! - NAT traversal via STUN, with TURN relays as fallback
//! - Signaling (SDP offer/answer and ICE candidates) through an external
//!   [`SignalingChannel`]
//!
//! The peer connection's callbacks run on the WebRTC runtime. They never touch
//! session state; every message and state change is pushed into the
//! registry's [`TaskSender`] and handled on the next tick.

use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tether_core::transport::MAX_DATAGRAM_SIZE;
use tether_core::{DatagramSink, LinkState, TaskSender};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// DataChannel label.
const TETHER_DATACHANNEL_LABEL: &str = "tether";

/// Default STUN servers for NAT traversal
const DEFAULT_STUN_SERVERS: &[&str] = &["stun:stun.l.google.com:19302"];

/// Default time allowed for the DataChannel to open once connected.
const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Signaling message for out-of-band SDP exchange
#[derive(Debug, Clone)]
pub enum SignalingMessage {
    /// SDP offer from initiator
    Offer(RTCSessionDescription),
    /// SDP answer from responder
    Answer(RTCSessionDescription),
    /// ICE candidate for NAT traversal
    IceCandidate(RTCIceCandidateInit),
}

/// WebRTC endpoint configuration
#[derive(Debug, Clone)]
pub struct WebRtcConfig {
    /// STUN servers for NAT traversal
    pub stun_servers: Vec<String>,
    /// TURN servers for relay fallback (optional)
    pub turn_servers: Vec<RTCIceServer>,
    /// Time allowed for the DataChannel to open after the peer connection is up
    pub open_timeout: Duration,
    /// Gather loopback host candidates (same-machine peers)
    pub include_loopback: bool,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            turn_servers: Vec::new(),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            include_loopback: false,
        }
    }
}

/// Map a peer connection state onto the link state the registry understands.
///
/// `Disconnected` is transient (ICE may recover the pair) and maps to
/// `Connecting`; only `Failed` and `Closed` take the link down.
pub fn link_state(state: RTCPeerConnectionState) -> LinkState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => LinkState::Gathering,
        RTCPeerConnectionState::Connecting | RTCPeerConnectionState::Disconnected => {
            LinkState::Connecting
        }
        RTCPeerConnectionState::Connected => LinkState::Connected,
        RTCPeerConnectionState::Closed => LinkState::Disconnected,
        RTCPeerConnectionState::Failed => LinkState::Failed,
    }
}

/// WebRTC transport endpoint (peer connection factory).
pub struct WebRtcEndpoint {
    config: WebRtcConfig,
    api: webrtc::api::API,
}

impl WebRtcEndpoint {
    /// Create a new WebRTC endpoint with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(WebRtcConfig::default())
    }

    /// Create a new WebRTC endpoint with custom configuration.
    pub fn with_config(config: WebRtcConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        let mut registry = Registry::new();

        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            Error::ConnectionFailed(format!("Failed to register interceptors: {}", e))
        })?;

        let mut setting_engine = SettingEngine::default();
        setting_engine.set_include_loopback_candidate(config.include_loopback);

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        Ok(Self { config, api })
    }

    /// Create a peer connection whose local ICE candidates are forwarded to
    /// the returned receiver.
    async fn create_peer_connection(
        &self,
    ) -> Result<(Arc<RTCPeerConnection>, mpsc::Receiver<SignalingMessage>)> {
        let (signaling_tx, signaling_rx) = mpsc::channel(16);

        let mut ice_servers = self
            .config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect::<Vec<_>>();
        ice_servers.extend(self.config.turn_servers.clone());

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection =
            Arc::new(self.api.new_peer_connection(config).await.map_err(|e| {
                Error::ConnectionFailed(format!("Failed to create peer connection: {}", e))
            })?);

        peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let tx = signaling_tx.clone();
            Box::pin(async move {
                match candidate.map(|c| c.to_json()) {
                    Some(Ok(init)) => {
                        debug!(candidate = %init.candidate, "local ICE candidate gathered");
                        let _ = tx.send(SignalingMessage::IceCandidate(init)).await;
                    }
                    Some(Err(e)) => warn!(error = %e, "cannot serialize ICE candidate"),
                    None => debug!("ICE gathering complete"),
                }
            })
        }));

        Ok((peer_connection, signaling_rx))
    }

    /// Connect to `peer` as the offering side.
    ///
    /// Creates the DataChannel, sends the SDP offer, applies the answer and
    /// waits for the channel to open. From then on, received datagrams and
    /// link state changes are pushed into `tasks` under `peer`.
    pub async fn connect(
        &self,
        peer: &str,
        signaling: impl SignalingChannel,
        tasks: TaskSender,
    ) -> Result<WebRtcLink> {
        let (peer_connection, local_signaling_rx) = self.create_peer_connection().await?;
        let mut state_rx = Self::watch_state(&peer_connection, peer, tasks.clone());

        // Initiator creates the channel
        let data_channel = peer_connection
            .create_data_channel(
                TETHER_DATACHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(false),
                    max_retransmits: Some(0),
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| Error::ConnectionFailed(format!("Failed to create DataChannel: {}", e)))?;
        Self::forward_messages(&data_channel, peer, tasks);

        let offer = peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("Failed to create offer: {}", e)))?;
        peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| {
                Error::ConnectionFailed(format!("Failed to set local description: {}", e))
            })?;

        signaling
            .send(SignalingMessage::Offer(offer))
            .await
            .map_err(|e| Error::ConnectionFailed(format!("Signaling failed: {}", e)))?;
        Self::forward_local_candidates(local_signaling_rx, signaling.clone());

        let answer = signaling
            .recv()
            .await
            .map_err(|e| Error::ConnectionFailed(format!("Failed to receive answer: {}", e)))?;
        match answer {
            SignalingMessage::Answer(answer) => peer_connection
                .set_remote_description(answer)
                .await
                .map_err(|e| {
                    Error::ConnectionFailed(format!("Failed to set remote description: {}", e))
                })?,
            _ => return Err(Error::ConnectionFailed("Expected SDP answer".into())),
        }

        // Remote candidates are only added once the remote description is set
        Self::apply_remote_candidates(Arc::clone(&peer_connection), signaling);

        Self::wait_for_connection(&mut state_rx).await?;
        Self::wait_for_datachannel_open(&data_channel, self.config.open_timeout).await?;

        info!(%peer, "WebRTC link established (offerer)");
        WebRtcLink::new(peer, peer_connection, data_channel)
    }

    /// Accept a connection from `peer` as the answering side.
    ///
    /// Applies the SDP offer, sends the answer and waits for the peer's
    /// DataChannel to open. Events are pushed into `tasks` as in
    /// [`connect`](Self::connect).
    pub async fn accept(
        &self,
        peer: &str,
        signaling: impl SignalingChannel,
        tasks: TaskSender,
    ) -> Result<WebRtcLink> {
        let (peer_connection, local_signaling_rx) = self.create_peer_connection().await?;
        let mut state_rx = Self::watch_state(&peer_connection, peer, tasks.clone());

        let (data_channel_tx, mut data_channel_rx) = mpsc::channel::<Arc<RTCDataChannel>>(1);
        let label = peer.to_owned();
        peer_connection.on_data_channel(Box::new(move |dc| {
            let tx = data_channel_tx.clone();
            Self::forward_messages(&dc, &label, tasks.clone());
            Box::pin(async move {
                let _ = tx.send(dc).await;
            })
        }));

        let offer = signaling
            .recv()
            .await
            .map_err(|e| Error::ConnectionFailed(format!("Failed to receive offer: {}", e)))?;
        match offer {
            SignalingMessage::Offer(offer) => peer_connection
                .set_remote_description(offer)
                .await
                .map_err(|e| {
                    Error::ConnectionFailed(format!("Failed to set remote description: {}", e))
                })?,
            _ => return Err(Error::ConnectionFailed("Expected SDP offer".into())),
        }

        let answer = peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("Failed to create answer: {}", e)))?;
        peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| {
                Error::ConnectionFailed(format!("Failed to set local description: {}", e))
            })?;

        signaling
            .send(SignalingMessage::Answer(answer))
            .await
            .map_err(|e| Error::ConnectionFailed(format!("Signaling failed: {}", e)))?;
        Self::forward_local_candidates(local_signaling_rx, signaling.clone());
        Self::apply_remote_candidates(Arc::clone(&peer_connection), signaling);

        let data_channel = data_channel_rx
            .recv()
            .await
            .ok_or_else(|| Error::ConnectionFailed("DataChannel not received".into()))?;

        Self::wait_for_connection(&mut state_rx).await?;
        Self::wait_for_datachannel_open(&data_channel, self.config.open_timeout).await?;

        info!(%peer, "WebRTC link established (answerer)");
        WebRtcLink::new(peer, peer_connection, data_channel)
    }

    /// Push every state change into `tasks` and into the returned receiver.
    fn watch_state(
        peer_connection: &RTCPeerConnection,
        peer: &str,
        tasks: TaskSender,
    ) -> mpsc::Receiver<RTCPeerConnectionState> {
        let (tx, rx) = mpsc::channel(8);
        let peer = peer.to_owned();

        peer_connection.on_peer_connection_state_change(Box::new(move |state| {
            debug!(%peer, %state, "peer connection state changed");
            tasks.state_changed(peer.clone(), link_state(state));
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(state).await;
            })
        }));

        rx
    }

    fn forward_messages(data_channel: &RTCDataChannel, peer: &str, tasks: TaskSender) {
        let peer = peer.to_owned();
        data_channel.on_message(Box::new(move |msg: DataChannelMessage| {
            tasks.datagram(peer.clone(), msg.data.to_vec());
            Box::pin(async {})
        }));
    }

    fn forward_local_candidates(
        mut local_signaling_rx: mpsc::Receiver<SignalingMessage>,
        signaling: impl SignalingChannel,
    ) {
        tokio::spawn(async move {
            while let Some(msg) = local_signaling_rx.recv().await {
                if let Err(e) = signaling.send(msg).await {
                    warn!(error = %e, "failed to forward local ICE candidate");
                }
            }
        });
    }

    fn apply_remote_candidates(
        peer_connection: Arc<RTCPeerConnection>,
        signaling: impl SignalingChannel,
    ) {
        tokio::spawn(async move {
            while let Ok(msg) = signaling.recv().await {
                if let SignalingMessage::IceCandidate(candidate) = msg {
                    debug!(candidate = %candidate.candidate, "remote ICE candidate");
                    if let Err(e) = peer_connection.add_ice_candidate(candidate).await {
                        warn!(error = %e, "failed to add remote ICE candidate");
                    }
                }
            }
            debug!("remote ICE candidate loop ended");
        });
    }

    async fn wait_for_connection(
        state_rx: &mut mpsc::Receiver<RTCPeerConnectionState>,
    ) -> Result<()> {
        while let Some(state) = state_rx.recv().await {
            match state {
                RTCPeerConnectionState::Connected => return Ok(()),
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                    return Err(Error::ConnectionFailed(format!("Connection {}", state)));
                }
                _ => {}
            }
        }

        Err(Error::ConnectionFailed("Connection state stream ended".into()))
    }

    async fn wait_for_datachannel_open(
        data_channel: &Arc<RTCDataChannel>,
        timeout: Duration,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(1);
        data_channel.on_open(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(()).await;
            })
        }));

        if data_channel.ready_state() == RTCDataChannelState::Open {
            return Ok(());
        }
        debug!(state = %data_channel.ready_state(), "waiting for DataChannel to open");

        tokio::select! {
            _ = rx.recv() => Ok(()),
            _ = tokio::time::sleep(timeout) => Err(Error::ConnectionFailed(format!(
                "DataChannel open timeout (stuck in state: {})",
                data_channel.ready_state()
            ))),
        }
    }
}

/// Established link to one peer.
pub struct WebRtcLink {
    peer: String,
    peer_connection: Arc<RTCPeerConnection>,
    data_channel: Arc<RTCDataChannel>,
    runtime: Handle,
}

impl WebRtcLink {
    fn new(
        peer: &str,
        peer_connection: Arc<RTCPeerConnection>,
        data_channel: Arc<RTCDataChannel>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::TransportUnavailable(format!("no tokio runtime: {}", e)))?;
        Ok(Self {
            peer: peer.to_owned(),
            peer_connection,
            data_channel,
            runtime,
        })
    }

    /// Peer identity this link was opened for.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Sink for the session registry.
    pub fn sink(&self) -> DataChannelSink {
        DataChannelSink {
            data_channel: Arc::clone(&self.data_channel),
            runtime: self.runtime.clone(),
        }
    }

    /// Close the DataChannel and the peer connection.
    pub async fn close(&self) -> Result<()> {
        self.data_channel
            .close()
            .await
            .map_err(|e| Error::ConnectionFailed(format!("DataChannel close failed: {}", e)))?;

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::ConnectionFailed(format!("PeerConnection close failed: {}", e)))?;

        Ok(())
    }
}

/// Non-blocking [`DatagramSink`] over an open DataChannel.
///
/// Each datagram is handed to the runtime and sent asynchronously; the tick
/// thread never waits on the network.
pub struct DataChannelSink {
    data_channel: Arc<RTCDataChannel>,
    runtime: Handle,
}

impl DatagramSink for DataChannelSink {
    fn send_datagram(&mut self, datagram: &[u8]) -> bool {
        if datagram.len() > MAX_DATAGRAM_SIZE {
            warn!(len = datagram.len(), "datagram exceeds transport limit");
            return false;
        }
        if self.data_channel.ready_state() != RTCDataChannelState::Open {
            return false;
        }

        let data_channel = Arc::clone(&self.data_channel);
        let data = bytes::Bytes::copy_from_slice(datagram);
        self.runtime.spawn(async move {
            if let Err(e) = data_channel.send(&data).await {
                debug!(error = %e, "DataChannel send failed");
            }
        });
        true
    }
}

/// Trait for external signaling channels (SDP/ICE exchange).
///
/// Implementers provide out-of-band signaling for WebRTC connection establishment.
/// Examples: WebSocket, HTTP, or custom signaling server.
#[async_trait::async_trait]
pub trait SignalingChannel: Send + Sync + Clone + 'static {
    /// Send a signaling message to peer
    async fn send(
        &self,
        message: SignalingMessage,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Receive a signaling message from peer
    async fn recv(
        &self,
    ) -> std::result::Result<SignalingMessage, Box<dyn std::error::Error + Send + Sync>>;
}
