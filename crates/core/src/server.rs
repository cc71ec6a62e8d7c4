use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::error::{Result, RtspError};
use crate::media::Packetizer;
use crate::media::h264::H264Packetizer;
use crate::mount::{DEFAULT_MOUNT_PATH, MediaTrack, Mount, MountRegistry};
use crate::session::{DEFAULT_SESSION_TIMEOUT_SECS, SessionManager};
use crate::transport::UdpTransport;
use crate::transport::tcp;

/// Server-level configuration used by protocol handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public host advertised in SDP `o=` and `c=` lines.
    /// When `None`, host is inferred from request URI/client address.
    pub public_host: Option<String>,
    /// Public RTSP port for future URL-based headers (e.g. RTP-Info).
    pub public_port: Option<u16>,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP origin session id field (`o=... <session-id> ...`).
    pub sdp_session_id: String,
    /// SDP origin session version field (`o=... ... <session-version> ...`).
    pub sdp_session_version: String,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,
    /// Liveness window (RFC 2326 §12.37): a session not refreshed by some
    /// request within this many seconds is reclaimed by the background
    /// reaper spawned in [`Server::start`].
    pub reclamation_test_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_host: None,
            public_port: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: "Stream".to_string(),
            reclamation_test_seconds: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }
}

/// High-level RTSP server orchestrator.
///
/// Owns the session manager, mount registry, and transport layer.
/// Delegates TCP connection handling to [`transport::tcp`] and RTP
/// delivery to [`transport::UdpTransport`].
pub struct Server {
    session_manager: SessionManager,
    mounts: MountRegistry,
    running: Arc<AtomicBool>,
    bind_addr: String,
    udp: Option<UdpTransport>,
    config: Arc<ServerConfig>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Self {
        Self::with_config(bind_addr, ServerConfig::default())
    }

    /// Create a server with custom protocol/SDP configuration. The
    /// default mount (a single H.264 video track at [`DEFAULT_MOUNT_PATH`])
    /// is registered and set as the fallback for any unrecognized path.
    pub fn with_config(bind_addr: &str, config: ServerConfig) -> Self {
        Self::with_packetizer_and_config(bind_addr, Box::new(H264Packetizer::with_random_ssrc(96)), config)
    }

    /// Create a server with a custom packetizer for the default mount.
    pub fn with_packetizer(bind_addr: &str, packetizer: Box<dyn Packetizer>) -> Self {
        Self::with_packetizer_and_config(bind_addr, packetizer, ServerConfig::default())
    }

    /// Create a server with a custom packetizer and protocol/SDP configuration.
    pub fn with_packetizer_and_config(bind_addr: &str, packetizer: Box<dyn Packetizer>, config: ServerConfig) -> Self {
        let mounts = MountRegistry::new();
        mounts.add_single(DEFAULT_MOUNT_PATH, packetizer);
        mounts.set_default(DEFAULT_MOUNT_PATH);

        Self {
            session_manager: SessionManager::with_reclamation(config.reclamation_test_seconds),
            mounts,
            running: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
            udp: None,
            config: Arc::new(config),
        }
    }

    /// Register an additional named mount point (e.g. `/camera2`) with
    /// its own track sequence.
    pub fn add_mount(&self, path: &str, tracks: Vec<Arc<MediaTrack>>) -> Arc<Mount> {
        self.mounts.add(path, tracks)
    }

    /// Register an additional single-track mount point.
    pub fn add_single_track_mount(&self, path: &str, packetizer: Box<dyn Packetizer>) -> Arc<Mount> {
        self.mounts.add_single(path, packetizer)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        self.udp = Some(UdpTransport::bind()?);

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let session_manager = self.session_manager.clone();
        let mounts = self.mounts.clone();
        let config = self.config.clone();

        tracing::info!(addr = %self.bind_addr, reclamation_test_seconds = config.reclamation_test_seconds, "RTSP server listening");

        session_manager.spawn_reaper(running.clone());

        thread::spawn(move || {
            tcp::accept_loop(listener, session_manager, mounts, config, running);
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Deliver a pre-packetized RTP payload to the given session's
    /// primary (first-bound) track, addressed per its negotiated
    /// `Transport`.
    pub fn send_rtp_packet(&self, session_id: &str, payload: &[u8]) -> Result<usize> {
        let udp = self.udp.as_ref().ok_or(RtspError::NotStarted)?;
        let session = self
            .session_manager
            .get_session(session_id)
            .ok_or_else(|| RtspError::SessionNotFound(session_id.to_string()))?;
        if !session.is_playing() {
            return Err(RtspError::SessionNotPlaying(session_id.to_string()));
        }
        let slot = session
            .primary_slot()
            .ok_or_else(|| RtspError::TransportNotConfigured(session_id.to_string()))?;
        let transport = slot
            .transport()
            .ok_or_else(|| RtspError::TransportNotConfigured(session_id.to_string()))?;
        udp.send_to(payload, transport.client_addr)
    }

    /// Deliver a pre-packetized RTP payload to every currently-playing
    /// session's primary track.
    pub fn broadcast_rtp_packet(&self, payload: &[u8]) -> Result<usize> {
        let udp = self.udp.as_ref().ok_or(RtspError::NotStarted)?;
        let mut total = 0;
        for session in self.session_manager.get_playing_sessions() {
            if let Some(transport) = session.primary_slot().and_then(|slot| slot.transport()) {
                total += udp.send_to(payload, transport.client_addr)?;
            }
        }
        Ok(total)
    }

    pub fn get_viewers(&self) -> Vec<Viewer> {
        self.session_manager
            .get_playing_sessions()
            .iter()
            .filter_map(|session| {
                session.primary_slot().and_then(|slot| slot.transport()).map(|transport| Viewer {
                    session_id: session.id().to_string(),
                    uri: session.mount().path().to_string(),
                    client_addr: transport.client_addr.to_string(),
                    client_rtp_port: transport.client_rtp_port.unwrap_or(0),
                })
            })
            .collect()
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.session_manager
    }

    pub fn mounts(&self) -> &MountRegistry {
        &self.mounts
    }

    /// Returns the server's protocol configuration.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

/// Information about a connected viewer (client in PLAY state).
#[derive(Debug, Clone)]
pub struct Viewer {
    pub session_id: String,
    pub uri: String,
    pub client_addr: String,
    pub client_rtp_port: u16,
}
