//! RTSP session management (RFC 2326 §3, §12.37).
//!
//! A [`ClientSession`] is the server-side state object created on a
//! client's first SETUP and destroyed by TEARDOWN, liveness timeout, or
//! TCP disconnect. Unlike a single `(transport, state)` pair, it owns one
//! [`StreamSlot`] per track of the [`Mount`](crate::mount::Mount) it is
//! bound to — the Rust shape of the spec's per-subsession `StreamState`
//! collaborator (§5/§6) — so SETUP/PLAY/PAUSE/TEARDOWN can address either
//! the whole session (aggregate control) or a single track.
//!
//! ## Session lifecycle (RFC 2326 §A.1)
//!
//! ```text
//! SETUP          -> Ready
//! PLAY           -> Playing
//! PAUSE          -> Paused   (from Playing)
//! PLAY           -> Playing  (from Paused)
//! TEARDOWN       -> (removed)
//! liveness expiry -> (removed, via SessionManager::spawn_reaper)
//! TCP disconnect  -> (removed, via cleanup)
//! ```
//!
//! ## Liveness
//!
//! Every session arms a liveness deadline on creation and *resets* — never
//! recreates — it on every subsequent request within that session
//! (`ClientSession::note_liveness`), mirroring `RTSPClientSession.noteLiveness`
//! in the reference implementation. [`SessionManager::spawn_reaper`] polls
//! for sessions past their `reclamation_test_seconds` deadline and tears
//! them down.

pub mod transport;

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::mount::{MediaTrack, Mount, StreamToken};
pub use transport::{ClientTransportRequest, DeliveryMode, NegotiatedTransport, TransportMode};

const SERVER_PORT_MIN: u64 = 5000;
const SERVER_PORT_MAX: u64 = 65534;

/// Default liveness window in seconds (RFC 2326 §12.37). A session not
/// refreshed by some request within this window is reclaimed.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// RTSP session state machine (RFC 2326 §A.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session created via SETUP, not yet playing.
    Ready,
    /// Media is being delivered.
    Playing,
    /// Delivery suspended; can resume via PLAY.
    Paused,
}

/// Per-track streaming state bound to one [`ClientSession`] (spec §5/§6
/// `StreamState`): the negotiated transport and play parameters for a
/// single [`MediaTrack`] of the session's [`Mount`].
pub struct StreamSlot {
    track: Arc<MediaTrack>,
    token: StreamToken,
    transport: RwLock<Option<NegotiatedTransport>>,
    scale: RwLock<f32>,
}

impl StreamSlot {
    fn new(track: Arc<MediaTrack>) -> Self {
        let token = track.get_stream_parameters();
        Self {
            track,
            token,
            transport: RwLock::new(None),
            scale: RwLock::new(1.0),
        }
    }

    pub fn track(&self) -> &Arc<MediaTrack> {
        &self.track
    }

    pub fn token(&self) -> StreamToken {
        self.token
    }

    pub fn set_transport(&self, transport: NegotiatedTransport) {
        *self.transport.write() = Some(transport);
    }

    pub fn transport(&self) -> Option<NegotiatedTransport> {
        self.transport.read().clone()
    }

    pub fn set_scale(&self, scale: f32) {
        *self.scale.write() = scale;
    }

    pub fn scale(&self) -> f32 {
        *self.scale.read()
    }
}

/// A single RTSP session (RFC 2326 §3): one client's binding to a
/// [`Mount`], tracking per-track transport/state via [`StreamSlot`]s.
pub struct ClientSession {
    id: String,
    mount: Arc<Mount>,
    slots: RwLock<Vec<Arc<StreamSlot>>>,
    state: RwLock<SessionState>,
    tcp_channel_counter: AtomicU8,
    last_activity: Mutex<Instant>,
    reclamation_test_seconds: u64,
    play_immediately: AtomicBool,
}

impl ClientSession {
    fn new(id: String, mount: Arc<Mount>, reclamation_test_seconds: u64) -> Self {
        ClientSession {
            id,
            mount,
            slots: RwLock::new(Vec::new()),
            state: RwLock::new(SessionState::Ready),
            tcp_channel_counter: AtomicU8::new(0),
            last_activity: Mutex::new(Instant::now()),
            reclamation_test_seconds,
            play_immediately: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mount(&self) -> &Arc<Mount> {
        &self.mount
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: SessionState) {
        tracing::debug!(session_id = %self.id, old_state = ?*self.state.read(), new_state = ?state, "state transition");
        *self.state.write() = state;
    }

    pub fn is_playing(&self) -> bool {
        self.state() == SessionState::Playing
    }

    /// Reset (not recreate) the liveness deadline — called on every
    /// request received within this session.
    pub fn note_liveness(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn is_expired(&self) -> bool {
        self.last_activity.lock().elapsed() > Duration::from_secs(self.reclamation_test_seconds)
    }

    /// Allocate one [`StreamSlot`] per track of the bound mount, on the
    /// first SETUP only — later SETUPs (additional tracks, or a repeated
    /// SETUP for the already-bound track) find slots already present.
    pub fn ensure_slots(&self) {
        let mut slots = self.slots.write();
        if slots.is_empty() {
            for track in self.mount.tracks() {
                slots.push(Arc::new(StreamSlot::new(track.clone())));
            }
        }
    }

    pub fn slots(&self) -> Vec<Arc<StreamSlot>> {
        self.slots.read().clone()
    }

    /// Resolve a slot by case-insensitive track id match (spec §4.3 SETUP
    /// step 3 / PLAY-within-session resolution).
    pub fn find_slot(&self, track_id: &str) -> Option<Arc<StreamSlot>> {
        self.slots
            .read()
            .iter()
            .find(|s| s.track().track_id().eq_ignore_ascii_case(track_id))
            .cloned()
    }

    /// The sole bound slot, if and only if this session has exactly one track.
    pub fn sole_slot(&self) -> Option<Arc<StreamSlot>> {
        let slots = self.slots.read();
        if slots.len() == 1 { Some(slots[0].clone()) } else { None }
    }

    /// The slot RTP delivery defaults to when a caller doesn't address a
    /// specific track — the first one bound.
    pub fn primary_slot(&self) -> Option<Arc<StreamSlot>> {
        self.slots.read().first().cloned()
    }

    /// Allocate the next pair of interleaved channel numbers for
    /// `RTP/AVP/TCP` SETUP requests that didn't pin their own (or sent the
    /// `interleaved=255` "allocate for me" sentinel). Monotonically
    /// increasing, even/odd paired, per session.
    pub fn next_tcp_channel_pair(&self) -> (u8, u8) {
        let rtp = self.tcp_channel_counter.fetch_add(2, Ordering::SeqCst);
        (rtp, rtp.wrapping_add(1))
    }

    pub fn set_play_immediately(&self, value: bool) {
        self.play_immediately.store(value, Ordering::SeqCst);
    }

    pub fn play_immediately(&self) -> bool {
        self.play_immediately.load(Ordering::SeqCst)
    }
}

/// Thread-safe registry of active sessions, plus server-side RTP/RTCP
/// port allocation and the liveness reaper.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<ClientSession>>>>,
    next_server_port: Arc<AtomicU64>,
    reclamation_test_seconds: u64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_reclamation(DEFAULT_SESSION_TIMEOUT_SECS)
    }

    pub fn with_reclamation(reclamation_test_seconds: u64) -> Self {
        SessionManager {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_server_port: Arc::new(AtomicU64::new(SERVER_PORT_MIN)),
            reclamation_test_seconds,
        }
    }

    /// Create a new session bound to `mount`, with an opaque 8-hex-digit
    /// id (spec §6 GLOSSARY "Session id"). Collisions (astronomically
    /// unlikely at 32 bits) are retried.
    pub fn create_session(&self, mount: Arc<Mount>) -> Arc<ClientSession> {
        loop {
            let id = format!("{:08X}", rand::random::<u32>());
            let mut sessions = self.sessions.write();
            if sessions.contains_key(&id) {
                continue;
            }
            let session = Arc::new(ClientSession::new(id.clone(), mount, self.reclamation_test_seconds));
            sessions.insert(id.clone(), session.clone());
            let total = sessions.len();
            drop(sessions);
            tracing::debug!(session_id = %id, total_sessions = total, "session created");
            return session;
        }
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove and return a session by id (used by TEARDOWN and the reaper).
    pub fn remove_session(&self, id: &str) -> Option<Arc<ClientSession>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            let total = self.sessions.read().len();
            tracing::debug!(session_id = %id, total_sessions = total, "session removed");
        }
        removed
    }

    /// Remove multiple sessions at once (used during TCP disconnect cleanup).
    pub fn remove_sessions(&self, ids: &[String]) -> usize {
        let mut sessions = self.sessions.write();
        let mut removed = 0;
        for id in ids {
            if sessions.remove(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, remaining = sessions.len(), "batch session cleanup");
        }
        removed
    }

    /// Allocate a pair of (RTP, RTCP) server ports, advertised in the
    /// SETUP response — the server neither binds nor owns this pair
    /// itself, since raw socket delivery is an external collaborator
    /// (spec §1).
    pub fn allocate_server_ports(&self) -> Result<(u16, u16)> {
        let rtp = self.next_server_port.fetch_add(2, Ordering::SeqCst);

        if rtp > SERVER_PORT_MAX {
            tracing::warn!(rtp, "port range exhausted, wrapping to {SERVER_PORT_MIN}");
            self.next_server_port.store(SERVER_PORT_MIN, Ordering::SeqCst);
            let rtp = self.next_server_port.fetch_add(2, Ordering::SeqCst);
            return Ok((rtp as u16, rtp as u16 + 1));
        }

        tracing::trace!(rtp_port = rtp, rtcp_port = rtp + 1, "allocated server ports");
        Ok((rtp as u16, rtp as u16 + 1))
    }

    /// Returns all sessions currently in the [`SessionState::Playing`] state.
    pub fn get_playing_sessions(&self) -> Vec<Arc<ClientSession>> {
        self.sessions.read().values().filter(|s| s.is_playing()).cloned().collect()
    }

    /// Remove every session past its liveness deadline, tearing down each
    /// of its stream slots first. Returns the removed sessions.
    pub fn reap_expired(&self) -> Vec<Arc<ClientSession>> {
        let expired_ids: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, s)| s.is_expired())
            .map(|(id, _)| id.clone())
            .collect();

        let mut reaped = Vec::new();
        for id in expired_ids {
            if let Some(session) = self.sessions.write().remove(&id) {
                for slot in session.slots() {
                    slot.track().delete_stream(slot.token());
                }
                tracing::info!(session_id = %id, "session reclaimed after liveness timeout");
                reaped.push(session);
            }
        }
        reaped
    }

    /// Spawn a background thread that polls for expired sessions once a
    /// second while `running` stays true.
    pub fn spawn_reaper(&self, running: Arc<AtomicBool>) {
        let manager = self.clone();
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                manager.reap_expired();
                thread::sleep(Duration::from_secs(1));
            }
        });
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::h264::H264Packetizer;
    use crate::mount::Mount;

    fn test_mount(path: &str) -> Arc<Mount> {
        Arc::new(Mount::single(path, Box::new(H264Packetizer::new(96, 0x1234))))
    }

    #[test]
    fn create_and_get_session() {
        let manager = SessionManager::new();
        let session = manager.create_session(test_mount("/stream"));
        assert_eq!(session.id().len(), 8);
        assert!(manager.get_session(session.id()).is_some());
    }

    #[test]
    fn ensure_slots_is_idempotent_and_matches_track_count() {
        let manager = SessionManager::new();
        let mount = test_mount("/stream");
        let session = manager.create_session(mount);
        session.ensure_slots();
        session.ensure_slots();
        assert_eq!(session.slots().len(), 1);
        assert!(session.sole_slot().is_some());
    }

    #[test]
    fn tcp_channel_pairs_increase_monotonically() {
        let manager = SessionManager::new();
        let session = manager.create_session(test_mount("/stream"));
        let (rtp1, rtcp1) = session.next_tcp_channel_pair();
        let (rtp2, rtcp2) = session.next_tcp_channel_pair();
        assert_eq!((rtp1, rtcp1), (0, 1));
        assert_eq!((rtp2, rtcp2), (2, 3));
    }

    #[test]
    fn liveness_expires_after_window() {
        let manager = SessionManager::with_reclamation(0);
        let session = manager.create_session(test_mount("/stream"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(session.is_expired());
        let reaped = manager.reap_expired();
        assert_eq!(reaped.len(), 1);
        assert!(manager.get_session(session.id()).is_none());
    }

    #[test]
    fn note_liveness_resets_deadline() {
        let manager = SessionManager::with_reclamation(3600);
        let session = manager.create_session(test_mount("/stream"));
        session.note_liveness();
        assert!(!session.is_expired());
    }

    #[test]
    fn port_allocation_wraps() {
        let manager = SessionManager::new();
        for _ in 0..3 {
            manager.allocate_server_ports().unwrap();
        }
        let (rtp, rtcp) = manager.allocate_server_ports().unwrap();
        assert_eq!(rtcp, rtp + 1);
    }
}
