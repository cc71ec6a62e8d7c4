//! Named stream endpoints (`/stream`, `/camera1`, ...) and their tracks.
//!
//! A [`Mount`] is the Rust analog of the external `ServerMediaSession`
//! collaborator spec'd in §4.3/§6: it owns an ordered sequence of
//! [`MediaTrack`]s (one per `m=` line this server's own DESCRIBE would
//! generate), each wrapping a codec [`Packetizer`]. The RTSP session layer
//! (`crate::session`) binds one [`StreamSlot`] per track on first SETUP and
//! drives each slot's lifecycle through the [`MediaTrack`] methods below —
//! the Rust shape of the spec's `IServerMediaSubSession` contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::media::Packetizer;

pub const DEFAULT_MOUNT_PATH: &str = "/stream";

static STREAM_TOKEN_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque handle identifying one negotiated (session, track) streaming
/// context (spec §6 GLOSSARY "Stream token"). Minted by
/// [`MediaTrack::get_stream_parameters`] and owned by exactly one
/// `StreamSlot` for the lifetime of that session (spec §5 "Shared
/// resources").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamToken(u64);

impl StreamToken {
    fn next() -> Self {
        StreamToken(STREAM_TOKEN_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

/// One track (`m=` line) of a [`Mount`] — the Rust shape of the spec's
/// `IServerMediaSubSession` upward-facing interface (§6).
///
/// Wraps a codec [`Packetizer`] (the actual RTP serialization, an external
/// collaborator per spec §1) with the track identity and stream-lifecycle
/// operations the RTSP session state machine drives.
pub struct MediaTrack {
    track_id: String,
    medium: &'static str,
    packetizer: Mutex<Box<dyn Packetizer>>,
}

impl MediaTrack {
    pub fn new(track_id: impl Into<String>, medium: &'static str, packetizer: Box<dyn Packetizer>) -> Arc<Self> {
        Arc::new(Self {
            track_id: track_id.into(),
            medium,
            packetizer: Mutex::new(packetizer),
        })
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn medium(&self) -> &str {
        self.medium
    }

    pub fn payload_type(&self) -> u8 {
        self.packetizer.lock().payload_type()
    }

    pub fn clock_rate(&self) -> u32 {
        self.packetizer.lock().clock_rate()
    }

    /// Packetize raw encoded data into RTP packets using this track's codec.
    pub fn packetize(&self, data: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>> {
        self.packetizer.lock().packetize(data, timestamp_increment)
    }

    pub fn next_sequence(&self) -> u16 {
        self.packetizer.lock().next_sequence()
    }

    pub fn next_rtp_timestamp(&self) -> u32 {
        self.packetizer.lock().next_rtp_timestamp()
    }

    /// SDP media attributes for this track, with the packetizer's own
    /// (single-track-assuming) `a=control:` line replaced by this track's
    /// real id — so a multi-track [`Mount`] gets distinct control URLs per
    /// track instead of every track claiming `track1`.
    pub fn sdp_attributes(&self) -> Vec<String> {
        let mut attrs: Vec<String> = self
            .packetizer
            .lock()
            .sdp_attributes()
            .into_iter()
            .filter(|a| !a.starts_with("a=control:"))
            .collect();
        attrs.push(format!("a=control:{}", self.track_id));
        attrs
    }

    /// `subsession.getStreamParameters(...)` (spec §6): mints the opaque
    /// token the bound `StreamSlot` will hold for the rest of the session.
    /// Server port allocation happens one level up, in
    /// `SessionManager::allocate_server_ports` — this call is the point at
    /// which the subsession itself could reject parameters it can't
    /// satisfy (none of ours do).
    pub fn get_stream_parameters(&self) -> StreamToken {
        StreamToken::next()
    }

    /// `subsession.startStream(sid, token)` (spec §4.3 PLAY step 4):
    /// returns the RTP sequence number and timestamp the first packet of
    /// this play range will carry.
    pub fn start_stream(&self, _token: StreamToken) -> (u16, u32) {
        (self.next_sequence(), self.next_rtp_timestamp())
    }

    pub fn pause_stream(&self, _token: StreamToken) {
        tracing::debug!(track = %self.track_id, "pauseStream");
    }

    pub fn delete_stream(&self, _token: StreamToken) {
        tracing::debug!(track = %self.track_id, "deleteStream");
    }

    /// `subsession.seekStream(...)`. This core's tracks are live sources
    /// with no seekable backing store (spec §1 Non-goals exclude
    /// transcoding and any recorded-media path) — the call is accepted
    /// but has nothing to do beyond logging, same as a live camera feed
    /// would report for an out-of-range seek.
    pub fn seek_stream(&self, _token: StreamToken, start: f64, end: f64) {
        tracing::debug!(track = %self.track_id, start, end, "seekStream (live source, no-op)");
    }

    /// `subsession.setStreamScale(...)`.
    pub fn set_stream_scale(&self, _token: StreamToken, scale: f32) {
        tracing::debug!(track = %self.track_id, scale, "setStreamScale");
    }

    /// `subsession.testScaleFactor(...)`: a live, non-seekable source only
    /// ever plays at its native rate, so every requested scale clamps to
    /// `1.0` (documented resolution in DESIGN.md).
    pub fn test_scale_factor(&self, requested: f32) -> f32 {
        if requested != 1.0 {
            tracing::debug!(track = %self.track_id, requested, "scale clamped to 1.0 (live source)");
        }
        1.0
    }
}

/// A named stream endpoint (e.g. `/stream`, `/camera1`), holding the
/// ordered track sequence a client's DESCRIBE/SETUP negotiate against
/// (spec §3.1 "MediaSession" analog, minus the SDP-parsing concerns that
/// live in [`crate::sdp`]).
pub struct Mount {
    path: String,
    tracks: Vec<Arc<MediaTrack>>,
}

impl Mount {
    pub fn new(path: &str, tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            path: path.to_string(),
            tracks,
        }
    }

    /// Convenience constructor for the common single-video-track mount.
    pub fn single(path: &str, packetizer: Box<dyn Packetizer>) -> Self {
        Self::new(path, vec![MediaTrack::new("track1", "video", packetizer)])
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    /// Resolve a track by case-insensitive id match (spec §4.3 SETUP step 3,
    /// §9 "handleCommandWithinSession" resolution order).
    pub fn find_track(&self, track_id: &str) -> Option<&Arc<MediaTrack>> {
        self.tracks.iter().find(|t| t.track_id().eq_ignore_ascii_case(track_id))
    }

    /// The sole track, if and only if this mount has exactly one.
    pub fn sole_track(&self) -> Option<&Arc<MediaTrack>> {
        if self.tracks.len() == 1 { self.tracks.first() } else { None }
    }

    /// The track RTP delivery defaults to when a caller (e.g. `Server`)
    /// doesn't address a specific track — the first one.
    pub fn primary_track(&self) -> Option<&Arc<MediaTrack>> {
        self.tracks.first()
    }

    /// `ServerMediaSession.testScaleFactor()` (aggregate form, spec §4.3
    /// PLAY step 1): same live-source clamp as a single track's.
    pub fn test_scale_factor(&self, requested: f32) -> f32 {
        if requested != 1.0 {
            tracing::debug!(mount = %self.path, requested, "aggregate scale clamped to 1.0 (live source)");
        }
        1.0
    }
}

/// Registry of named mount points, keyed by path.
///
/// Supports a "default" mount that acts as a fallback when the requested
/// URI path doesn't match any registered mount, so a client requesting any
/// path is served by the default stream when only one mount is configured.
#[derive(Clone)]
pub struct MountRegistry {
    mounts: Arc<RwLock<HashMap<String, Arc<Mount>>>>,
    default_path: Arc<RwLock<Option<String>>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self {
            mounts: Arc::new(RwLock::new(HashMap::new())),
            default_path: Arc::new(RwLock::new(None)),
        }
    }

    /// Register a new mount point. Replaces any existing mount at the same path.
    pub fn add(&self, path: &str, tracks: Vec<Arc<MediaTrack>>) -> Arc<Mount> {
        let mount = Arc::new(Mount::new(path, tracks));
        self.mounts.write().insert(path.to_string(), mount.clone());
        tracing::info!(path, tracks = mount.tracks().len(), "mount registered");
        mount
    }

    /// Register a single-track mount (the common case).
    pub fn add_single(&self, path: &str, packetizer: Box<dyn Packetizer>) -> Arc<Mount> {
        self.add(path, vec![MediaTrack::new("track1", "video", packetizer)])
    }

    pub fn set_default(&self, path: &str) {
        *self.default_path.write() = Some(path.to_string());
    }

    pub fn get(&self, path: &str) -> Option<Arc<Mount>> {
        self.mounts.read().get(path).cloned()
    }

    /// Resolve a mount from an RTSP URI: exact path match, else the
    /// default mount (if one was set via [`set_default`](Self::set_default)).
    pub fn resolve_from_uri(&self, uri: &str) -> Option<Arc<Mount>> {
        let path = extract_mount_path(uri);
        self.get(path).or_else(|| {
            let default = self.default_path.read();
            default.as_ref().and_then(|p| self.get(p))
        })
    }
}

impl Default for MountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the mount path from an RTSP URI.
///
/// `rtsp://host:8554/stream/track1` → `/stream`
/// `rtsp://host:8554/stream`        → `/stream`
/// `rtsp://host:8554/`              → `/`
/// `rtsp://host:8554`               → `/stream` (default)
/// `*`                               → `/stream` (default)
pub fn extract_mount_path(uri: &str) -> &str {
    let path = if let Some(after) = uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        match after.find('/') {
            Some(slash) => &after[slash..],
            None => DEFAULT_MOUNT_PATH,
        }
    } else if uri.starts_with('/') {
        uri
    } else {
        DEFAULT_MOUNT_PATH
    };

    if let Some(pos) = path.rfind("/track") {
        &path[..pos]
    } else {
        path
    }
}

/// Split a request URI into its mount path and the track-addressing
/// suffix that follows it (spec §4.3 "urlPreSuffix"/"urlSuffix"), e.g.
/// `rtsp://host/stream/track1` → (`/stream`, `track1`); `rtsp://host/stream`
/// → (`/stream`, `""`).
pub fn split_mount_and_track(uri: &str) -> (&str, &str) {
    let mount_path = extract_mount_path(uri);
    match uri.find(mount_path) {
        Some(idx) => {
            let after = &uri[idx + mount_path.len()..];
            (mount_path, after.trim_start_matches('/'))
        }
        None => (mount_path, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_path_full_uri() {
        assert_eq!(extract_mount_path("rtsp://localhost:8554/stream"), "/stream");
    }

    #[test]
    fn extract_path_with_track() {
        assert_eq!(extract_mount_path("rtsp://localhost:8554/stream/track1"), "/stream");
    }

    #[test]
    fn extract_path_no_path() {
        assert_eq!(extract_mount_path("rtsp://localhost:8554"), DEFAULT_MOUNT_PATH);
    }

    #[test]
    fn extract_path_star() {
        assert_eq!(extract_mount_path("*"), DEFAULT_MOUNT_PATH);
    }

    #[test]
    fn extract_path_bare_path() {
        assert_eq!(extract_mount_path("/camera1"), "/camera1");
    }

    #[test]
    fn split_mount_and_track_with_suffix() {
        let (mount, track) = split_mount_and_track("rtsp://localhost:8554/stream/track2");
        assert_eq!(mount, "/stream");
        assert_eq!(track, "track2");
    }

    #[test]
    fn split_mount_and_track_no_suffix() {
        let (mount, track) = split_mount_and_track("rtsp://localhost:8554/stream");
        assert_eq!(mount, "/stream");
        assert_eq!(track, "");
    }

    #[test]
    fn registry_add_and_get() {
        let registry = MountRegistry::new();
        registry.add_single("/stream", Box::new(crate::media::h264::H264Packetizer::new(96, 0x1234)));
        assert!(registry.get("/stream").is_some());
        assert!(registry.get("/other").is_none());
    }

    #[test]
    fn registry_resolve_from_uri() {
        let registry = MountRegistry::new();
        registry.add_single("/stream", Box::new(crate::media::h264::H264Packetizer::new(96, 0x1234)));
        assert!(registry.resolve_from_uri("rtsp://localhost:8554/stream").is_some());
        assert!(registry.resolve_from_uri("rtsp://localhost:8554/stream/track1").is_some());
        assert!(registry.resolve_from_uri("rtsp://localhost:8554/other").is_none());
    }

    #[test]
    fn registry_resolve_fallback_to_default() {
        let registry = MountRegistry::new();
        registry.add_single("/stream", Box::new(crate::media::h264::H264Packetizer::new(96, 0x1234)));
        registry.set_default("/stream");

        let mount = registry.resolve_from_uri("rtsp://localhost:8554/stream").unwrap();
        assert_eq!(mount.path(), "/stream");

        let mount = registry.resolve_from_uri("rtsp://localhost:8554/anything").unwrap();
        assert_eq!(mount.path(), "/stream");
    }

    #[test]
    fn multi_track_mount_has_distinct_control_paths() {
        let tracks = vec![
            MediaTrack::new("track1", "video", Box::new(crate::media::h264::H264Packetizer::new(96, 1))),
            MediaTrack::new("track2", "audio", Box::new(crate::media::h264::H264Packetizer::new(97, 2))),
        ];
        let mount = Mount::new("/cam", tracks);
        assert_eq!(mount.tracks().len(), 2);
        assert!(mount.find_track("TRACK2").is_some(), "track lookup is case-insensitive");
        assert!(mount.sole_track().is_none());
        let t2 = mount.find_track("track2").unwrap();
        assert!(t2.sdp_attributes().iter().any(|a| a == "a=control:track2"));
    }

    #[test]
    fn single_track_scale_clamps_to_one() {
        let track = MediaTrack::new("track1", "video", Box::new(crate::media::h264::H264Packetizer::new(96, 1)));
        assert_eq!(track.test_scale_factor(2.0), 1.0);
        assert_eq!(track.test_scale_factor(-1.0), 1.0);
    }
}
