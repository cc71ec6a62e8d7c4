use std::net::SocketAddr;
use std::sync::Arc;

use crate::mount::{self, MountRegistry};
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp;
use crate::server::ServerConfig;
use crate::session::transport::{ClientTransportRequest, DeliveryMode, NegotiatedTransport, TransportMode, UNSPECIFIED_CHANNEL};
use crate::session::{ClientSession, SessionManager, SessionState, StreamSlot};

/// Handles RTSP method requests for a single TCP connection.
///
/// Tracks which sessions were created on this connection so they
/// can be cleaned up when the connection drops.
pub struct MethodHandler {
    session_manager: SessionManager,
    mounts: MountRegistry,
    client_addr: SocketAddr,
    config: Arc<ServerConfig>,
    /// Session IDs created during this connection, for cleanup on disconnect.
    session_ids: Vec<String>,
}

impl MethodHandler {
    pub fn new(
        session_manager: SessionManager,
        client_addr: SocketAddr,
        mounts: MountRegistry,
        config: Arc<ServerConfig>,
    ) -> Self {
        MethodHandler {
            session_manager,
            mounts,
            client_addr,
            config,
            session_ids: Vec::new(),
        }
    }

    /// Returns session IDs owned by this connection (for cleanup on disconnect).
    pub fn session_ids(&self) -> &[String] {
        &self.session_ids
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0");

        match request.method.as_str() {
            "OPTIONS" => self.handle_options(cseq),
            "DESCRIBE" => self.handle_describe(cseq, &request.uri),
            "SETUP" => self.handle_setup(cseq, request),
            "PLAY" => self.handle_play(cseq, request),
            "PAUSE" => self.handle_pause(cseq, request),
            "TEARDOWN" => self.handle_teardown(cseq, request),
            "GET_PARAMETER" => self.handle_get_parameter(cseq, request),
            "SET_PARAMETER" => self.handle_set_parameter(cseq, request),
            _ => {
                tracing::warn!(method = %request.method, %cseq, "unsupported RTSP method");
                RtspResponse::new(501, "Not Implemented").add_header("CSeq", cseq)
            }
        }
    }

    fn handle_options(&self, cseq: &str) -> RtspResponse {
        tracing::debug!(%cseq, "OPTIONS");
        RtspResponse::ok().add_header("CSeq", cseq).add_header(
            "Public",
            "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER, SET_PARAMETER",
        )
    }

    /// Parses host from an RTSP URI (e.g. rtsp://host:8554/path -> host). Falls back to client IP if invalid.
    fn host_from_uri_or_client(&self, uri: &str) -> String {
        if let Some(host) = &self.config.public_host {
            return host.clone();
        }

        if let Some(after_scheme) = uri
            .strip_prefix("rtsp://")
            .or_else(|| uri.strip_prefix("rtsps://"))
        {
            let host = after_scheme
                .split('/')
                .next()
                .and_then(|host_port| host_port.split(':').next())
                .unwrap_or("")
                .trim();
            if !host.is_empty() {
                return host.to_string();
            }
        }
        self.client_addr.ip().to_string()
    }

    fn handle_describe(&self, cseq: &str, uri: &str) -> RtspResponse {
        tracing::debug!(%cseq, uri, "DESCRIBE");

        let mount = match self.mounts.resolve_from_uri(uri) {
            Some(m) => m,
            None => {
                tracing::warn!(uri, "DESCRIBE for unknown mount");
                return RtspResponse::not_found().add_header("CSeq", cseq);
            }
        };

        let host = self.host_from_uri_or_client(uri);
        let sdp = sdp::generate_sdp(
            &mount,
            &host,
            &self.config.sdp_session_id,
            &self.config.sdp_session_version,
            &self.config.sdp_username,
            &self.config.sdp_session_name,
        );

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", uri)
            .with_body(sdp)
    }

    /// SETUP (RFC 2326 §10.4). Resolves the target mount and, within it,
    /// the target track, allocates per-session stream slots on first use,
    /// negotiates the `Transport` header, and binds it to that track's slot.
    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let (mount_path, track_suffix) = mount::split_mount_and_track(&request.uri);
        let resolved_mount = self
            .mounts
            .get(mount_path)
            .or_else(|| self.mounts.resolve_from_uri(&request.uri));
        let existing_session = self
            .extract_session_id(request)
            .and_then(|id| self.session_manager.get_session(&id));

        let mount = match (&resolved_mount, &existing_session) {
            (None, None) => {
                tracing::warn!(uri = %request.uri, "SETUP for unknown mount");
                return RtspResponse::not_found().add_header("CSeq", cseq);
            }
            (None, Some(_)) => {
                tracing::warn!(uri = %request.uri, "SETUP named no mount but session already has one bound");
                return RtspResponse::bad_request().add_header("CSeq", cseq);
            }
            (Some(m), Some(s)) if !Arc::ptr_eq(m, s.mount()) => {
                tracing::warn!(uri = %request.uri, "SETUP named a different mount than the session is bound to");
                return RtspResponse::bad_request().add_header("CSeq", cseq);
            }
            (Some(m), _) => m.clone(),
        };

        let session = match existing_session {
            Some(s) => s,
            None => {
                let s = self.session_manager.create_session(mount.clone());
                self.session_ids.push(s.id().to_string());
                s
            }
        };
        session.note_liveness();
        session.ensure_slots();

        let slot = if !track_suffix.is_empty() {
            match session.find_slot(track_suffix) {
                Some(slot) => slot,
                None => {
                    tracing::warn!(track_suffix, "SETUP named an unknown track");
                    return RtspResponse::not_found().add_header("CSeq", cseq);
                }
            }
        } else {
            match session.sole_slot() {
                Some(slot) => slot,
                None => {
                    tracing::warn!(session_id = session.id(), "SETUP on a multi-track mount must name a track");
                    return RtspResponse::bad_request().add_header("CSeq", cseq);
                }
            }
        };

        let transport_header = match request.get_header("Transport") {
            Some(t) => t,
            None => {
                tracing::warn!(%cseq, "SETUP missing Transport header");
                return RtspResponse::bad_request().add_header("CSeq", cseq);
            }
        };

        let client_req = match ClientTransportRequest::parse(transport_header) {
            Some(t) => t,
            None => {
                tracing::warn!(%cseq, transport_header, "SETUP invalid Transport header");
                return RtspResponse::bad_request().add_header("CSeq", cseq);
            }
        };

        // Multicast + TCP-interleaved is the one combination the spec
        // reserves 461 for (RFC 2326 §11.3.6): delivering RTP on the
        // signaling connection to a multicast group makes no sense.
        if client_req.delivery == DeliveryMode::Multicast && client_req.mode == TransportMode::RtpTcp {
            tracing::warn!(%cseq, "SETUP requested multicast + TCP interleaving");
            return RtspResponse::new(461, "Unsupported Transport").add_header("CSeq", cseq);
        }

        let (rtp_channel, rtcp_channel) = if client_req.mode == TransportMode::RtpTcp {
            match (client_req.rtp_channel, client_req.rtcp_channel) {
                (Some(rtp), Some(rtcp)) if rtp != UNSPECIFIED_CHANNEL => (Some(rtp), Some(rtcp)),
                _ => {
                    let (rtp, rtcp) = session.next_tcp_channel_pair();
                    (Some(rtp), Some(rtcp))
                }
            }
        } else {
            (None, None)
        };

        let (server_rtp_port, server_rtcp_port) = match self.session_manager.allocate_server_ports() {
            Ok(ports) => ports,
            Err(e) => {
                tracing::error!(error = %e, "failed to allocate server ports");
                return RtspResponse::new(500, "Internal Server Error").add_header("CSeq", cseq);
            }
        };

        // Range or x-playNow on SETUP asks the server to start delivering
        // immediately once play begins, without waiting for a later PLAY
        // with its own Range (RFC 2326 §12.29 note, spec §4.3 SETUP step 6).
        if request.get_header("Range").is_some() || request.get_header("x-playNow").is_some() {
            session.set_play_immediately(true);
        }

        let client_addr = SocketAddr::new(self.client_addr.ip(), client_req.client_rtp_port.unwrap_or(0));
        let host = self.host_from_uri_or_client(&request.uri);
        let destination = self.client_addr.ip().to_string();

        let negotiated = NegotiatedTransport {
            mode: client_req.mode,
            delivery: client_req.delivery,
            client_addr,
            client_rtp_port: client_req.client_rtp_port,
            client_rtcp_port: client_req.client_rtcp_port,
            server_rtp_port: Some(server_rtp_port),
            server_rtcp_port: Some(server_rtcp_port),
            rtp_channel,
            rtcp_channel,
            destination,
            source: host,
            ttl: client_req.ttl.or(if client_req.delivery == DeliveryMode::Multicast { Some(255) } else { None }),
            raw_spec: client_req.raw_spec.clone(),
        };

        slot.set_transport(negotiated.clone());

        tracing::info!(
            session_id = session.id(),
            mount = %mount.path(),
            track = slot.track().track_id(),
            transport = %negotiated.format_header(),
            "track bound via SETUP"
        );

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Transport", &negotiated.format_header())
            .add_header("Session", session.id())
    }

    /// PLAY (RFC 2326 §10.5). Resolves the request as aggregate (whole
    /// session) or per-track control, applies Scale/Range, and starts
    /// delivery on the resolved slot(s).
    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let session = match self.resolve_session(request, cseq) {
            Ok(s) => s,
            Err(resp) => return resp,
        };
        session.note_liveness();

        let target = match self.resolve_target(&session, &request.uri) {
            Ok(t) => t,
            Err(resp) => return resp.add_header("CSeq", cseq),
        };

        let requested_scale = request.get_header("Scale").and_then(|s| s.trim().parse::<f32>().ok());
        let scale = requested_scale.map(|requested| match &target {
            Some(slot) => slot.track().test_scale_factor(requested),
            None => session.mount().test_scale_factor(requested),
        });

        let (range_response, seek) = compute_range_response(request.get_header("Range"), scale.unwrap_or(1.0));

        let slots: Vec<Arc<StreamSlot>> = match &target {
            Some(slot) => vec![slot.clone()],
            None => session.slots(),
        };

        if slots.is_empty() {
            tracing::warn!(session_id = session.id(), "PLAY on a session with no bound tracks");
            return RtspResponse::bad_request().add_header("CSeq", cseq);
        }

        for slot in &slots {
            if let Some(scale) = scale {
                slot.set_scale(scale);
                slot.track().set_stream_scale(slot.token(), scale);
            }
            if let Some((start, end)) = seek {
                slot.track().seek_stream(slot.token(), start, end);
            }
        }

        session.set_state(SessionState::Playing);
        tracing::info!(session_id = session.id(), tracks = slots.len(), "session started playing");

        let mut resp = RtspResponse::ok().add_header("CSeq", cseq).add_header("Session", session.id());
        if let Some(scale) = scale {
            resp = resp.add_header("Scale", &format!("{scale}"));
        }
        if let Some(range) = &range_response {
            resp = resp.add_header("Range", range);
        }

        // RTP-Info urls are always `<session base>/<trackid>`, never the
        // possibly track-suffixed request URI a per-track PLAY arrived on
        // (that suffix is already consumed by `resolve_target` above).
        let mount_path = session.mount().path();
        let base_uri = match request.uri.find(mount_path) {
            Some(idx) => &request.uri[..idx + mount_path.len()],
            None => request.uri.trim_end_matches('/'),
        };
        let rtp_info = slots
            .iter()
            .map(|slot| {
                let (seq, rtptime) = slot.track().start_stream(slot.token());
                format!("url={}/{};seq={};rtptime={}", base_uri, slot.track().track_id(), seq, rtptime)
            })
            .collect::<Vec<_>>()
            .join(",");
        resp.add_header("RTP-Info", &rtp_info)
    }

    fn handle_pause(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let session = match self.resolve_session(request, cseq) {
            Ok(s) => s,
            Err(resp) => return resp,
        };
        session.note_liveness();

        let target = match self.resolve_target(&session, &request.uri) {
            Ok(t) => t,
            Err(resp) => return resp.add_header("CSeq", cseq),
        };

        let slots: Vec<Arc<StreamSlot>> = match &target {
            Some(slot) => vec![slot.clone()],
            None => session.slots(),
        };
        for slot in &slots {
            slot.track().pause_stream(slot.token());
        }

        session.set_state(SessionState::Paused);
        tracing::info!(session_id = session.id(), "session paused");

        RtspResponse::ok().add_header("CSeq", cseq).add_header("Session", session.id())
    }

    fn handle_teardown(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let session = match self.resolve_session(request, cseq) {
            Ok(s) => s,
            Err(resp) => return resp,
        };

        let target = match self.resolve_target(&session, &request.uri) {
            Ok(t) => t,
            Err(resp) => return resp.add_header("CSeq", cseq),
        };

        match target {
            // Per-track TEARDOWN tears down just that track's stream; the
            // session and its other tracks survive.
            Some(slot) => {
                slot.track().delete_stream(slot.token());
                tracing::info!(session_id = session.id(), track = slot.track().track_id(), "track torn down");
                RtspResponse::ok().add_header("CSeq", cseq).add_header("Session", session.id())
            }
            // Aggregate TEARDOWN destroys the whole session.
            None => {
                for slot in session.slots() {
                    slot.track().delete_stream(slot.token());
                }
                let session_id = session.id().to_string();
                self.session_manager.remove_session(&session_id);
                self.session_ids.retain(|id| id != &session_id);
                tracing::info!(session_id, "session terminated via TEARDOWN");
                RtspResponse::ok().add_header("CSeq", cseq)
            }
        }
    }

    /// GET_PARAMETER is used by clients (e.g. VLC) as a keepalive (RFC 2326 §10.8).
    fn handle_get_parameter(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        tracing::trace!(%cseq, "GET_PARAMETER keepalive");

        match self.resolve_session(request, cseq) {
            Ok(session) => {
                session.note_liveness();
                RtspResponse::ok().add_header("CSeq", cseq).add_header("Session", session.id())
            }
            // No Session header at all is a valid bodiless capability probe;
            // an unresolvable Session header is a real error (454).
            Err(resp) => {
                if request.get_header("Session").is_none() {
                    RtspResponse::ok().add_header("CSeq", cseq)
                } else {
                    resp
                }
            }
        }
    }

    /// SET_PARAMETER (RFC 2326 §10.9). Like GET_PARAMETER, this server
    /// has no negotiable parameters of its own — the method exists as a
    /// second keepalive channel some clients use instead.
    fn handle_set_parameter(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        match self.resolve_session(request, cseq) {
            Ok(session) => {
                session.note_liveness();
                RtspResponse::ok().add_header("CSeq", cseq).add_header("Session", session.id())
            }
            Err(resp) => {
                if request.get_header("Session").is_none() {
                    RtspResponse::ok().add_header("CSeq", cseq)
                } else {
                    resp
                }
            }
        }
    }

    fn resolve_session(&self, request: &RtspRequest, cseq: &str) -> Result<Arc<ClientSession>, RtspResponse> {
        let id = self
            .extract_session_id(request)
            .ok_or_else(|| RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq))?;
        self.session_manager
            .get_session(&id)
            .ok_or_else(|| RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq))
    }

    /// Resolve a request URI against a bound session as either aggregate
    /// control (`Ok(None)`) or per-track control (`Ok(Some(slot))`), per
    /// the spec §4.3 command-resolution order: a track suffix that
    /// matches one of the session's slots wins; otherwise the URI must
    /// name the session's own mount path to be treated as aggregate.
    fn resolve_target(&self, session: &Arc<ClientSession>, uri: &str) -> Result<Option<Arc<StreamSlot>>, RtspResponse> {
        let (mount_path, suffix) = mount::split_mount_and_track(uri);

        if !suffix.is_empty() {
            if let Some(slot) = session.find_slot(suffix) {
                return Ok(Some(slot));
            }
        }

        if mount_path == session.mount().path() {
            return Ok(None);
        }

        Err(RtspResponse::not_found())
    }

    /// Extract session ID from the Session header.
    /// Handles timeout suffix: "SESSIONID;timeout=60" -> "SESSIONID"
    fn extract_session_id(&self, request: &RtspRequest) -> Option<String> {
        request
            .get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
    }
}

/// Parse a `Range:` header, clamp it against scale direction (spec §4.3
/// PLAY step 2 — `npt` start/end swap when the requested play direction
/// disagrees with their order), and produce the response's `Range:`
/// value. Returns `None` for the response/seek pair when no Range header
/// was present. Live mounts have no known duration, so there is no upper
/// clamp to apply beyond non-negativity — mirrors a camera feed that is
/// always "still going".
fn compute_range_response(range_header: Option<&str>, scale: f32) -> (Option<String>, Option<(f64, f64)>) {
    let header = match range_header {
        Some(h) => h.trim(),
        None => return (None, None),
    };

    if let Some(body) = header.strip_prefix("clock=") {
        let (start, end) = match body.split_once('-') {
            Some((s, e)) => (s.to_string(), (!e.is_empty()).then(|| e.to_string())),
            None => (body.to_string(), None),
        };
        let formatted = match &end {
            Some(e) => format!("clock={start}-{e}"),
            None => format!("clock={start}-"),
        };
        return (Some(formatted), None);
    }

    if let Some(body) = header.strip_prefix("npt=") {
        // Find the range-separating `-`, not a leading sign on a negative
        // start (e.g. `-5.000-10.000` splits after `-5.000`, not at index 0).
        let separator = body
            .get(1..)
            .and_then(|rest| rest.find('-'))
            .map(|i| i + 1)
            .or_else(|| body.find('-'));
        let (start_str, end_str) = match separator {
            Some(idx) => (&body[..idx], &body[idx + 1..]),
            None => (body, ""),
        };
        let mut start: f64 = start_str.trim().parse().unwrap_or(0.0).max(0.0);
        let mut end: f64 = end_str.trim().parse().unwrap_or(0.0).max(0.0);

        if (scale > 0.0 && end > 0.0 && start > end) || (scale < 0.0 && start < end) {
            std::mem::swap(&mut start, &mut end);
        }

        let formatted = if end == 0.0 && scale >= 0.0 {
            format!("npt={start:.3}-")
        } else {
            format!("npt={start:.3}-{end:.3}")
        };
        return (Some(formatted), Some((start, end)));
    }

    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_defaults_to_open_ended_live() {
        let (resp, seek) = compute_range_response(Some("npt=0.000-"), 1.0);
        assert_eq!(resp.as_deref(), Some("npt=0.000-"));
        assert_eq!(seek, Some((0.0, 0.0)));
    }

    #[test]
    fn range_swaps_start_end_on_reverse_scale() {
        let (resp, _seek) = compute_range_response(Some("npt=10.000-5.000"), -1.0);
        assert_eq!(resp.as_deref(), Some("npt=5.000-10.000"));
    }

    #[test]
    fn range_clamps_negative_to_zero() {
        let (resp, _seek) = compute_range_response(Some("npt=-5.000-"), 1.0);
        assert_eq!(resp.as_deref(), Some("npt=0.000-"));
    }

    #[test]
    fn range_clamps_negative_start_but_keeps_real_end() {
        let (resp, seek) = compute_range_response(Some("npt=-5.000-10.000"), 1.0);
        assert_eq!(resp.as_deref(), Some("npt=0.000-10.000"));
        assert_eq!(seek, Some((0.0, 10.0)));
    }

    #[test]
    fn range_clock_passthrough() {
        let (resp, seek) = compute_range_response(Some("clock=20230101T000000Z-"), 1.0);
        assert_eq!(resp.as_deref(), Some("clock=20230101T000000Z-"));
        assert!(seek.is_none());
    }

    #[test]
    fn no_range_header_produces_nothing() {
        let (resp, seek) = compute_range_response(None, 1.0);
        assert!(resp.is_none());
        assert!(seek.is_none());
    }
}
