//! SDP session-description parsing (RFC 4566) into a [`MediaSession`] /
//! [`MediaSubSession`] tree.
//!
//! This is the inverse of [`crate::protocol::sdp::generate_sdp`]: where that
//! module builds an SDP body for a DESCRIBE response, this one consumes an
//! SDP body (e.g. one received from an upstream source, or played back from
//! a recording) and produces a typed model a client or proxy can act on.

use super::payload;
use crate::error::{ParseErrorKind, Result, RtspError};

/// A parsed SDP session description (RFC 4566 §5).
///
/// Session-level fields come from lines seen before the first `m=` line;
/// everything from the first `m=` onward belongs to a [`MediaSubSession`].
#[derive(Debug, Clone, Default)]
pub struct MediaSession {
    pub session_name: String,
    pub session_description: String,
    pub control_path: String,
    pub abs_start_time: String,
    pub abs_end_time: String,
    pub media_session_type: String,
    pub connection_endpoint_name: String,
    /// Largest `npt` start time seen across every subsession's `a=range`.
    pub max_play_start_time: f64,
    /// Largest `npt` end time seen across every subsession's `a=range`.
    pub max_play_end_time: f64,
    pub scale: f32,
    pub subsessions: Vec<MediaSubSession>,
}

impl MediaSession {
    pub fn has_subsessions(&self) -> bool {
        !self.subsessions.is_empty()
    }
}

/// One `m=` media description and the attribute lines that follow it, up to
/// (but not including) the next `m=` line or end of input (RFC 4566 §5.14).
#[derive(Debug, Clone, Default)]
pub struct MediaSubSession {
    pub medium_name: String,
    /// `"RTP"` for `RTP/AVP` media lines, `"UDP"` for raw-UDP media lines.
    pub protocol_name: String,
    pub codec_name: String,
    pub client_port_num: u16,
    pub server_port_num: u16,
    pub rtp_payload_format: u8,
    pub rtp_timestamp_frequency: u32,
    pub num_channels: u32,
    pub band_width: u32,
    pub video_width: u32,
    pub video_height: u32,
    pub video_fps: f32,
    pub control_path: String,
    pub connection_endpoint_name: String,
    abs_start_time: String,
    abs_end_time: String,
    pub play_start_time: f64,
    pub play_end_time: f64,
    pub scale: f32,
}

impl MediaSubSession {
    /// Absolute start time, falling back to the parent session's value when
    /// this subsession's own `a=range:clock=` never set one.
    pub fn abs_start_time<'a>(&'a self, parent: &'a MediaSession) -> &'a str {
        if !self.abs_start_time.is_empty() {
            &self.abs_start_time
        } else {
            &parent.abs_start_time
        }
    }

    /// Absolute end time, falling back to the parent session's value.
    pub fn abs_end_time<'a>(&'a self, parent: &'a MediaSession) -> &'a str {
        if !self.abs_end_time.is_empty() {
            &self.abs_end_time
        } else {
            &parent.abs_end_time
        }
    }
}

/// Split `input` at its first line terminator, returning the line (without
/// the terminator) and the remainder (with any run of terminator characters
/// stripped from its start). Returns an empty remainder once `input` is
/// exhausted.
fn split_line(input: &str) -> (&str, &str) {
    match input.find(['\r', '\n']) {
        Some(idx) => {
            let line = &input[..idx];
            let rest = input[idx..].trim_start_matches(['\r', '\n']);
            (line, rest)
        }
        None => (input, ""),
    }
}

fn validate_shape(line: &str) -> Result<()> {
    let bytes = line.as_bytes();
    if bytes.len() < 2 || bytes[1] != b'=' || !bytes[0].is_ascii_lowercase() {
        tracing::warn!(line, "invalid SDP line");
        return Err(RtspError::Parse {
            kind: ParseErrorKind::InvalidSdpLine,
        });
    }
    Ok(())
}

/// Parse a complete SDP session description (RFC 4566) into a
/// [`MediaSession`].
///
/// Lines before the first `m=` line populate session-level fields; an
/// unrecognized attribute is skipped rather than treated as an error. Every
/// line must still be shaped like `<lowercase-letter>=<value>` or the whole
/// parse fails. Each `m=` line starts a new [`MediaSubSession`]; its medium
/// shape is tried against five known patterns in order (RTP/AVP,
/// RTP/AVP with a `port/<number-of-ports>` suffix, UDP, udp, RAW/RAW/UDP)
/// and the first match wins.
pub fn parse(sdp: &str) -> Result<MediaSession> {
    if sdp.is_empty() {
        return Err(RtspError::Parse {
            kind: ParseErrorKind::EmptyRequest,
        });
    }

    let mut session = MediaSession {
        scale: 1.0,
        ..Default::default()
    };

    let mut rest = sdp;
    let mut current_line;
    loop {
        let (line, next) = split_line(rest);
        validate_shape(line)?;
        current_line = line;
        rest = next;

        if current_line.starts_with('m') {
            break;
        }

        parse_session_line(&mut session, current_line);

        if rest.is_empty() {
            // No m= line at all — session-level-only description.
            if session.control_path.is_empty() {
                session.control_path = "*".to_string();
            }
            return Ok(session);
        }
    }

    loop {
        let mut subsession = MediaSubSession {
            scale: 1.0,
            ..Default::default()
        };
        parse_media_line(&mut subsession, current_line)?;

        let mut found_next_media_line = false;
        while !rest.is_empty() {
            let (line, next) = split_line(rest);
            validate_shape(line)?;
            rest = next;

            if line.starts_with('m') {
                current_line = line;
                found_next_media_line = true;
                break;
            }
            parse_subsession_line(&mut subsession, &mut session, line);
        }

        if subsession.codec_name.is_empty()
            && let Some((codec, freq, channels)) =
                payload::lookup_static_payload_format(subsession.rtp_payload_format)
        {
            subsession.codec_name = codec.to_string();
            subsession.rtp_timestamp_frequency = freq;
            subsession.num_channels = channels;
        }

        if subsession.rtp_timestamp_frequency == 0 {
            subsession.rtp_timestamp_frequency =
                payload::guess_rtp_timestamp_frequency(&subsession.medium_name, &subsession.codec_name);
        }

        session.subsessions.push(subsession);

        if !found_next_media_line {
            break;
        }
    }

    if session.control_path.is_empty() {
        session.control_path = "*".to_string();
    }

    Ok(session)
}

fn parse_session_line(session: &mut MediaSession, line: &str) {
    if let Some(rest) = line.strip_prefix("s=") {
        session.session_name = rest.to_string();
    } else if let Some(rest) = line.strip_prefix("i=") {
        session.session_description = rest.to_string();
    } else if let Some(addr) = parse_connection_line(line) {
        session.connection_endpoint_name = addr;
    } else if let Some(rest) = line.strip_prefix("a=control:") {
        session.control_path = rest.to_string();
    } else if let Some((start, end)) = parse_range_attribute(line) {
        if line.contains("npt") {
            if let Some(s) = start.and_then(|s| s.parse::<f64>().ok())
                && s > session.max_play_start_time
            {
                session.max_play_start_time = s;
            }
            if let Some(e) = end.and_then(|s| s.parse::<f64>().ok())
                && e > session.max_play_end_time
            {
                session.max_play_end_time = e;
            }
        } else {
            if let Some(s) = start {
                session.abs_start_time = s;
            }
            if let Some(e) = end {
                session.abs_end_time = e;
            }
        }
    } else if let Some(rest) = line.strip_prefix("a=type:") {
        session.media_session_type = rest.trim().to_string();
    } else {
        // a=source-filter and anything else recognized-but-discarded, or
        // genuinely unknown — both are silently skipped (RFC 4566 is
        // deliberately extensible; unknown attributes aren't errors).
    }
}

fn parse_subsession_line(subsession: &mut MediaSubSession, session: &mut MediaSession, line: &str) {
    if let Some(rest) = line.strip_prefix("b=AS:") {
        if let Ok(bw) = rest.trim().parse::<u32>() {
            subsession.band_width = bw;
        }
    } else if let Some(addr) = parse_connection_line(line) {
        subsession.connection_endpoint_name = addr;
    } else if line.starts_with("a=rtpmap:") {
        parse_rtpmap(subsession, line);
    } else if let Some(rest) = line.strip_prefix("a=control:") {
        subsession.control_path = rest.to_string();
    } else if let Some((start, end)) = parse_range_attribute(line) {
        if line.contains("npt") {
            if let Some(s) = start.as_ref().and_then(|s| s.parse::<f64>().ok()) {
                if s > subsession.play_start_time {
                    subsession.play_start_time = s;
                    if s > session.max_play_start_time {
                        session.max_play_start_time = s;
                    }
                }
            }
            if let Some(e) = end.as_ref().and_then(|s| s.parse::<f64>().ok()) {
                if e > subsession.play_end_time {
                    subsession.play_end_time = e;
                    if e > session.max_play_end_time {
                        session.max_play_end_time = e;
                    }
                }
            }
        } else {
            if let Some(s) = start {
                subsession.abs_start_time = s;
            }
            if let Some(e) = end {
                subsession.abs_end_time = e;
            }
        }
    } else if line.starts_with("a=fmtp:") {
        // fmtp parameters are codec-specific (RFC 6184 for H.264); this
        // parser records the raw presence but leaves interpretation to the
        // consumer that knows the codec.
    } else if let Some(rest) = line.strip_prefix("a=x-dimensions:") {
        if let Some((w, h)) = rest.split_once(',') {
            if let (Ok(w), Ok(h)) = (w.trim().parse(), h.trim().parse()) {
                subsession.video_width = w;
                subsession.video_height = h;
            }
        }
    } else if line.starts_with("a=framerate:") || line.starts_with("a=x-framerate:") {
        let value = line.splitn(2, ':').nth(1).unwrap_or("").trim();
        if let Ok(fps) = value.parse::<f32>() {
            subsession.video_fps = fps;
        }
    }
    // a=source-filter and anything unrecognized: silently skipped.
}

fn parse_connection_line(line: &str) -> Option<String> {
    let rest = line.strip_prefix("c=IN IP4 ")?;
    let addr = rest.split('/').next().unwrap_or(rest).trim();
    if addr.is_empty() {
        None
    } else {
        Some(addr.to_string())
    }
}

/// Parse `a=range:npt=<start>-<end>` or `a=range:clock=<start>-<end>`.
///
/// Returns `(start, end)` where either side may be absent (an open-ended
/// clock range may specify only a start).
fn parse_range_attribute(line: &str) -> Option<(Option<String>, Option<String>)> {
    let rest = line.strip_prefix("a=range:")?;
    let rest = rest.trim();

    if let Some(value) = rest.strip_prefix("npt=").or_else(|| rest.strip_prefix("npt =")) {
        let value = value.trim();
        let (start, end) = value.split_once('-')?;
        return Some((
            non_empty(start.trim()),
            non_empty(end.trim()),
        ));
    }

    if let Some(value) = rest
        .strip_prefix("clock=")
        .or_else(|| rest.strip_prefix("clock ="))
    {
        let value = value.trim();
        match value.split_once('-') {
            Some((start, end)) => Some((non_empty(start.trim()), non_empty(end.trim()))),
            None => Some((non_empty(value), None)),
        }
    } else {
        None
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

fn parse_rtpmap(subsession: &mut MediaSubSession, line: &str) {
    let rest = match line.strip_prefix("a=rtpmap:") {
        Some(r) => r.trim(),
        None => return,
    };
    let mut fields = rest.splitn(2, ' ');
    let Some(pt_str) = fields.next() else { return };
    let Some(codec_and_rate) = fields.next() else {
        return;
    };
    let Ok(pt) = pt_str.parse::<u8>() else { return };

    let mut parts = codec_and_rate.splitn(2, '/');
    let Some(codec) = parts.next() else { return };
    let Some(rate_str) = parts.next() else { return };
    let Ok(rate) = rate_str.trim().parse::<u32>() else {
        return;
    };

    subsession.rtp_payload_format = pt;
    subsession.codec_name = codec.to_string();
    subsession.rtp_timestamp_frequency = rate;
    subsession.num_channels = 1;
}

/// Try the five `m=` line shapes the reference server recognizes, in order,
/// stopping at the first one that matches. No later shape may overwrite an
/// earlier successful match (spec'd behavior; the legacy five-`Sscanf`-in-
/// sequence approach this replaces would otherwise let a looser pattern
/// clobber an already-parsed field).
fn parse_media_line(subsession: &mut MediaSubSession, line: &str) -> Result<()> {
    let rest = line.strip_prefix("m=").ok_or(RtspError::Parse {
        kind: ParseErrorKind::InvalidMediaLine,
    })?;

    let mut tokens = rest.split_whitespace();
    let medium = tokens.next();
    let port_field = tokens.next();
    let proto = tokens.next();
    let fmt_field = tokens.next();

    let (Some(medium), Some(port_field), Some(proto), Some(fmt_field)) =
        (medium, port_field, proto, fmt_field)
    else {
        return Err(RtspError::Parse {
            kind: ParseErrorKind::InvalidMediaLine,
        });
    };

    let port: u16 = port_field
        .split('/')
        .next()
        .unwrap_or(port_field)
        .parse()
        .map_err(|_| RtspError::Parse {
            kind: ParseErrorKind::InvalidMediaLine,
        })?;
    let payload_format: u8 = fmt_field.parse().map_err(|_| RtspError::Parse {
        kind: ParseErrorKind::InvalidMediaLine,
    })?;
    if payload_format > 127 {
        return Err(RtspError::Parse {
            kind: ParseErrorKind::InvalidMediaLine,
        });
    }

    let protocol_name = if proto.eq_ignore_ascii_case("RTP/AVP") {
        "RTP"
    } else if proto.eq_ignore_ascii_case("UDP") || proto == "RAW/RAW/UDP" {
        "UDP"
    } else {
        return Err(RtspError::Parse {
            kind: ParseErrorKind::InvalidMediaLine,
        });
    };

    subsession.medium_name = medium.to_string();
    subsession.client_port_num = port;
    subsession.server_port_num = port;
    subsession.rtp_payload_format = payload_format;
    subsession.protocol_name = protocol_name.to_string();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "v=0\r\n\
        o=- 123456 1 IN IP4 192.168.1.1\r\n\
        s=Test Stream\r\n\
        c=IN IP4 192.168.1.1\r\n\
        t=0 0\r\n\
        a=control:*\r\n\
        a=range:npt=0-\r\n\
        m=video 0 RTP/AVP 96\r\n\
        b=AS:500\r\n\
        a=rtpmap:96 H264/90000\r\n\
        a=fmtp:96 packetization-mode=1\r\n\
        a=control:track1\r\n\
        a=x-dimensions:1920,1080\r\n\
        a=framerate:30.0\r\n";

    #[test]
    fn parses_session_and_subsession_fields() {
        let session = parse(SAMPLE).unwrap();
        assert_eq!(session.session_name, "Test Stream");
        assert_eq!(session.connection_endpoint_name, "192.168.1.1");
        assert_eq!(session.control_path, "*");
        assert_eq!(session.subsessions.len(), 1);

        let sub = &session.subsessions[0];
        assert_eq!(sub.medium_name, "video");
        assert_eq!(sub.protocol_name, "RTP");
        assert_eq!(sub.codec_name, "H264");
        assert_eq!(sub.rtp_timestamp_frequency, 90000);
        assert_eq!(sub.rtp_payload_format, 96);
        assert_eq!(sub.band_width, 500);
        assert_eq!(sub.control_path, "track1");
        assert_eq!(sub.video_width, 1920);
        assert_eq!(sub.video_height, 1080);
        assert_eq!(sub.video_fps, 30.0);
    }

    #[test]
    fn static_payload_type_fills_codec_when_rtpmap_absent() {
        let sdp = "v=0\r\ns=S\r\nt=0 0\r\nm=audio 0 RTP/AVP 0\r\n";
        let session = parse(sdp).unwrap();
        let sub = &session.subsessions[0];
        assert_eq!(sub.codec_name, "PCMU");
        assert_eq!(sub.rtp_timestamp_frequency, 8000);
    }

    #[test]
    fn dynamic_payload_without_rtpmap_guesses_frequency() {
        let sdp = "v=0\r\ns=S\r\nt=0 0\r\nm=video 0 RTP/AVP 97\r\n";
        let session = parse(sdp).unwrap();
        assert_eq!(session.subsessions[0].rtp_timestamp_frequency, 90000);
    }

    #[test]
    fn raw_udp_media_line_sets_udp_protocol() {
        let sdp = "v=0\r\ns=S\r\nt=0 0\r\nm=video 0 RAW/RAW/UDP 33\r\n";
        let session = parse(sdp).unwrap();
        assert_eq!(session.subsessions[0].protocol_name, "UDP");
        assert_eq!(session.subsessions[0].codec_name, "MP2T");
    }

    #[test]
    fn multiple_subsessions() {
        let sdp = "v=0\r\ns=S\r\nt=0 0\r\n\
            m=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\na=control:track1\r\n\
            m=audio 0 RTP/AVP 0\r\na=control:track2\r\n";
        let session = parse(sdp).unwrap();
        assert_eq!(session.subsessions.len(), 2);
        assert_eq!(session.subsessions[0].medium_name, "video");
        assert_eq!(session.subsessions[1].medium_name, "audio");
        assert_eq!(session.subsessions[1].codec_name, "PCMU");
    }

    #[test]
    fn max_play_time_climbs_from_subsession_to_session() {
        let sdp = "v=0\r\ns=S\r\nt=0 0\r\n\
            m=video 0 RTP/AVP 96\r\na=range:npt=0-12.5\r\n";
        let session = parse(sdp).unwrap();
        assert_eq!(session.max_play_end_time, 12.5);
        assert_eq!(session.subsessions[0].play_end_time, 12.5);
    }

    #[test]
    fn unrecognized_attribute_is_skipped_not_fatal() {
        let sdp = "v=0\r\ns=S\r\nt=0 0\r\na=unknown-thing:xyz\r\nm=video 0 RTP/AVP 96\r\n";
        assert!(parse(sdp).is_ok());
    }

    #[test]
    fn malformed_line_shape_aborts_parse() {
        let sdp = "v=0\r\nNOT_A_VALID_LINE\r\nm=video 0 RTP/AVP 96\r\n";
        assert!(parse(sdp).is_err());
    }

    #[test]
    fn payload_format_above_127_is_rejected() {
        let sdp = "v=0\r\ns=S\r\nt=0 0\r\nm=video 0 RTP/AVP 200\r\n";
        assert!(parse(sdp).is_err());
    }

    #[test]
    fn payload_format_at_127_boundary_is_accepted() {
        let sdp = "v=0\r\ns=S\r\nt=0 0\r\nm=video 0 RTP/AVP 127\r\n";
        let session = parse(sdp).unwrap();
        assert_eq!(session.subsessions[0].rtp_payload_format, 127);
    }

    #[test]
    fn session_only_description_without_m_line() {
        let sdp = "v=0\r\ns=No Media\r\nt=0 0\r\n";
        let session = parse(sdp).unwrap();
        assert_eq!(session.session_name, "No Media");
        assert!(!session.has_subsessions());
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(parse("").is_err());
    }

    #[test]
    fn absolute_time_delegates_to_parent() {
        let sdp = "v=0\r\ns=S\r\nt=0 0\r\na=range:clock=20260101T000000Z-20260101T010000Z\r\n\
            m=video 0 RTP/AVP 96\r\n";
        let session = parse(sdp).unwrap();
        let sub = &session.subsessions[0];
        assert_eq!(sub.abs_start_time(&session), "20260101T000000Z");
        assert_eq!(sub.abs_end_time(&session), "20260101T010000Z");
    }
}
