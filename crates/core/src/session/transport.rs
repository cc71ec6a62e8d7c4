//! RTSP `Transport` header parsing and negotiation (RFC 2326 §12.39).
//!
//! Three transport modes are recognized: `RTP/AVP` (and its explicit
//! `RTP/AVP/UDP` spelling), `RTP/AVP/TCP` (interleaved binary data on the
//! RTSP connection itself), and `RAW/RAW/UDP` (or bare `UDP`/`udp`) raw
//! payload delivery with no RTP framing. Each can be requested unicast or
//! multicast, except TCP interleaving, which only makes sense unicast —
//! a multicast + TCP request is rejected with 461 (RFC 2326 §11.3.6).

use std::net::SocketAddr;

/// Sentinel a client sends in `interleaved=255` (or omits the parameter
/// entirely) to ask the server to allocate channel numbers on its behalf.
pub const UNSPECIFIED_CHANNEL: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// `RTP/AVP` or `RTP/AVP/UDP`: RTP packets over a UDP pair.
    RtpUdp,
    /// `RTP/AVP/TCP`: RTP packets interleaved on the RTSP TCP connection.
    RtpTcp,
    /// `RAW/RAW/UDP`, bare `UDP`/`udp`: raw payload, no RTP framing.
    RawUdp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Unicast,
    Multicast,
}

/// One parsed transport specification from a client's `Transport` header.
///
/// A header may list several comma-separated specs in descending
/// preference; [`ClientTransportRequest::parse`] returns the first one
/// this server can make sense of, mirroring how `RTSPClientSession`
/// walks the list looking for a recognized scheme.
#[derive(Debug, Clone)]
pub struct ClientTransportRequest {
    pub mode: TransportMode,
    pub delivery: DeliveryMode,
    /// Original scheme token, e.g. `"RAW/RAW/UDP"` — echoed back verbatim
    /// in the response for [`TransportMode::RawUdp`], since that family
    /// has more than one valid spelling.
    pub raw_spec: String,
    pub client_rtp_port: Option<u16>,
    pub client_rtcp_port: Option<u16>,
    pub rtp_channel: Option<u8>,
    pub rtcp_channel: Option<u8>,
    pub ttl: Option<u8>,
}

impl ClientTransportRequest {
    pub fn parse(header: &str) -> Option<Self> {
        header.split(',').find_map(|spec| Self::parse_one(spec.trim()))
    }

    fn parse_one(spec: &str) -> Option<Self> {
        let mut parts = spec.split(';');
        let scheme = parts.next()?.trim();
        if scheme.is_empty() {
            return None;
        }

        let mode = if scheme.eq_ignore_ascii_case("RTP/AVP/TCP") {
            TransportMode::RtpTcp
        } else if scheme.eq_ignore_ascii_case("RTP/AVP") || scheme.eq_ignore_ascii_case("RTP/AVP/UDP") {
            TransportMode::RtpUdp
        } else {
            TransportMode::RawUdp
        };

        let mut delivery = DeliveryMode::Unicast;
        let mut client_rtp_port = None;
        let mut client_rtcp_port = None;
        let mut rtp_channel = None;
        let mut rtcp_channel = None;
        let mut ttl = None;

        for param in parts {
            let param = param.trim();
            if param.eq_ignore_ascii_case("unicast") {
                delivery = DeliveryMode::Unicast;
            } else if param.eq_ignore_ascii_case("multicast") {
                delivery = DeliveryMode::Multicast;
            } else if let Some(v) = param.strip_prefix("client_port=") {
                let (rtp, rtcp) = parse_pair::<u16>(v)?;
                client_rtp_port = Some(rtp);
                client_rtcp_port = rtcp;
            } else if let Some(v) = param.strip_prefix("interleaved=") {
                let (a, b) = parse_pair::<u8>(v)?;
                rtp_channel = Some(a);
                rtcp_channel = b;
            } else if let Some(v) = param.strip_prefix("ttl=") {
                ttl = v.trim().parse().ok();
            }
        }

        Some(ClientTransportRequest {
            mode,
            delivery,
            raw_spec: scheme.to_string(),
            client_rtp_port,
            client_rtcp_port,
            rtp_channel,
            rtcp_channel,
            ttl,
        })
    }
}

fn parse_pair<T: std::str::FromStr>(v: &str) -> Option<(T, Option<T>)> {
    let mut it = v.split('-');
    let a: T = it.next()?.trim().parse().ok()?;
    let b = it.next().and_then(|s| s.trim().parse().ok());
    Some((a, b))
}

/// The transport actually negotiated for one (session, track) stream —
/// what the SETUP response's `Transport:` header describes and what RTP
/// delivery addresses against.
#[derive(Debug, Clone)]
pub struct NegotiatedTransport {
    pub mode: TransportMode,
    pub delivery: DeliveryMode,
    /// Full socket address for UDP RTP delivery (`client_ip:client_rtp_port`).
    pub client_addr: SocketAddr,
    pub client_rtp_port: Option<u16>,
    pub client_rtcp_port: Option<u16>,
    pub server_rtp_port: Option<u16>,
    pub server_rtcp_port: Option<u16>,
    pub rtp_channel: Option<u8>,
    pub rtcp_channel: Option<u8>,
    /// `destination=` value.
    pub destination: String,
    /// `source=` value.
    pub source: String,
    pub ttl: Option<u8>,
    pub raw_spec: String,
}

impl NegotiatedTransport {
    /// Format the `Transport:` response header per the six delivery/mode
    /// combinations RFC 2326 §12.39 allows (multicast+TCP is rejected
    /// before negotiation ever reaches here).
    pub fn format_header(&self) -> String {
        let scheme = match self.mode {
            TransportMode::RtpUdp => "RTP/AVP",
            TransportMode::RtpTcp => "RTP/AVP/TCP",
            TransportMode::RawUdp => self.raw_spec.as_str(),
        };

        match (self.delivery, self.mode) {
            (DeliveryMode::Unicast, TransportMode::RtpUdp) => format!(
                "{scheme};unicast;destination={};source={};client_port={}-{};server_port={}-{}",
                self.destination,
                self.source,
                self.client_rtp_port.unwrap_or(0),
                self.client_rtcp_port.unwrap_or(0),
                self.server_rtp_port.unwrap_or(0),
                self.server_rtcp_port.unwrap_or(0),
            ),
            (DeliveryMode::Unicast, TransportMode::RtpTcp) => format!(
                "{scheme};unicast;destination={};source={};interleaved={}-{}",
                self.destination,
                self.source,
                self.rtp_channel.unwrap_or(0),
                self.rtcp_channel.unwrap_or(0),
            ),
            (DeliveryMode::Unicast, TransportMode::RawUdp) => format!(
                "{scheme};unicast;destination={};source={};client_port={};server_port={}",
                self.destination,
                self.source,
                self.client_rtp_port.unwrap_or(0),
                self.server_rtp_port.unwrap_or(0),
            ),
            (DeliveryMode::Multicast, TransportMode::RtpUdp) => format!(
                "{scheme};multicast;destination={};source={};port={}-{};ttl={}",
                self.destination,
                self.source,
                self.server_rtp_port.unwrap_or(0),
                self.server_rtcp_port.unwrap_or(0),
                self.ttl.unwrap_or(255),
            ),
            (DeliveryMode::Multicast, TransportMode::RawUdp) => format!(
                "{scheme};multicast;destination={};source={};port={};ttl={}",
                self.destination,
                self.source,
                self.server_rtp_port.unwrap_or(0),
                self.ttl.unwrap_or(255),
            ),
            (DeliveryMode::Multicast, TransportMode::RtpTcp) => {
                unreachable!("multicast + TCP is rejected with 461 before a transport is negotiated")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rtp_avp_udp_unicast() {
        let req = ClientTransportRequest::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(req.mode, TransportMode::RtpUdp);
        assert_eq!(req.delivery, DeliveryMode::Unicast);
        assert_eq!(req.client_rtp_port, Some(5000));
        assert_eq!(req.client_rtcp_port, Some(5001));
    }

    #[test]
    fn parse_rtp_avp_explicit_udp() {
        let req = ClientTransportRequest::parse("RTP/AVP/UDP;unicast;client_port=6000-6001").unwrap();
        assert_eq!(req.mode, TransportMode::RtpUdp);
    }

    #[test]
    fn parse_rtp_avp_tcp_interleaved_specified() {
        let req = ClientTransportRequest::parse("RTP/AVP/TCP;unicast;interleaved=0-1").unwrap();
        assert_eq!(req.mode, TransportMode::RtpTcp);
        assert_eq!(req.rtp_channel, Some(0));
        assert_eq!(req.rtcp_channel, Some(1));
    }

    #[test]
    fn parse_rtp_avp_tcp_unspecified_channel() {
        let req = ClientTransportRequest::parse("RTP/AVP/TCP;unicast;interleaved=255").unwrap();
        assert_eq!(req.rtp_channel, Some(UNSPECIFIED_CHANNEL));
        assert_eq!(req.rtcp_channel, None);
    }

    #[test]
    fn parse_raw_udp() {
        let req = ClientTransportRequest::parse("RAW/RAW/UDP;unicast;client_port=7000-7001").unwrap();
        assert_eq!(req.mode, TransportMode::RawUdp);
        assert_eq!(req.raw_spec, "RAW/RAW/UDP");
    }

    #[test]
    fn parse_bare_udp() {
        let req = ClientTransportRequest::parse("UDP;client_port=7000").unwrap();
        assert_eq!(req.mode, TransportMode::RawUdp);
    }

    #[test]
    fn parse_multicast() {
        let req = ClientTransportRequest::parse("RTP/AVP;multicast;ttl=16").unwrap();
        assert_eq!(req.delivery, DeliveryMode::Multicast);
        assert_eq!(req.ttl, Some(16));
    }

    #[test]
    fn parse_falls_through_comma_separated_list() {
        let req = ClientTransportRequest::parse("bogus/spec,RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(req.mode, TransportMode::RtpUdp);
        assert_eq!(req.client_rtp_port, Some(5000));
    }

    #[test]
    fn format_unicast_udp() {
        let t = NegotiatedTransport {
            mode: TransportMode::RtpUdp,
            delivery: DeliveryMode::Unicast,
            client_addr: "127.0.0.1:5000".parse().unwrap(),
            client_rtp_port: Some(5000),
            client_rtcp_port: Some(5001),
            server_rtp_port: Some(6000),
            server_rtcp_port: Some(6001),
            rtp_channel: None,
            rtcp_channel: None,
            destination: "127.0.0.1".to_string(),
            source: "10.0.0.1".to_string(),
            ttl: None,
            raw_spec: "RTP/AVP".to_string(),
        };
        assert_eq!(
            t.format_header(),
            "RTP/AVP;unicast;destination=127.0.0.1;source=10.0.0.1;client_port=5000-5001;server_port=6000-6001"
        );
    }

    #[test]
    fn format_unicast_tcp_interleaved() {
        let t = NegotiatedTransport {
            mode: TransportMode::RtpTcp,
            delivery: DeliveryMode::Unicast,
            client_addr: "127.0.0.1:0".parse().unwrap(),
            client_rtp_port: None,
            client_rtcp_port: None,
            server_rtp_port: None,
            server_rtcp_port: None,
            rtp_channel: Some(0),
            rtcp_channel: Some(1),
            destination: "127.0.0.1".to_string(),
            source: "10.0.0.1".to_string(),
            ttl: None,
            raw_spec: "RTP/AVP/TCP".to_string(),
        };
        assert_eq!(
            t.format_header(),
            "RTP/AVP/TCP;unicast;destination=127.0.0.1;source=10.0.0.1;interleaved=0-1"
        );
    }
}
