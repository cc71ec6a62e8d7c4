//! Static RTP payload-type table (RFC 3551 §6) and the frequency-guessing
//! fallback used when a dynamic payload type's `a=rtpmap` omits the clock
//! rate.

/// Look up the codec name, clock rate (Hz), and channel count for a static
/// RTP payload type (RFC 3551 §6). Dynamic types (96-127) and any value
/// not in the static table return `None` — callers fall back to the
/// `a=rtpmap` attribute and, failing that, [`guess_rtp_timestamp_frequency`].
pub fn lookup_static_payload_format(payload_type: u8) -> Option<(&'static str, u32, u32)> {
    let entry = match payload_type {
        0 => ("PCMU", 8000, 1),
        2 => ("G726-32", 8000, 1),
        3 => ("GSM", 8000, 1),
        4 => ("G723", 8000, 1),
        5 => ("DVI4", 8000, 1),
        6 => ("DVI4", 16000, 1),
        7 => ("LPC", 8000, 1),
        8 => ("PCMA", 8000, 1),
        9 => ("G722", 8000, 1),
        10 => ("L16", 44100, 2),
        11 => ("L16", 44100, 1),
        12 => ("QCELP", 8000, 1),
        14 => ("MPA", 90000, 1),
        15 => ("G728", 8000, 1),
        16 => ("DVI4", 11025, 1),
        17 => ("DVI4", 22050, 1),
        18 => ("G729", 8000, 1),
        25 => ("CELB", 90000, 1),
        26 => ("JPEG", 90000, 1),
        28 => ("NV", 90000, 1),
        31 => ("H261", 90000, 1),
        32 => ("MPV", 90000, 1),
        33 => ("MP2T", 90000, 1),
        34 => ("H263", 90000, 1),
        _ => return None,
    };
    Some(entry)
}

/// Guess the RTP timestamp frequency for a dynamic payload type whose
/// `a=rtpmap` attribute omitted (or never specified) the clock rate.
///
/// A handful of codec names have an unambiguous frequency regardless of
/// what the `rtpmap` said; everything else falls back to the medium's
/// conventional default: 90000 for video, 1000 for text, 8000 otherwise.
pub fn guess_rtp_timestamp_frequency(medium_name: &str, codec_name: &str) -> u32 {
    if codec_name.eq_ignore_ascii_case("L16") {
        return 44100;
    }
    if codec_name.eq_ignore_ascii_case("MPA")
        || codec_name.eq_ignore_ascii_case("MPA-ROBUST")
        || codec_name.eq_ignore_ascii_case("X-MP3-DRAFT-00")
    {
        return 90000;
    }

    if medium_name.eq_ignore_ascii_case("video") {
        90000
    } else if medium_name.eq_ignore_ascii_case("text") {
        1000
    } else {
        8000
    }
}
