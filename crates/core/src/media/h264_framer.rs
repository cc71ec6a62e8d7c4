//! H.264 Annex-B access-unit framer (ITU-T H.264 Annex B, §7.4.1.2.4).
//!
//! This is the *receiving* direction: given a raw Annex-B byte stream (start
//! codes + NAL units, as produced by an encoder or read from a file), split
//! it into discrete NAL units and group consecutive NAL units into access
//! units (one access unit per coded picture). This composes with, but is
//! distinct from, [`super::h264::H264Packetizer`] — that type's job starts
//! *after* an access unit already exists and turns it into RTP packets.
//!
//! The access-unit boundary test below follows the criteria H.264 §7.4.1.2.4
//! lists for `PrevRefPicFlag`/first-picture detection, narrowed to the
//! subset that's decidable without a full decoder: IdrPicFlag, nal_ref_idc,
//! frame_num, pic_parameter_set_id, field_pic_flag, bottom_field_flag, and
//! idr_pic_id.

use std::mem;
use std::time::Duration;

/// Start of a NAL unit's header byte: `forbidden_zero_bit (1) |
/// nal_ref_idc (2) | nal_unit_type (5)`.
#[derive(Debug, Clone)]
pub struct NalUnit {
    pub nal_ref_idc: u8,
    pub nal_unit_type: u8,
    /// Full NAL unit bytes, header included, start code excluded.
    pub data: Vec<u8>,
}

impl NalUnit {
    fn is_vcl(&self) -> bool {
        (1..=5).contains(&self.nal_unit_type)
    }

    fn is_idr(&self) -> bool {
        self.nal_unit_type == 5
    }
}

/// One coded picture: the sequence of NAL units between two access-unit
/// boundaries, tagged with the presentation time the framer assigned it.
#[derive(Debug, Clone, Default)]
pub struct AccessUnit {
    pub nal_units: Vec<NalUnit>,
    /// Presentation time of this access unit, relative to the framer's
    /// first emitted unit. Successive units are spaced `1/frame_rate`
    /// apart (H.264 §7.4.1.2.4, spec "presentation-time bookkeeping").
    pub presentation_time: Duration,
}

/// Sequence Parameter Set fields needed to interpret subsequent slice
/// headers and to derive the stream's frame rate (H.264 §7.3.2.1.1).
#[derive(Debug, Clone, Default)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub chroma_format_idc: u32,
    pub separate_colour_plane_flag: bool,
    pub log2_max_frame_num: u32,
    pub pic_order_cnt_type: u32,
    pub frame_mbs_only_flag: bool,
    /// Derived as `time_scale / (2 * num_units_in_tick)` when the VUI's
    /// `fixed_frame_rate_flag` is set (H.264 Annex E.2.1).
    pub frame_rate: Option<f32>,
}

/// The subset of an H.264 slice header's fields relevant to access-unit
/// boundary detection (H.264 §7.3.3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SliceHeaderFields {
    frame_num: u32,
    pic_parameter_set_id: u32,
    field_pic_flag: bool,
    bottom_field_flag: bool,
    idr_pic_id: u32,
}

/// Stateful framer: caches the most recently seen SPS (so slice headers of
/// later NAL units can be interpreted) and tracks a running picture count
/// and nominal frame rate (H.264 default of 25.0 fps until a VUI says
/// otherwise, matching the reference framer's default).
#[derive(Debug, Clone)]
pub struct H264AccessUnitFramer {
    sps: Option<SpsInfo>,
    last_seen_sps: Option<Vec<u8>>,
    last_seen_pps: Option<Vec<u8>>,
    frame_rate: f32,
    picture_count: u64,
    /// Presentation time the next emitted access unit will carry.
    next_presentation_time: Duration,
}

impl Default for H264AccessUnitFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl H264AccessUnitFramer {
    pub fn new() -> Self {
        H264AccessUnitFramer {
            sps: None,
            last_seen_sps: None,
            last_seen_pps: None,
            frame_rate: 25.0,
            picture_count: 0,
            next_presentation_time: Duration::ZERO,
        }
    }

    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    pub fn picture_count(&self) -> u64 {
        self.picture_count
    }

    /// Presentation time the next access unit emitted by
    /// [`split_access_units`](Self::split_access_units) will carry.
    pub fn next_presentation_time(&self) -> Duration {
        self.next_presentation_time
    }

    pub fn last_seen_sps(&self) -> Option<&[u8]> {
        self.last_seen_sps.as_deref()
    }

    pub fn last_seen_pps(&self) -> Option<&[u8]> {
        self.last_seen_pps.as_deref()
    }

    /// Scan a complete Annex-B byte stream and split it into access units.
    ///
    /// Every NAL unit is observed (SPS/PPS are cached, SEI payloads are
    /// walked) in stream order before the boundary test runs, so the
    /// boundary test for NAL unit N can rely on N+1's header without a
    /// second pass.
    pub fn split_access_units(&mut self, data: &[u8]) -> Vec<AccessUnit> {
        let nal_units = scan_nal_units(data);
        let mut access_units = Vec::new();
        let mut current = AccessUnit::default();

        for i in 0..nal_units.len() {
            let nal = &nal_units[i];
            self.observe(nal);

            let ends_access_unit = match nal_units.get(i + 1) {
                Some(next) => self.nal_ends_access_unit(nal, next),
                // Last NAL unit in the buffer: by the reference framer's
                // rule, EOF-without-a-next-NAL always ends the current AU.
                None => true,
            };

            current.nal_units.push(nal.clone());
            if ends_access_unit {
                self.picture_count += 1;
                current.presentation_time = self.next_presentation_time;
                access_units.push(mem::take(&mut current));
                self.advance_presentation_time();
            }
        }

        if !current.nal_units.is_empty() {
            current.presentation_time = self.next_presentation_time;
            access_units.push(current);
            self.advance_presentation_time();
        }

        access_units
    }

    /// Advance `next_presentation_time` by `1/frame_rate`, the spacing
    /// between two consecutive access-unit boundaries (H.264 §7.4.1.2.4,
    /// spec "presentation-time bookkeeping": seconds/microseconds carry
    /// correctly since `Duration` already tracks sub-second precision).
    fn advance_presentation_time(&mut self) {
        self.next_presentation_time += Duration::from_secs_f64(1.0 / self.frame_rate as f64);
    }

    fn observe(&mut self, nal: &NalUnit) {
        match nal.nal_unit_type {
            6 => {
                let rbsp = remove_emulation_prevention_bytes(&nal.data);
                let payload_count = walk_sei_payloads(&rbsp);
                tracing::trace!(payload_count, "SEI NAL unit observed");
            }
            7 => {
                let rbsp = remove_emulation_prevention_bytes(&nal.data);
                let sps = parse_sps(&rbsp);
                if let Some(fr) = sps.frame_rate {
                    self.frame_rate = fr;
                }
                self.last_seen_sps = Some(nal.data.clone());
                self.sps = Some(sps);
            }
            8 => {
                self.last_seen_pps = Some(nal.data.clone());
            }
            _ => {}
        }
    }

    /// Access-unit boundary test, approximating H.264 §7.4.1.2.4.
    fn nal_ends_access_unit(&self, nal: &NalUnit, next: &NalUnit) -> bool {
        if !nal.is_vcl() {
            return false;
        }
        if !next.is_vcl() {
            return true;
        }

        if next.is_idr() != nal.is_idr() {
            return true;
        }
        if next.nal_ref_idc != nal.nal_ref_idc && (next.nal_ref_idc == 0 || nal.nal_ref_idc == 0) {
            return true;
        }

        let Some(sps) = &self.sps else {
            // Without a cached SPS we can't parse slice headers; fall back
            // to treating every VCL NAL as its own access unit rather than
            // guessing wrong.
            return true;
        };

        let this_header = parse_slice_header(&nal.data, nal.nal_unit_type, sps);
        let next_header = parse_slice_header(&next.data, next.nal_unit_type, sps);

        if next_header.frame_num != this_header.frame_num {
            return true;
        }
        if next_header.pic_parameter_set_id != this_header.pic_parameter_set_id {
            return true;
        }
        if next_header.field_pic_flag != this_header.field_pic_flag {
            return true;
        }
        if next_header.bottom_field_flag != this_header.bottom_field_flag {
            return true;
        }
        if next.is_idr() && next_header.idr_pic_id != this_header.idr_pic_id {
            return true;
        }

        false
    }
}

/// Scan an Annex-B byte stream for 3- or 4-byte start codes and split it
/// into [`NalUnit`]s (start codes themselves are not included in `data`).
fn scan_nal_units(data: &[u8]) -> Vec<NalUnit> {
    let starts = find_start_codes(data);
    let mut units = Vec::with_capacity(starts.len());

    for (i, &(start, _)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map(|&(s, _)| s).unwrap_or(data.len());
        let nal_start = starts[i].1;
        if nal_start >= end {
            continue;
        }
        let payload = &data[nal_start..end];
        let header = payload[0];
        units.push(NalUnit {
            nal_ref_idc: (header & 0x60) >> 5,
            nal_unit_type: header & 0x1F,
            data: payload.to_vec(),
        });
    }
    units
}

/// Returns `(start_code_offset, nal_unit_offset)` pairs for every 3-byte
/// (`00 00 01`) or 4-byte (`00 00 00 01`) Annex-B start code in `data`.
fn find_start_codes(data: &[u8]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let code_start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            out.push((code_start, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }
    out
}

/// Strip `emulation_prevention_three_byte`s: every `00 00 03` becomes
/// `00 00` (H.264 §7.3.1, §7.4.1).
fn remove_emulation_prevention_bytes(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len());
    let mut zero_run = 0u32;
    let mut i = 0;
    while i < nal.len() {
        let b = nal[i];
        if zero_run >= 2 && b == 3 {
            zero_run = 0;
            i += 1;
            continue;
        }
        out.push(b);
        zero_run = if b == 0 { zero_run + 1 } else { 0 };
        i += 1;
    }
    out
}

/// Walk the two-tier 0xFF-extended length scheme SEI payloads use
/// (H.264 §7.3.2.3.1). Returns the number of payloads found; used only
/// to validate the walk terminates cleanly (consumers that need the
/// decoded payload bytes read them straight out of the NAL instead).
fn walk_sei_payloads(rbsp: &[u8]) -> usize {
    let mut j = 1usize; // skip the NAL header byte
    let mut count = 0;

    while j < rbsp.len() {
        let mut payload_type: u32 = 0;
        while j < rbsp.len() && rbsp[j] == 0xFF {
            j += 1;
            if j < rbsp.len() {
                payload_type += rbsp[j] as u32;
            }
        }
        if j >= rbsp.len() {
            break;
        }
        let last_type_byte = rbsp[j];
        payload_type += last_type_byte as u32;
        j += 1;

        let mut payload_size: u32 = 0;
        while j < rbsp.len() && rbsp[j] == 0xFF {
            j += 1;
            if j < rbsp.len() {
                payload_size += rbsp[j] as u32;
            }
        }
        if j >= rbsp.len() {
            break;
        }
        let last_size_byte = rbsp[j];
        payload_size += last_size_byte as u32;
        j += 1;

        let _ = payload_type;
        j += payload_size as usize;
        count += 1;
    }
    count
}

/// MSB-first bit reader with unsigned Exp-Golomb decoding
/// (H.264 §9.1), mirroring the reference `BitVector` interface
/// (`get1Bit`/`get1BitBoolean`/`getBits`/`skipBits`/`get_expGolomb`).
struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BitReader { data, bit_pos: 0 }
    }

    fn get_bit(&mut self) -> u32 {
        let byte = self.bit_pos / 8;
        if byte >= self.data.len() {
            return 0;
        }
        let shift = 7 - (self.bit_pos % 8);
        let bit = (self.data[byte] >> shift) & 1;
        self.bit_pos += 1;
        bit as u32
    }

    fn get_bool(&mut self) -> bool {
        self.get_bit() != 0
    }

    fn get_bits(&mut self, n: u32) -> u32 {
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.get_bit();
        }
        value
    }

    fn skip_bits(&mut self, n: u32) {
        self.bit_pos += n as usize;
    }

    /// Unsigned Exp-Golomb (`ue(v)`, H.264 §9.1): count leading zero bits,
    /// then read that many bits as the remainder.
    fn get_exp_golomb(&mut self) -> u32 {
        let mut leading_zero_bits = 0u32;
        while self.get_bit() == 0 {
            leading_zero_bits += 1;
            if leading_zero_bits > 32 {
                return 0;
            }
        }
        (1u32 << leading_zero_bits) - 1 + self.get_bits(leading_zero_bits)
    }
}

const HIGH_CHROMA_PROFILES: [u8; 9] = [100, 110, 122, 244, 44, 83, 86, 118, 128];

/// Parse a Sequence Parameter Set NAL unit (emulation-prevention bytes
/// already removed) per H.264 §7.3.2.1.1.
fn parse_sps(rbsp: &[u8]) -> SpsInfo {
    let mut bv = BitReader::new(rbsp);
    bv.skip_bits(8); // NAL header byte

    let profile_idc = bv.get_bits(8) as u8;
    bv.skip_bits(8); // constraint flags + reserved_zero_2bits
    bv.skip_bits(8); // level_idc
    bv.get_exp_golomb(); // seq_parameter_set_id

    let mut chroma_format_idc = 1u32;
    let mut separate_colour_plane_flag = false;
    if HIGH_CHROMA_PROFILES.contains(&profile_idc) {
        chroma_format_idc = bv.get_exp_golomb();
        if chroma_format_idc == 3 {
            separate_colour_plane_flag = bv.get_bool();
        }
        bv.get_exp_golomb(); // bit_depth_luma_minus8
        bv.get_exp_golomb(); // bit_depth_chroma_minus8
        bv.skip_bits(1); // qpprime_y_zero_transform_bypass_flag
        let seq_scaling_matrix_present_flag = bv.get_bool();
        if seq_scaling_matrix_present_flag {
            skip_scaling_matrices(&mut bv, chroma_format_idc);
        }
    }

    let log2_max_frame_num_minus4 = bv.get_exp_golomb();
    let log2_max_frame_num = log2_max_frame_num_minus4 + 4;
    let pic_order_cnt_type = bv.get_exp_golomb();

    if pic_order_cnt_type == 0 {
        bv.get_exp_golomb(); // log2_max_pic_order_cnt_lsb_minus4
    } else if pic_order_cnt_type == 1 {
        bv.skip_bits(1); // delta_pic_order_always_zero_flag
        bv.get_exp_golomb(); // offset_for_non_ref_pic
        bv.get_exp_golomb(); // offset_for_top_to_bottom_field
        let num_ref_frames_in_pic_order_cnt_cycle = bv.get_exp_golomb();
        for _ in 0..num_ref_frames_in_pic_order_cnt_cycle {
            bv.get_exp_golomb(); // offset_for_ref_frame[i]
        }
    }

    bv.get_exp_golomb(); // max_num_ref_frames
    bv.skip_bits(1); // gaps_in_frame_num_value_allowed_flag
    bv.get_exp_golomb(); // pic_width_in_mbs_minus1
    bv.get_exp_golomb(); // pic_height_in_map_units_minus1

    let frame_mbs_only_flag = bv.get_bool();
    if !frame_mbs_only_flag {
        bv.skip_bits(1); // mb_adaptive_frame_field_flag
    }
    bv.skip_bits(1); // direct_8x8_inference_flag

    let frame_cropping_flag = bv.get_bool();
    if frame_cropping_flag {
        bv.get_exp_golomb(); // frame_crop_left_offset
        bv.get_exp_golomb(); // frame_crop_right_offset
        bv.get_exp_golomb(); // frame_crop_top_offset
        bv.get_exp_golomb(); // frame_crop_bottom_offset
    }

    let mut frame_rate = None;
    let vui_parameters_present_flag = bv.get_bool();
    if vui_parameters_present_flag {
        frame_rate = parse_vui_frame_rate(&mut bv);
    }

    SpsInfo {
        profile_idc,
        chroma_format_idc,
        separate_colour_plane_flag,
        log2_max_frame_num,
        pic_order_cnt_type,
        frame_mbs_only_flag,
        frame_rate,
    }
}

/// `chroma_format_idc != 3` walks 8 scaling lists of size 16; `== 3` walks
/// 12, the first 6 of size 16 and the rest of size 64 (H.264 §7.3.2.1.1.1).
fn skip_scaling_matrices(bv: &mut BitReader, chroma_format_idc: u32) {
    let list_count = if chroma_format_idc != 3 { 8 } else { 12 };
    for i in 0..list_count {
        let seq_scaling_list_present_flag = bv.get_bool();
        if !seq_scaling_list_present_flag {
            continue;
        }
        let size_of_scaling_list = if i < 6 { 16 } else { 64 };
        let mut last_scale: i32 = 8;
        let mut next_scale: i32 = 8;
        for _ in 0..size_of_scaling_list {
            if next_scale != 0 {
                let delta_scale = exp_golomb_signed(bv);
                next_scale = (last_scale + delta_scale + 256) % 256;
            }
            if next_scale != 0 {
                last_scale = next_scale;
            }
        }
    }
}

/// Signed Exp-Golomb (`se(v)`, H.264 §9.1.1), needed for `delta_scale`.
fn exp_golomb_signed(bv: &mut BitReader) -> i32 {
    let code = bv.get_exp_golomb() as i32;
    if code % 2 == 0 {
        -(code / 2)
    } else {
        (code + 1) / 2
    }
}

/// Parse the VUI's timing_info and derive the frame rate
/// (H.264 Annex E.2.1: `frame_rate = time_scale / (2 * num_units_in_tick)`
/// when `fixed_frame_rate_flag` is set).
fn parse_vui_frame_rate(bv: &mut BitReader) -> Option<f32> {
    if bv.get_bool() {
        // aspect_ratio_info_present_flag
        let aspect_ratio_idc = bv.get_bits(8);
        if aspect_ratio_idc == 255 {
            bv.skip_bits(32); // sar_width, sar_height
        }
    }
    if bv.get_bool() {
        // overscan_info_present_flag
        bv.skip_bits(1); // overscan_appropriate_flag
    }
    if bv.get_bool() {
        // video_signal_type_present_flag
        bv.skip_bits(4); // video_format, video_full_range_flag
        if bv.get_bool() {
            // colour_description_present_flag
            bv.skip_bits(24);
        }
    }
    if bv.get_bool() {
        // chroma_loc_info_present_flag
        bv.get_exp_golomb();
        bv.get_exp_golomb();
    }

    let timing_info_present_flag = bv.get_bool();
    if !timing_info_present_flag {
        return None;
    }

    let num_units_in_tick = bv.get_bits(32);
    let time_scale = bv.get_bits(32);
    let fixed_frame_rate_flag = bv.get_bool();

    if fixed_frame_rate_flag && num_units_in_tick > 0 && time_scale > 0 {
        Some(time_scale as f32 / (2.0 * num_units_in_tick as f32))
    } else {
        None
    }
}

/// Parse the access-unit-boundary-relevant subset of a slice header
/// (H.264 §7.3.3), given the cached SPS fields needed to interpret it.
fn parse_slice_header(nal: &[u8], nal_unit_type: u8, sps: &SpsInfo) -> SliceHeaderFields {
    let rbsp = remove_emulation_prevention_bytes(nal);
    let mut bv = BitReader::new(&rbsp);
    bv.skip_bits(8); // NAL header byte

    bv.get_exp_golomb(); // first_mb_in_slice
    bv.get_exp_golomb(); // slice_type
    let pic_parameter_set_id = bv.get_exp_golomb();

    if sps.separate_colour_plane_flag {
        bv.skip_bits(2); // colour_plane_id
    }

    let frame_num = bv.get_bits(sps.log2_max_frame_num);

    let mut field_pic_flag = false;
    let mut bottom_field_flag = false;
    if !sps.frame_mbs_only_flag {
        field_pic_flag = bv.get_bool();
        if field_pic_flag {
            bottom_field_flag = bv.get_bool();
        }
    }

    let mut idr_pic_id = 0;
    if nal_unit_type == 5 {
        idr_pic_id = bv.get_exp_golomb();
    }

    SliceHeaderFields {
        frame_num,
        pic_parameter_set_id,
        field_pic_flag,
        bottom_field_flag,
        idr_pic_id,
    }
}
