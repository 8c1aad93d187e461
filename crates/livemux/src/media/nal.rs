//! # NAL Unit Scanner
//!
//! Locates Annex-B start codes (`00 00 01` or `00 00 00 01`) in an H.264
//! byte stream and yields one descriptor per NAL unit. Descriptors are byte
//! ranges into the caller's buffer; nothing is copied.
//!
//! ```text
//!  [00 00 00 01][67 ..SPS..][00 00 01][68 ..PPS..][00 00 01][65 ..IDR..]
//!  |<------ unit 0 ------->|<--- unit 1 ------->|<---- unit 2 ------->|
//! ```
//!
//! A unit spans from its start code to the next start code, or to the end
//! of the buffer for the last unit.

use std::ops::Range;

/// H.264 NAL unit type numbers used by the muxer.
pub mod nal_type {
    /// Coded slice of an IDR picture.
    pub const IDR_SLICE: u8 = 5;
    /// Sequence Parameter Set.
    pub const SPS: u8 = 7;
    /// Picture Parameter Set.
    pub const PPS: u8 = 8;
}

/// Role of a NAL unit as far as the muxer cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalKind {
    Sps,
    Pps,
    Idr,
    /// Any other unit; carries the raw 5-bit type.
    Other(u8),
}

impl NalKind {
    /// Classify from the NAL header byte (`forbidden(1) | ref_idc(2) | type(5)`).
    pub fn from_header(header: u8) -> Self {
        match header & 0x1F {
            nal_type::SPS => NalKind::Sps,
            nal_type::PPS => NalKind::Pps,
            nal_type::IDR_SLICE => NalKind::Idr,
            other => NalKind::Other(other),
        }
    }

    /// The raw NAL unit type number.
    pub fn nal_type(self) -> u8 {
        match self {
            NalKind::Sps => nal_type::SPS,
            NalKind::Pps => nal_type::PPS,
            NalKind::Idr => nal_type::IDR_SLICE,
            NalKind::Other(t) => t,
        }
    }
}

/// Descriptor of one NAL unit inside a frame buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    /// Unit classification.
    pub kind: NalKind,
    /// Byte range of the unit, start code included.
    pub range: Range<usize>,
    /// Length of the start code prefix (3 or 4).
    pub prefix_len: usize,
}

impl NalUnit {
    /// Raw bytes of the unit including its start code.
    pub fn bytes<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        frame.get(self.range.clone()).unwrap_or(&[])
    }

    /// Unit bytes after the start code, with trailing zero padding removed.
    pub fn payload<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        let bytes = self.bytes(frame);
        let body = bytes.get(self.prefix_len..).unwrap_or(&[]);
        trim_trailing_zeros(body)
    }

    /// Total length of the unit including its start code.
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Lazy iterator over the NAL units of an Annex-B buffer.
///
/// Finite and single-pass; create a new one to scan again. Buffers shorter
/// than 4 bytes or without a start code produce no units.
pub struct NalUnits<'a> {
    data: &'a [u8],
    next: Option<(usize, usize)>,
}

impl<'a> NalUnits<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        NalUnits {
            data,
            next: find_start_code(data, 0),
        }
    }
}

impl Iterator for NalUnits<'_> {
    type Item = NalUnit;

    fn next(&mut self) -> Option<NalUnit> {
        let (start, prefix_len) = self.next.take()?;
        let header = *self.data.get(start + prefix_len)?;
        let following = find_start_code(self.data, start + prefix_len);
        let end = following.map_or(self.data.len(), |(pos, _)| pos);
        self.next = following;

        Some(NalUnit {
            kind: NalKind::from_header(header),
            range: start..end,
            prefix_len,
        })
    }
}

/// Find the next start code at or after `from`.
///
/// Returns `(position, prefix_len)`. A start code only counts when the NAL
/// header byte after it is inside the buffer.
pub fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 < data.len() {
        if data[i] == 0x00 && data[i + 1] == 0x00 {
            if data[i + 2] == 0x01 {
                return Some((i, 3));
            }
            if data[i + 2] == 0x00 && data[i + 3] == 0x01 && i + 4 < data.len() {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Convert an Annex-B access unit to AVCC framing (4-byte big-endian
/// length before each NAL unit), as FLV and MP4 carry H.264.
pub fn annex_b_to_avcc(frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() + 16);
    for unit in NalUnits::new(frame) {
        let payload = unit.payload(frame);
        if payload.is_empty() {
            continue;
        }
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
    }
    out
}

fn trim_trailing_zeros(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != 0x00)
        .map_or(0, |pos| pos + 1);
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(data: &[u8]) -> Vec<NalKind> {
        NalUnits::new(data).map(|u| u.kind).collect()
    }

    // ─── Classification ─────────────────────────────────────────────────

    #[test]
    fn classifies_header_bytes() {
        assert_eq!(NalKind::from_header(0x67), NalKind::Sps);
        assert_eq!(NalKind::from_header(0x68), NalKind::Pps);
        assert_eq!(NalKind::from_header(0x65), NalKind::Idr);
        assert_eq!(NalKind::from_header(0x41), NalKind::Other(1));
        assert_eq!(NalKind::from_header(0x06), NalKind::Other(6));
    }

    #[test]
    fn nal_type_roundtrips_through_kind() {
        for t in 0u8..32 {
            assert_eq!(NalKind::from_header(t).nal_type(), t);
        }
    }

    // ─── Annex B Scanning ───────────────────────────────────────────────

    #[test]
    fn finds_three_byte_start_codes() {
        let data = [
            0x00, 0x00, 0x01, 0x67, 0xAA, // SPS
            0x00, 0x00, 0x01, 0x68, 0xBB, // PPS
            0x00, 0x00, 0x01, 0x65, 0xCC, 0xDD, // IDR
        ];
        assert_eq!(kinds(&data), vec![NalKind::Sps, NalKind::Pps, NalKind::Idr]);

        let units: Vec<_> = NalUnits::new(&data).collect();
        assert_eq!(units[0].range, 0..5);
        assert_eq!(units[1].range, 5..10);
        assert_eq!(units[2].range, 10..16);
        assert!(units.iter().all(|u| u.prefix_len == 3));
    }

    #[test]
    fn finds_four_byte_start_codes() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0xAA, //
            0x00, 0x00, 0x00, 0x01, 0x41, 0x9A, 0x9B,
        ];
        let units: Vec<_> = NalUnits::new(&data).collect();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].range, 0..6);
        assert_eq!(units[0].prefix_len, 4);
        assert_eq!(units[1].kind, NalKind::Other(1));
        assert_eq!(units[1].payload(&data), &[0x41, 0x9A, 0x9B]);
    }

    #[test]
    fn mixed_prefix_lengths() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, //
            0x00, 0x00, 0x01, 0x68, 0xCE, //
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88,
        ];
        let units: Vec<_> = NalUnits::new(&data).collect();
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].bytes(&data), &data[0..6]);
        assert_eq!(units[1].bytes(&data), &data[6..11]);
        assert_eq!(units[2].bytes(&data), &data[11..]);
    }

    #[test]
    fn short_buffers_yield_nothing() {
        assert!(kinds(&[]).is_empty());
        assert!(kinds(&[0x00]).is_empty());
        assert!(kinds(&[0x00, 0x00, 0x01]).is_empty());
    }

    #[test]
    fn no_start_code_yields_nothing() {
        assert!(kinds(&[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]).is_empty());
    }

    #[test]
    fn start_code_at_end_without_header_is_ignored() {
        let data = [0x00, 0x00, 0x01, 0x65, 0xAA, 0x00, 0x00, 0x01];
        let units: Vec<_> = NalUnits::new(&data).collect();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].range, 0..8);
    }

    #[test]
    fn leading_garbage_is_skipped() {
        let data = [0xFF, 0xEE, 0x00, 0x00, 0x01, 0x65, 0x01];
        let units: Vec<_> = NalUnits::new(&data).collect();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].range, 2..7);
    }

    #[test]
    fn payload_drops_trailing_zero_padding() {
        let data = [0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x00];
        let unit = NalUnits::new(&data).next().unwrap();
        assert_eq!(unit.payload(&data), &[0x67, 0x42]);
    }

    // ─── AVCC Conversion ────────────────────────────────────────────────

    #[test]
    fn annex_b_to_avcc_length_prefixes() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, //
            0x00, 0x00, 0x01, 0x41, 0x9A,
        ];
        assert_eq!(
            annex_b_to_avcc(&data),
            vec![
                0x00, 0x00, 0x00, 0x03, 0x65, 0x88, 0x84, //
                0x00, 0x00, 0x00, 0x02, 0x41, 0x9A,
            ]
        );
    }

    #[test]
    fn annex_b_to_avcc_empty_input() {
        assert!(annex_b_to_avcc(&[]).is_empty());
    }
}
