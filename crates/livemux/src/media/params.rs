//! # Parameter-Set Extractor
//!
//! Scans one access unit for the SPS, PPS and IDR units that gate the
//! container header. The header may only be written from a frame that
//! carries all three; earlier frames are dropped, never buffered.

use std::ops::Range;

use bytes::{BufMut, Bytes, BytesMut};

use super::nal::{NalKind, NalUnits};

/// What a single access unit contains, as far as header readiness goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameScan {
    /// Byte range (start code included) of the last SPS seen.
    pub sps: Option<Range<usize>>,
    /// Byte range (start code included) of the last PPS seen.
    pub pps: Option<Range<usize>>,
    /// Whether an IDR slice is present.
    pub has_idr: bool,
    /// Number of NAL units found.
    pub unit_count: usize,
}

impl FrameScan {
    /// Walk every unit in `frame`. Later SPS/PPS units replace earlier ones.
    pub fn scan(frame: &[u8]) -> Self {
        let mut scan = FrameScan::default();
        for unit in NalUnits::new(frame) {
            scan.unit_count += 1;
            match unit.kind {
                NalKind::Sps => scan.sps = Some(unit.range),
                NalKind::Pps => scan.pps = Some(unit.range),
                NalKind::Idr => scan.has_idr = true,
                NalKind::Other(_) => {}
            }
        }
        scan
    }

    /// True when both parameter sets were seen in this frame.
    pub fn has_parameter_sets(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    /// True when this frame can open the container: SPS, PPS and an IDR
    /// slice are all present.
    pub fn header_ready(&self) -> bool {
        self.has_parameter_sets() && self.has_idr
    }

    /// Build the codec parameter blob (SPS bytes then PPS bytes).
    ///
    /// Returns `None` unless both parameter sets were found in `frame`.
    pub fn parameter_blob(&self, frame: &[u8]) -> Option<ParameterBlob> {
        let sps = frame.get(self.sps.clone()?)?;
        let pps = frame.get(self.pps.clone()?)?;
        Some(ParameterBlob::from_parts(sps, pps))
    }
}

/// Codec configuration for the video stream: the SPS unit followed by the
/// PPS unit, each with its Annex-B start code.
///
/// The order is fixed regardless of where the units appeared in the frame;
/// FLV and MP4 configuration records list SPS before PPS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBlob {
    data: Bytes,
    sps_len: usize,
}

impl ParameterBlob {
    /// Concatenate SPS and PPS into a buffer sized exactly for both.
    pub fn from_parts(sps: &[u8], pps: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(sps.len() + pps.len());
        buf.put_slice(sps);
        buf.put_slice(pps);
        ParameterBlob {
            data: buf.freeze(),
            sps_len: sps.len(),
        }
    }

    /// The full blob, SPS bytes followed by PPS bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// SPS unit bytes, start code included.
    pub fn sps(&self) -> &[u8] {
        &self.data[..self.sps_len]
    }

    /// PPS unit bytes, start code included.
    pub fn pps(&self) -> &[u8] {
        &self.data[self.sps_len..]
    }

    /// SPS NAL unit without start code or trailing padding.
    pub fn sps_payload(&self) -> &[u8] {
        strip_annex_b(self.sps())
    }

    /// PPS NAL unit without start code or trailing padding.
    pub fn pps_payload(&self) -> &[u8] {
        strip_annex_b(self.pps())
    }

    /// Build the AVCDecoderConfigurationRecord (ISO/IEC 14496-15 §5.2.4.1)
    /// carried by the FLV AVC sequence header.
    ///
    /// ```text
    /// version(8)=1 | profile(8) | compat(8) | level(8)
    /// 111111 | lengthSizeMinusOne(2)=3
    /// 111 | numSPS(5)=1 | spsLen(16) | sps
    /// numPPS(8)=1 | ppsLen(16) | pps
    /// ```
    pub fn avc_decoder_configuration(&self) -> Bytes {
        let sps = self.sps_payload();
        let pps = self.pps_payload();
        let mut out = BytesMut::with_capacity(11 + sps.len() + pps.len());

        out.put_u8(1);
        out.put_u8(sps.get(1).copied().unwrap_or(66));
        out.put_u8(sps.get(2).copied().unwrap_or(0));
        out.put_u8(sps.get(3).copied().unwrap_or(31));
        out.put_u8(0xFF);
        out.put_u8(0xE1);
        out.put_u16(sps.len() as u16);
        out.put_slice(sps);
        out.put_u8(1);
        out.put_u16(pps.len() as u16);
        out.put_slice(pps);

        out.freeze()
    }
}

fn strip_annex_b(unit: &[u8]) -> &[u8] {
    NalUnits::new(unit)
        .next()
        .map(|u| u.payload(unit))
        .unwrap_or(unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xC0, 0x1E, 0xDA];
    const PPS: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x38, 0x80];
    const IDR: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x21];
    const SLICE: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x41, 0x9A, 0x02];

    fn frame(parts: &[&[u8]]) -> Vec<u8> {
        parts.concat()
    }

    #[test]
    fn full_keyframe_is_ready() {
        let f = frame(&[SPS, PPS, IDR]);
        let scan = FrameScan::scan(&f);
        assert!(scan.header_ready());
        assert_eq!(scan.unit_count, 3);

        let blob = scan.parameter_blob(&f).unwrap();
        assert_eq!(blob.as_bytes(), frame(&[SPS, PPS]).as_slice());
        assert_eq!(blob.sps(), SPS);
        assert_eq!(blob.pps(), PPS);
    }

    #[test]
    fn blob_order_is_sps_then_pps_regardless_of_input_order() {
        let f = frame(&[IDR, PPS, SPS]);
        let scan = FrameScan::scan(&f);
        assert!(scan.header_ready());
        let blob = scan.parameter_blob(&f).unwrap();
        assert_eq!(blob.as_bytes(), frame(&[SPS, PPS]).as_slice());
    }

    #[test]
    fn parameter_sets_without_idr_are_not_ready() {
        let f = frame(&[SPS, PPS, SLICE]);
        let scan = FrameScan::scan(&f);
        assert!(scan.has_parameter_sets());
        assert!(!scan.header_ready());
        assert!(scan.parameter_blob(&f).is_some());
    }

    #[test]
    fn missing_pps_yields_no_blob() {
        let f = frame(&[SPS, IDR]);
        let scan = FrameScan::scan(&f);
        assert!(scan.has_idr);
        assert!(!scan.header_ready());
        assert!(scan.parameter_blob(&f).is_none());
    }

    #[test]
    fn last_parameter_set_wins() {
        let sps2: &[u8] = &[0x00, 0x00, 0x01, 0x67, 0x64, 0x00, 0x28];
        let f = frame(&[SPS, sps2, PPS, IDR]);
        let scan = FrameScan::scan(&f);
        let blob = scan.parameter_blob(&f).unwrap();
        assert_eq!(blob.sps(), sps2);
    }

    #[test]
    fn malformed_input_is_not_ready() {
        let scan = FrameScan::scan(&[0x01, 0x02, 0x03]);
        assert_eq!(scan, FrameScan::default());
        assert!(!scan.header_ready());
    }

    #[test]
    fn blob_capacity_is_exact() {
        let blob = ParameterBlob::from_parts(SPS, PPS);
        assert_eq!(blob.len(), SPS.len() + PPS.len());
    }

    #[test]
    fn avc_decoder_configuration_layout() {
        let blob = ParameterBlob::from_parts(SPS, PPS);
        let record = blob.avc_decoder_configuration();
        let sps = &SPS[4..];
        let pps = &PPS[4..];

        assert_eq!(record[0], 1);
        assert_eq!(record[1], 0x42); // profile_idc (Baseline)
        assert_eq!(record[2], 0xC0);
        assert_eq!(record[3], 0x1E); // level 3.0
        assert_eq!(record[4], 0xFF);
        assert_eq!(record[5], 0xE1);
        assert_eq!(u16::from_be_bytes([record[6], record[7]]) as usize, sps.len());
        assert_eq!(&record[8..8 + sps.len()], sps);
        let off = 8 + sps.len();
        assert_eq!(record[off], 1);
        assert_eq!(
            u16::from_be_bytes([record[off + 1], record[off + 2]]) as usize,
            pps.len()
        );
        assert_eq!(&record[off + 3..], pps);
    }
}
