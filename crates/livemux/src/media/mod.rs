//! # Media Awareness — Annex-B Scanning & Parameter Sets
//!
//! Walks H.264 Annex-B access units without copying them, classifies the
//! NAL units that matter for muxing (SPS, PPS, IDR), and builds the codec
//! configuration the container header needs.

pub mod nal;
pub mod params;
