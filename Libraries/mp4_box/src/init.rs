//! Init-segment introspection.
//!
//! The live projection never modifies an init segment; it only needs three
//! facts from it: the track id, the media timescale, and the `trex` sample
//! defaults. Instead of modeling the whole `moov` tree, this module walks
//! the container hierarchy generically and parses just the three leaf boxes
//! it cares about.

use crate::boxes::generic::Mp4Box;
use crate::boxes::trex::TrexBox;
use crate::{peek_box_header, read_u32_be, read_version_and_flags};

/// Track facts extracted from an initialization segment.
#[derive(Debug, Clone)]
pub struct InitSegment {
    pub track_id: u32,
    pub timescale: u32,
    pub trex: TrexBox,
}

const CONTAINERS: &[&[u8; 4]] = &[b"moov", b"trak", b"mdia", b"mvex"];

impl InitSegment {
    /// Parses the init-segment bytes. Fails if any of `tkhd`, `mdhd` or
    /// `trex` is missing, or if the segment carries more than one track.
    pub fn parse(data: &[u8]) -> Result<InitSegment, String> {
        let mut track_id = None;
        let mut timescale = None;
        let mut trex = None;
        let mut track_count = 0u32;
        walk(data, &mut |btype, body| {
            match btype {
                b"trak" => track_count += 1,
                b"tkhd" => track_id = Some(parse_tkhd_track_id(body)?),
                b"mdhd" => timescale = Some(parse_mdhd_timescale(body)?),
                b"trex" => {
                    let (parsed, _) = TrexBox::read_box(body)?;
                    trex = Some(parsed);
                }
                _ => {}
            }
            Ok(())
        })?;

        if track_count > 1 {
            return Err(format!("init segment has {} tracks, expected 1", track_count));
        }
        Ok(InitSegment {
            track_id: track_id.ok_or("no tkhd box in init segment")?,
            timescale: timescale.ok_or("no mdhd box in init segment")?,
            trex: trex.ok_or("no trex box in init segment")?,
        })
    }
}

/// Depth-first walk over the box tree. The callback sees every box; known
/// container boxes are descended into, everything else is a leaf. The slice
/// passed to the callback covers the full box including its header.
fn walk(data: &[u8], visit: &mut dyn FnMut(&[u8; 4], &[u8]) -> Result<(), String>) -> Result<(), String> {
    let mut offset = 0;
    while offset < data.len() {
        let (size, btype) = peek_box_header(data, offset)?;
        let body = &data[offset..offset + size];
        visit(&btype, body)?;
        if CONTAINERS.contains(&&btype) {
            walk(&body[8..], visit)?;
        }
        offset += size;
    }
    Ok(())
}

fn parse_tkhd_track_id(body: &[u8]) -> Result<u32, String> {
    let (version, _) = read_version_and_flags(body, 8)?;
    // creation and modification time are 4 bytes each in v0, 8 in v1
    let offset = match version {
        0 => 12 + 8,
        1 => 12 + 16,
        _ => return Err(format!("Unsupported TKHD version: {}", version)),
    };
    read_u32_be(body, offset).map_err(|e| format!("tkhd: {}", e))
}

fn parse_mdhd_timescale(body: &[u8]) -> Result<u32, String> {
    let (version, _) = read_version_and_flags(body, 8)?;
    let offset = match version {
        0 => 12 + 8,
        1 => 12 + 16,
        _ => return Err(format!("Unsupported MDHD version: {}", version)),
    };
    read_u32_be(body, offset).map_err(|e| format!("mdhd: {}", e))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn full_box(btype: &[u8; 4], version: u8, payload: &[u8]) -> Vec<u8> {
        let size = 8 + 4 + payload.len() as u32;
        let mut out = Vec::new();
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(btype);
        out.extend_from_slice(&[version, 0, 0, 0]);
        out.extend_from_slice(payload);
        out
    }

    fn container(btype: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
        let inner: usize = children.iter().map(|c| c.len()).sum();
        let mut out = Vec::new();
        out.extend_from_slice(&((8 + inner) as u32).to_be_bytes());
        out.extend_from_slice(btype);
        for child in children {
            out.extend_from_slice(child);
        }
        out
    }

    /// A minimal single-track init segment for tests: moov(trak(tkhd,
    /// mdia(mdhd)), mvex(trex)).
    pub(crate) fn synthetic_init(track_id: u32, timescale: u32, default_dur: u32) -> Vec<u8> {
        let mut tkhd_payload = Vec::new();
        tkhd_payload.extend_from_slice(&[0u8; 8]); // creation + modification
        tkhd_payload.extend_from_slice(&track_id.to_be_bytes());
        tkhd_payload.extend_from_slice(&[0u8; 4]); // reserved

        let mut mdhd_payload = Vec::new();
        mdhd_payload.extend_from_slice(&[0u8; 8]);
        mdhd_payload.extend_from_slice(&timescale.to_be_bytes());
        mdhd_payload.extend_from_slice(&[0u8; 4]); // duration

        let trex = TrexBox {
            track_id,
            default_sample_duration: default_dur,
            ..Default::default()
        };
        let mut trex_bytes = Vec::new();
        trex.write_box(&mut trex_bytes);

        let mdia = container(b"mdia", &[full_box(b"mdhd", 0, &mdhd_payload)]);
        let trak = container(b"trak", &[full_box(b"tkhd", 0, &tkhd_payload), mdia]);
        let mvex = container(b"mvex", &[trex_bytes]);
        container(b"moov", &[trak, mvex])
    }

    #[test]
    fn parses_synthetic_init_segment() {
        let data = synthetic_init(3, 90000, 3000);
        let init = InitSegment::parse(&data).unwrap();
        assert_eq!(init.track_id, 3);
        assert_eq!(init.timescale, 90000);
        assert_eq!(init.trex.default_sample_duration, 3000);
    }

    #[test]
    fn missing_trex_is_an_error() {
        let mut tkhd_payload = vec![0u8; 8];
        tkhd_payload.extend_from_slice(&1u32.to_be_bytes());
        tkhd_payload.extend_from_slice(&[0u8; 4]);
        let trak = container(b"trak", &[full_box(b"tkhd", 0, &tkhd_payload)]);
        let moov = container(b"moov", &[trak]);
        let err = InitSegment::parse(&moov).unwrap_err();
        assert!(err.contains("mdhd") || err.contains("trex"));
    }
}
