//! Media-segment model: an optional `styp`, optional opaque prefix boxes
//! (`sidx`, `prft`, ...), then one or more `moof`/`mdat` fragments.
//!
//! Fragments can be expanded into full samples against the `trex` defaults
//! and rebuilt from a sample list, which is what low-latency chunking does:
//! take the samples of a whole segment, cut them into chunk-sized runs, and
//! emit each run as a self-contained fragment.

use crate::boxes::generic::{Mp4Box, UnknownBox};
use crate::boxes::mdat::MdatBox;
use crate::boxes::mfhd::MfhdBox;
use crate::boxes::moof::MoofBox;
use crate::boxes::styp::StypBox;
use crate::boxes::tfdt::TfdtBox;
use crate::boxes::tfhd::{TfhdBox, TFHD_DEFAULT_BASE_IS_MOOF};
use crate::boxes::traf::TrafBox;
use crate::boxes::trex::TrexBox;
use crate::boxes::trun::{
    TrunBox, TrunSample, TRUN_DATA_OFFSET_PRESENT, TRUN_SAMPLE_CTS_OFFSET_PRESENT,
    TRUN_SAMPLE_DURATION_PRESENT, TRUN_SAMPLE_FLAGS_PRESENT, TRUN_SAMPLE_SIZE_PRESENT,
};
use crate::{format_fourcc, peek_box_header};

/// A sample with every field resolved against fragment and track defaults,
/// carrying its own media bytes.
#[derive(Debug, Clone)]
pub struct FullSample {
    pub decode_time: u64,
    pub dur: u32,
    pub size: u32,
    pub flags: u32,
    pub cts_offset: i32,
    pub data: Vec<u8>,
}

/// One `moof`/`mdat` pair.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub moof: MoofBox,
    pub mdat: MdatBox,
}

impl Fragment {
    pub fn size(&self) -> usize {
        (self.moof.box_size() + self.mdat.box_size()) as usize
    }

    pub fn encode_into(&self, buffer: &mut Vec<u8>) {
        self.moof.write_box(buffer);
        self.mdat.write_box(buffer);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        self.encode_into(&mut out);
        out
    }

    /// The base media decode time of the fragment's (single) track fragment.
    pub fn base_media_decode_time(&self) -> Result<u64, String> {
        let traf = self.single_traf()?;
        traf.tfdt
            .as_ref()
            .map(|tfdt| tfdt.base_media_decode_time)
            .ok_or_else(|| "fragment without tfdt box".to_string())
    }

    fn single_traf(&self) -> Result<&TrafBox, String> {
        match self.moof.trafs.len() {
            1 => Ok(&self.moof.trafs[0]),
            n => Err(format!("fragment has {} traf boxes, expected 1", n)),
        }
    }

    /// Expands the track run into full samples, resolving durations, sizes
    /// and flags through tfhd and then the `trex` defaults, and slicing the
    /// sample bytes out of `mdat`.
    pub fn full_samples(&self, trex: &TrexBox) -> Result<Vec<FullSample>, String> {
        let traf = self.single_traf()?;
        let trun = traf.trun.as_ref().ok_or("fragment without trun box")?;
        let mut decode_time = self
            .base_media_decode_time()
            .map_err(|e| format!("full_samples: {}", e))?;

        // With default-base-is-moof the run's data offset is relative to the
        // start of moof; the mdat payload begins right after moof + header.
        let data_offset = trun
            .data_offset
            .ok_or("trun without data offset")? as i64;
        let mut pos = data_offset - self.moof.box_size() as i64 - 8;
        if pos < 0 {
            return Err(format!("trun data offset {} points before mdat", data_offset));
        }

        let mut samples = Vec::with_capacity(trun.samples.len());
        for (i, row) in trun.samples.iter().enumerate() {
            let dur = row
                .dur
                .or(traf.tfhd.default_sample_duration)
                .unwrap_or(trex.default_sample_duration);
            let size = row
                .size
                .or(traf.tfhd.default_sample_size)
                .unwrap_or(trex.default_sample_size);
            let flags = row
                .flags
                .or(if i == 0 { trun.first_sample_flags } else { None })
                .or(traf.tfhd.default_sample_flags)
                .unwrap_or(trex.default_sample_flags);
            let start = pos as usize;
            let end = start + size as usize;
            if end > self.mdat.data.len() {
                return Err(format!(
                    "sample {} runs past mdat: {}..{} of {}",
                    i,
                    start,
                    end,
                    self.mdat.data.len()
                ));
            }
            samples.push(FullSample {
                decode_time,
                dur,
                size,
                flags,
                cts_offset: row.cts_offset.unwrap_or(0),
                data: self.mdat.data[start..end].to_vec(),
            });
            decode_time += dur as u64;
            pos += size as i64;
        }
        Ok(samples)
    }

    /// Builds a self-contained single-trun fragment from explicit samples.
    /// The first sample's decode time becomes the fragment's tfdt base.
    pub fn from_samples(track_id: u32, sequence_number: u32, samples: &[FullSample]) -> Result<Fragment, String> {
        let first = samples.first().ok_or("cannot build a fragment from 0 samples")?;

        let any_cts = samples.iter().any(|s| s.cts_offset != 0);
        let mut trun_flags =
            TRUN_DATA_OFFSET_PRESENT | TRUN_SAMPLE_DURATION_PRESENT | TRUN_SAMPLE_SIZE_PRESENT | TRUN_SAMPLE_FLAGS_PRESENT;
        if any_cts {
            trun_flags |= TRUN_SAMPLE_CTS_OFFSET_PRESENT;
        }
        let trun = TrunBox {
            version: if samples.iter().any(|s| s.cts_offset < 0) { 1 } else { 0 },
            flags: trun_flags,
            data_offset: Some(0),
            first_sample_flags: None,
            samples: samples
                .iter()
                .map(|s| TrunSample {
                    dur: Some(s.dur),
                    size: Some(s.size),
                    flags: Some(s.flags),
                    cts_offset: if any_cts { Some(s.cts_offset) } else { None },
                })
                .collect(),
        };

        let traf = TrafBox {
            tfhd: TfhdBox {
                flags: TFHD_DEFAULT_BASE_IS_MOOF,
                track_id,
                ..Default::default()
            },
            tfdt: Some(TfdtBox {
                version: 1,
                flags: 0,
                base_media_decode_time: first.decode_time,
            }),
            trun: Some(trun),
            others: Vec::new(),
        };

        let mut moof = MoofBox {
            mfhd: MfhdBox {
                sequence_number,
                ..Default::default()
            },
            trafs: vec![traf],
        };

        let mut mdat_data = Vec::with_capacity(samples.iter().map(|s| s.data.len()).sum());
        for sample in samples {
            mdat_data.extend_from_slice(&sample.data);
        }

        // The data offset depends only on the moof size, which is already
        // final; fill it in now that the box tree is complete.
        let data_offset = moof.box_size() as i32 + 8;
        moof.trafs[0].trun.as_mut().unwrap().data_offset = Some(data_offset);

        Ok(Fragment {
            moof,
            mdat: MdatBox { data: mdat_data },
        })
    }
}

/// A parsed CMAF media segment.
#[derive(Debug, Clone, Default)]
pub struct MediaSegment {
    pub styp: Option<StypBox>,
    /// Opaque boxes between styp and the first fragment (sidx, prft, ...),
    /// preserved in order.
    pub others: Vec<UnknownBox>,
    pub fragments: Vec<Fragment>,
}

impl MediaSegment {
    /// Parses a segment with the strict CMAF shape: optional `styp` and
    /// opaque prefix boxes, then strictly alternating `moof`/`mdat` pairs.
    pub fn parse(data: &[u8]) -> Result<MediaSegment, String> {
        let mut seg = MediaSegment::default();
        let mut pending_moof: Option<MoofBox> = None;
        let mut offset = 0;

        while offset < data.len() {
            let (size, btype) = peek_box_header(data, offset)?;
            let body = &data[offset..offset + size];
            match &btype {
                b"styp" => {
                    if seg.styp.is_some() || !seg.fragments.is_empty() || pending_moof.is_some() {
                        return Err("unexpected styp box".into());
                    }
                    let (styp, _) = StypBox::read_box(body)?;
                    seg.styp = Some(styp);
                }
                b"moof" => {
                    if pending_moof.is_some() {
                        return Err("moof box without following mdat".into());
                    }
                    let (moof, _) = MoofBox::read_box(body)?;
                    pending_moof = Some(moof);
                }
                b"mdat" => {
                    let moof = pending_moof
                        .take()
                        .ok_or_else(|| "mdat box without preceding moof".to_string())?;
                    let (mdat, _) = MdatBox::read_box(body)?;
                    seg.fragments.push(Fragment { moof, mdat });
                }
                _ => {
                    if !seg.fragments.is_empty() || pending_moof.is_some() {
                        return Err(format!(
                            "unexpected {} box between fragments",
                            format_fourcc(&btype)
                        ));
                    }
                    let (other, _) = UnknownBox::read_box(body)?;
                    seg.others.push(other);
                }
            }
            offset += size;
        }

        if pending_moof.is_some() {
            return Err("moof box without following mdat".into());
        }
        if seg.fragments.is_empty() {
            return Err("no fragments in media segment".into());
        }
        Ok(seg)
    }

    pub fn size(&self) -> usize {
        let mut size = self.styp.as_ref().map_or(0, |s| s.box_size() as usize);
        size += self.others.iter().map(|b| b.box_size() as usize).sum::<usize>();
        size + self.fragments.iter().map(|f| f.size()).sum::<usize>()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        if let Some(ref styp) = self.styp {
            styp.write_box(&mut out);
        }
        for other in &self.others {
            other.write_box(&mut out);
        }
        for fragment in &self.fragments {
            fragment.encode_into(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn sample(decode_time: u64, dur: u32, byte: u8, len: usize) -> FullSample {
        FullSample {
            decode_time,
            dur,
            size: len as u32,
            flags: 0x02000000,
            cts_offset: 0,
            data: vec![byte; len],
        }
    }

    fn segment_with_two_fragments() -> MediaSegment {
        let frag1 = Fragment::from_samples(
            1,
            7,
            &[sample(0, 3000, 0xAA, 16), sample(3000, 3000, 0xBB, 24)],
        )
        .unwrap();
        let frag2 = Fragment::from_samples(1, 7, &[sample(6000, 3000, 0xCC, 8)]).unwrap();
        MediaSegment {
            styp: Some(StypBox::default()),
            others: Vec::new(),
            fragments: vec![frag1, frag2],
        }
    }

    #[test]
    fn encode_parse_round_trip_is_byte_identical() {
        let seg = segment_with_two_fragments();
        let bytes = seg.encode();
        assert_eq!(bytes.len(), seg.size());

        let parsed = MediaSegment::parse(&bytes).unwrap();
        assert_eq!(parsed.fragments.len(), 2);
        assert_eq!(parsed.encode(), bytes);
    }

    #[test]
    fn full_samples_resolve_against_trun_rows() {
        let seg = segment_with_two_fragments();
        let trex = TrexBox::default();
        let samples = seg.fragments[0].full_samples(&trex).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].decode_time, 0);
        assert_eq!(samples[1].decode_time, 3000);
        assert_eq!(samples[1].data, vec![0xBB; 24]);
    }

    #[test]
    fn full_samples_fall_back_to_trex_defaults() {
        // A trun with only sizes: durations must come from trex.
        let mut frag = Fragment::from_samples(1, 1, &[sample(1000, 0, 0x11, 4)]).unwrap();
        let trun = frag.moof.trafs[0].trun.as_mut().unwrap();
        trun.flags = TRUN_DATA_OFFSET_PRESENT | TRUN_SAMPLE_SIZE_PRESENT;
        for row in &mut trun.samples {
            row.dur = None;
            row.flags = None;
        }
        // Flag change shrinks the trun, so the mdat moved closer to moof.
        let data_offset = frag.moof.box_size() as i32 + 8;
        frag.moof.trafs[0].trun.as_mut().unwrap().data_offset = Some(data_offset);

        let trex = TrexBox {
            default_sample_duration: 1234,
            ..Default::default()
        };
        let samples = frag.full_samples(&trex).unwrap();
        assert_eq!(samples[0].dur, 1234);
    }

    #[test]
    fn mdat_before_moof_is_rejected() {
        let mdat = MdatBox { data: vec![1, 2, 3] };
        let mut bytes = Vec::new();
        mdat.write_box(&mut bytes);
        let err = MediaSegment::parse(&bytes).unwrap_err();
        assert!(err.contains("mdat box without preceding moof"));
    }
}
