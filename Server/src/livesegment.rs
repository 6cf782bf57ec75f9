//! Live projection of media segments.
//!
//! A media request addresses a segment by number or media time on the live
//! timeline. The locator maps it back onto a VoD segment and the wrap it
//! belongs to, the rewriter re-stamps the fragment headers, and for
//! low-latency configurations the chunker cuts the segment into CMAF
//! chunks that are released as their availability times pass.

use std::fs;
use std::time::Duration;

use bytes::Bytes;
use mp4_box::boxes::styp::StypBox;
use mp4_box::init::InitSegment;
use mp4_box::segment::{Fragment, FullSample, MediaSegment};
use tokio::sync::mpsc;

use crate::asset::{replace_time_and_nr, Asset, RepData, Segment};
use crate::configurl::{LiveMpdType, ResponseConfig, TIME_SHIFT_BUFFER_DEPTH_MARGIN_S};
use crate::errors::LiveSimError;
use crate::types::unix_now_ms;

/// A located segment: the VoD segment it comes from and the live time and
/// number to stamp on it.
#[derive(Debug, Clone, Copy)]
pub struct SegRef<'a> {
    pub rep: &'a RepData,
    pub orig_time: u64,
    pub new_time: u64,
    pub orig_nr: u32,
    pub new_nr: u32,
    /// Segment duration in media ticks.
    pub dur: u64,
    pub timescale: u64,
}

/// The availability window: a segment is available from its end time
/// (minus the availability time offset) until it falls out of the
/// time-shift buffer, with a fixed extra margin.
fn check_availability(
    cfg: &ResponseConfig,
    rep: &RepData,
    seg: &Segment,
    wrap_time: i64,
    now_ms: i64,
) -> Result<(), LiveSimError> {
    let ts = rep.media_timescale as i64;
    let media_ref = cfg.start_time_s * ts;
    let now_rel = now_ms * ts / 1000 - media_ref;

    let mut seg_avail = seg.end_time as i64 + wrap_time;
    let ato = cfg.availability_time_offset_s();
    if ato.is_finite() {
        seg_avail -= (ato * ts as f64) as i64;
        if seg_avail > now_rel {
            return Err(LiveSimError::TooEarly((seg_avail - now_rel) * 1000 / ts));
        }
    }
    if seg_avail < now_rel - (cfg.time_shift_buffer_depth_s + TIME_SHIFT_BUFFER_DEPTH_MARGIN_S) * ts {
        return Err(LiveSimError::Gone);
    }
    Ok(())
}

/// Resolves a media time on the live timeline to a VoD segment. The time
/// must match a segment start exactly.
pub fn find_seg_ref_from_time<'a>(
    asset: &Asset,
    rep: &'a RepData,
    time: u64,
    cfg: &ResponseConfig,
    now_ms: i64,
) -> Result<SegRef<'a>, LiveSimError> {
    let ts = rep.media_timescale as i64;
    let wrap_dur = asset.loop_dur_ms * ts / 1000;
    let nr_wraps = time as i64 / wrap_dur;
    let wrap_time = nr_wraps * wrap_dur;
    let time_after_wrap = time as i64 - wrap_time;

    let idx = rep.find_segment_index_from_time(time_after_wrap as u64);
    if idx == rep.segments.len() {
        return Err(LiveSimError::SegmentNotFound("no matching segment".to_string()));
    }
    let seg = rep.segments[idx];
    if seg.start_time != time_after_wrap as u64 {
        return Err(LiveSimError::SegmentNotFound(format!(
            "segment time mismatch {} <-> {}",
            time_after_wrap, seg.start_time
        )));
    }

    check_availability(cfg, rep, &seg, wrap_time, now_ms)?;

    let start_nr = cfg.start_nr.unwrap_or(1);
    Ok(SegRef {
        rep,
        orig_time: seg.start_time,
        new_time: time,
        orig_nr: seg.nr,
        new_nr: (start_nr + idx as i64 + nr_wraps * rep.segments.len() as i64) as u32,
        dur: seg.dur(),
        timescale: rep.media_timescale,
    })
}

/// Resolves a live segment number to a VoD segment.
pub fn find_seg_ref_from_nr<'a>(
    asset: &Asset,
    rep: &'a RepData,
    nr: u32,
    cfg: &ResponseConfig,
    now_ms: i64,
) -> Result<SegRef<'a>, LiveSimError> {
    let wrap_len = rep.segments.len() as i64;
    let start_nr = cfg.start_nr.unwrap_or(1);
    let nr_wraps = (nr as i64 - start_nr) / wrap_len;
    let rel_nr = (nr as i64 - start_nr) - nr_wraps * wrap_len;
    if rel_nr < 0 {
        return Err(LiveSimError::SegmentNotFound(format!(
            "segment number {} before start number {}",
            nr, start_nr
        )));
    }
    let ts = rep.media_timescale as i64;
    let wrap_dur = asset.loop_dur_ms * ts / 1000;
    let wrap_time = nr_wraps * wrap_dur;
    let seg = rep.segments[rel_nr as usize];

    check_availability(cfg, rep, &seg, wrap_time, now_ms)?;

    Ok(SegRef {
        rep,
        orig_time: seg.start_time,
        new_time: (wrap_time + seg.start_time as i64) as u64,
        orig_nr: seg.nr,
        new_nr: nr,
        dur: seg.dur(),
        timescale: rep.media_timescale,
    })
}

/// Matches a media URL against the representations of an asset, resolves
/// the captured number or time, and reads the backing VoD segment.
pub fn find_media_segment<'a>(
    asset: &'a Asset,
    cfg: &ResponseConfig,
    segment_part: &str,
    now_ms: i64,
) -> Result<(MediaSegment, SegRef<'a>), LiveSimError> {
    for rep in asset.reps.values() {
        let Some(caps) = rep.media_regexp.captures(segment_part) else {
            continue;
        };
        let id_nr = caps[1]
            .parse::<u64>()
            .map_err(|e| LiveSimError::SegmentNotFound(format!("bad segment id: {}", e)))?;

        let seg_ref = match cfg.live_mpd_type() {
            LiveMpdType::SegmentNumber | LiveMpdType::TimelineNumber => {
                find_seg_ref_from_nr(asset, rep, id_nr as u32, cfg, now_ms)?
            }
            LiveMpdType::TimelineTime => find_seg_ref_from_time(asset, rep, id_nr, cfg, now_ms)?,
        };

        let rel_path = replace_time_and_nr(&rep.media_uri, seg_ref.orig_time, seg_ref.orig_nr);
        let data = fs::read(asset.asset_dir.join(rel_path))?;
        let seg = MediaSegment::parse(&data).map_err(LiveSimError::Mp4)?;
        return Ok((seg, seg_ref));
    }
    Err(LiveSimError::NotFound)
}

/// Shifts every fragment of the segment onto the live timeline: the new
/// sequence number goes into `mfhd`, and all decode times move by the
/// difference between the live time and the first fragment's base time.
pub fn rewrite_segment(seg: &mut MediaSegment, new_nr: u32, new_time: u64) -> Result<(), LiveSimError> {
    let first_base = seg.fragments[0]
        .base_media_decode_time()
        .map_err(LiveSimError::Mp4)?;
    let time_shift = new_time as i64 - first_base as i64;
    for frag in &mut seg.fragments {
        frag.moof.mfhd.sequence_number = new_nr;
        for traf in &mut frag.moof.trafs {
            if let Some(tfdt) = traf.tfdt.as_mut() {
                tfdt.base_media_decode_time =
                    (tfdt.base_media_decode_time as i64 + time_shift) as u64;
            }
        }
    }
    Ok(())
}

/// Produces a complete rewritten segment for a single-shot response.
pub fn live_segment(
    asset: &Asset,
    cfg: &ResponseConfig,
    segment_part: &str,
    now_ms: i64,
) -> Result<Vec<u8>, LiveSimError> {
    let (mut seg, seg_ref) = find_media_segment(asset, cfg, segment_part, now_ms)?;
    rewrite_segment(&mut seg, seg_ref.new_nr, seg_ref.new_time)?;
    Ok(seg.encode())
}

/// One CMAF chunk of a segment. Only the first chunk of a segment carries
/// the source styp box.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub styp: Option<StypBox>,
    pub frag: Fragment,
    /// Media duration of the chunk in timescale ticks.
    pub dur: u64,
}

impl Chunk {
    pub fn encode(&self) -> Vec<u8> {
        use mp4_box::boxes::generic::Mp4Box;
        let mut out = Vec::new();
        if let Some(ref styp) = self.styp {
            styp.write_box(&mut out);
        }
        self.frag.encode_into(&mut out);
        out
    }
}

/// Cuts a located segment into chunks of `chunk_dur` ticks. Samples are
/// expanded against the init-segment defaults, re-stamped onto the live
/// timeline, and regrouped into self-contained fragments. The tail chunk
/// keeps the nominal chunk duration.
pub fn chunk_segment(
    init: &InitSegment,
    seg: &MediaSegment,
    seg_ref: &SegRef,
    chunk_dur: i64,
) -> Result<Vec<Chunk>, LiveSimError> {
    let mut samples: Vec<FullSample> = Vec::new();
    for frag in &seg.fragments {
        samples.extend(frag.full_samples(&init.trex).map_err(LiveSimError::Mp4)?);
    }

    let mut chunks = Vec::new();
    let mut pending: Vec<FullSample> = Vec::new();
    let mut styp = seg.styp.clone();
    let mut chunk_nr: i64 = 1;
    let mut this_chunk_dur: u64 = 0;
    let mut total_dur: i64 = 0;
    let mut decode_time = seg_ref.new_time;

    for mut sample in samples {
        sample.decode_time = decode_time;
        decode_time += sample.dur as u64;
        this_chunk_dur += sample.dur as u64;
        total_dur += sample.dur as i64;
        pending.push(sample);
        if total_dur >= chunk_dur * chunk_nr {
            let frag = Fragment::from_samples(init.track_id, seg_ref.new_nr, &pending)
                .map_err(LiveSimError::Mp4)?;
            chunks.push(Chunk {
                styp: styp.take(),
                frag,
                dur: this_chunk_dur,
            });
            pending.clear();
            this_chunk_dur = 0;
            chunk_nr += 1;
        }
    }
    if !pending.is_empty() {
        let frag = Fragment::from_samples(init.track_id, seg_ref.new_nr, &pending)
            .map_err(LiveSimError::Mp4)?;
        chunks.push(Chunk {
            styp: styp.take(),
            frag,
            dur: chunk_dur as u64,
        });
    }

    Ok(chunks)
}

/// Timing facts a pacing task needs once the request handler has located
/// and chunked the segment.
#[derive(Debug, Clone, Copy)]
pub struct ChunkTiming {
    pub timescale: i64,
    pub new_time: u64,
    pub start_time_s: i64,
    /// The simulated "now" captured at request entry.
    pub now_ms: i64,
}

/// Emits chunks into the response channel, each no earlier than its
/// availability time on the simulated clock. A closed channel means the
/// client went away; the transmitter stops at once and holds nothing
/// across its sleeps but the remaining chunks.
pub async fn send_chunks(
    tx: mpsc::Sender<Bytes>,
    chunks: Vec<Chunk>,
    timing: ChunkTiming,
) -> Result<(), LiveSimError> {
    let start_unix_ms = unix_now_ms();
    let mut chunk_avail_time = timing.new_time as i64 + timing.start_time_s * timing.timescale;
    for chunk in chunks {
        chunk_avail_time += chunk.dur as i64;
        let chunk_avail_ms = chunk_avail_time * 1000 / timing.timescale;
        if chunk_avail_ms >= timing.now_ms {
            let now_update_ms = unix_now_ms() - start_unix_ms + timing.now_ms;
            if chunk_avail_ms > now_update_ms {
                tokio::time::sleep(Duration::from_millis((chunk_avail_ms - now_update_ms) as u64)).await;
            }
        }
        let bytes = Bytes::from(chunk.encode());
        if tx.send(bytes).await.is_err() {
            return Err(LiveSimError::ClientGone);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::test_support::{asset_8s, TEST_TIMESCALE};
    use mp4_box::boxes::trex::TrexBox;

    fn cfg_with(f: impl FnOnce(&mut ResponseConfig)) -> ResponseConfig {
        let mut cfg = ResponseConfig::default();
        f(&mut cfg);
        cfg
    }

    fn sample(dur: u32, byte: u8) -> FullSample {
        FullSample {
            decode_time: 0,
            dur,
            size: 32,
            flags: 0x02000000,
            cts_offset: 0,
            data: vec![byte; 32],
        }
    }

    /// A 2 s segment of eight 0.25 s samples starting at `start_time`.
    fn synthetic_segment(start_time: u64, nr: u32) -> MediaSegment {
        let mut samples: Vec<FullSample> = (0..8).map(|i| sample(22_500, i as u8)).collect();
        let mut t = start_time;
        for s in &mut samples {
            s.decode_time = t;
            t += s.dur as u64;
        }
        MediaSegment {
            styp: Some(StypBox::default()),
            others: Vec::new(),
            fragments: vec![Fragment::from_samples(1, nr, &samples).unwrap()],
        }
    }

    #[test]
    fn number_and_time_lookup_agree() {
        let asset = asset_8s();
        let rep = asset.reps.get("V300").unwrap();
        let cfg = ResponseConfig::default();
        let now_ms = 14_000;

        // Segment 6 is the second segment of the second loop pass.
        let by_nr = find_seg_ref_from_nr(&asset, rep, 6, &cfg, now_ms).unwrap();
        assert_eq!(by_nr.new_time, 10 * TEST_TIMESCALE);
        assert_eq!(by_nr.orig_nr, 2);
        assert_eq!(by_nr.orig_time, 2 * TEST_TIMESCALE);

        let by_time = find_seg_ref_from_time(&asset, rep, by_nr.new_time, &cfg, now_ms).unwrap();
        assert_eq!(by_time.new_nr, by_nr.new_nr);
        assert_eq!(by_time.new_time, by_nr.new_time);
        assert_eq!(by_time.orig_nr, by_nr.orig_nr);
        assert_eq!(by_time.orig_time, by_nr.orig_time);
    }

    #[test]
    fn lookup_in_first_loop_is_identity() {
        let asset = asset_8s();
        let rep = asset.reps.get("V300").unwrap();
        let cfg = ResponseConfig::default();
        let seg_ref = find_seg_ref_from_nr(&asset, rep, 3, &cfg, 8_000).unwrap();
        assert_eq!(seg_ref.new_time, seg_ref.orig_time);
        assert_eq!(seg_ref.new_nr, seg_ref.orig_nr);
    }

    #[test]
    fn mismatched_time_is_rejected() {
        let asset = asset_8s();
        let rep = asset.reps.get("V300").unwrap();
        let cfg = ResponseConfig::default();
        let err = find_seg_ref_from_time(&asset, rep, 1000, &cfg, 8_000).unwrap_err();
        assert_eq!(err.to_string(), "segment time mismatch 1000 <-> 180000");
    }

    #[test]
    fn request_ahead_of_live_edge_is_too_early() {
        let asset = asset_8s();
        let rep = asset.reps.get("V300").unwrap();
        let cfg = ResponseConfig::default();
        // Segment 5 becomes available at 10 s; asking at 9.5 s misses by 500 ms.
        let err = find_seg_ref_from_nr(&asset, rep, 5, &cfg, 9_500).unwrap_err();
        match err {
            LiveSimError::TooEarly(retry_ms) => assert_eq!(retry_ms, 500),
            other => panic!("expected TooEarly, got {:?}", other),
        }
    }

    #[test]
    fn availability_offset_moves_the_edge() {
        let asset = asset_8s();
        let rep = asset.reps.get("V300").unwrap();
        let cfg = cfg_with(|c| c.availability_time_offset_s = Some(0.5));
        assert!(find_seg_ref_from_nr(&asset, rep, 5, &cfg, 9_500).is_ok());
    }

    #[test]
    fn segment_behind_the_buffer_is_gone() {
        let asset = asset_8s();
        let rep = asset.reps.get("V300").unwrap();
        let cfg = cfg_with(|c| c.time_shift_buffer_depth_s = 10);
        let err = find_seg_ref_from_nr(&asset, rep, 1, &cfg, 100_000).unwrap_err();
        assert!(matches!(err, LiveSimError::Gone));
    }

    #[test]
    fn availability_is_monotonic_in_now() {
        let asset = asset_8s();
        let rep = asset.reps.get("V300").unwrap();
        let cfg = cfg_with(|c| c.time_shift_buffer_depth_s = 10);
        let mut previously_available: Vec<u32> = Vec::new();
        for now_ms in (2_000..40_000).step_by(2_000) {
            let available: Vec<u32> = (1..=20)
                .filter(|nr| find_seg_ref_from_nr(&asset, rep, *nr, &cfg, now_ms).is_ok())
                .collect();
            // Everything newly dropped must be at the old end, everything
            // newly added at the live edge: the set is a moving suffix.
            for nr in &previously_available {
                assert!(
                    available.contains(nr)
                        || available.first().map_or(true, |first| nr < first)
                );
            }
            previously_available = available;
        }
    }

    #[test]
    fn rewrite_with_identical_target_is_byte_identical() {
        let seg = synthetic_segment(2 * TEST_TIMESCALE, 2);
        let original = seg.encode();
        let mut reparsed = MediaSegment::parse(&original).unwrap();
        rewrite_segment(&mut reparsed, 2, 2 * TEST_TIMESCALE).unwrap();
        assert_eq!(reparsed.encode(), original);
    }

    #[test]
    fn rewrite_shifts_decode_time_and_number() {
        let mut seg = synthetic_segment(2 * TEST_TIMESCALE, 2);
        rewrite_segment(&mut seg, 6, 10 * TEST_TIMESCALE).unwrap();
        assert_eq!(seg.fragments[0].moof.mfhd.sequence_number, 6);
        assert_eq!(
            seg.fragments[0].base_media_decode_time().unwrap(),
            10 * TEST_TIMESCALE
        );
    }

    #[test]
    fn chunking_splits_by_duration_and_keeps_styp_first() {
        let asset = asset_8s();
        let rep = asset.reps.get("V300").unwrap();
        let init = InitSegment {
            track_id: 1,
            timescale: TEST_TIMESCALE as u32,
            trex: TrexBox::default(),
        };
        let seg = synthetic_segment(0, 1);
        let seg_ref = SegRef {
            rep,
            orig_time: 0,
            new_time: 8 * TEST_TIMESCALE,
            orig_nr: 1,
            new_nr: 5,
            dur: 2 * TEST_TIMESCALE,
            timescale: TEST_TIMESCALE,
        };

        // ato 1.5 s on a 2 s segment leaves 0.5 s chunks.
        let chunk_dur = (2000 - 1500) * TEST_TIMESCALE as i64 / 1000;
        let chunks = chunk_segment(&init, &seg, &seg_ref, chunk_dur).unwrap();
        assert_eq!(chunks.len(), 4);
        assert!(chunks[0].styp.is_some());
        assert!(chunks[1..].iter().all(|c| c.styp.is_none()));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.dur, chunk_dur as u64);
            assert_eq!(chunk.frag.moof.mfhd.sequence_number, 5);
            assert_eq!(
                chunk.frag.base_media_decode_time().unwrap(),
                8 * TEST_TIMESCALE + i as u64 * chunk_dur as u64
            );
        }
    }

    #[tokio::test]
    async fn chunk_transmitter_stops_on_client_disconnect() {
        let asset = asset_8s();
        let rep = asset.reps.get("V300").unwrap();
        let init = InitSegment {
            track_id: 1,
            timescale: TEST_TIMESCALE as u32,
            trex: TrexBox::default(),
        };
        let seg = synthetic_segment(0, 1);
        let seg_ref = SegRef {
            rep,
            orig_time: 0,
            new_time: 0,
            orig_nr: 1,
            new_nr: 1,
            dur: 2 * TEST_TIMESCALE,
            timescale: TEST_TIMESCALE,
        };
        let chunk_dur = 500 * TEST_TIMESCALE as i64 / 1000;
        let chunks = chunk_segment(&init, &seg, &seg_ref, chunk_dur).unwrap();

        let (tx, mut rx) = mpsc::channel::<Bytes>(1);
        let timing = ChunkTiming {
            timescale: TEST_TIMESCALE as i64,
            new_time: 0,
            start_time_s: 0,
            // All chunks are already available: no sleeping involved.
            now_ms: 10_000,
        };
        let task = tokio::spawn(send_chunks(tx, chunks, timing));
        let first = rx.recv().await.unwrap();
        assert!(!first.is_empty());
        drop(rx);

        let result = task.await.unwrap();
        assert!(matches!(result, Err(LiveSimError::ClientGone)));
    }

    #[tokio::test]
    async fn available_chunks_flush_without_waiting() {
        let asset = asset_8s();
        let rep = asset.reps.get("V300").unwrap();
        let init = InitSegment {
            track_id: 1,
            timescale: TEST_TIMESCALE as u32,
            trex: TrexBox::default(),
        };
        let seg = synthetic_segment(0, 1);
        let seg_ref = SegRef {
            rep,
            orig_time: 0,
            new_time: 0,
            orig_nr: 1,
            new_nr: 1,
            dur: 2 * TEST_TIMESCALE,
            timescale: TEST_TIMESCALE,
        };
        let chunk_dur = 500 * TEST_TIMESCALE as i64 / 1000;
        let chunks = chunk_segment(&init, &seg, &seg_ref, chunk_dur).unwrap();
        let n = chunks.len();

        let (tx, mut rx) = mpsc::channel::<Bytes>(8);
        let timing = ChunkTiming {
            timescale: TEST_TIMESCALE as i64,
            new_time: 0,
            start_time_s: 0,
            now_ms: 10_000,
        };
        send_chunks(tx, chunks, timing).await.unwrap();
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, n);
    }
}
