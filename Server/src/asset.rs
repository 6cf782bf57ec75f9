//! VoD asset store.
//!
//! Assets are loaded once at startup and are immutable afterwards: every
//! directory under the VoD root that contains `.mpd` files becomes an
//! asset. For each representation the store keeps the init-segment bytes,
//! the track facts parsed from them, and one record per VoD segment with
//! media-accurate start/end times, so the per-request projection is pure
//! integer arithmetic over in-memory data.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use dash_manifest::parser::parse_mpd;
use dash_manifest::{Mpd, S, SegmentTemplate};
use mp4_box::init::InitSegment;
use mp4_box::segment::MediaSegment;
use regex::Regex;
use tracing::info;

use crate::errors::LiveSimError;
use crate::livempd::WrapTimes;

/// One VoD segment of a representation. Times are media-timescale ticks
/// within the loop; `nr` is the 1-based number within the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start_time: u64,
    pub end_time: u64,
    pub nr: u32,
}

impl Segment {
    pub fn dur(&self) -> u64 {
        self.end_time - self.start_time
    }
}

/// The youngest segment reachable in the current live window.
#[derive(Debug, Clone, Copy)]
pub struct LastSegInfo {
    pub timescale: u64,
    /// Start in ticks on the live timeline (wraps included).
    pub start_time: u64,
    pub dur: u64,
    /// Absolute live segment number, -1 when the window is empty.
    pub nr: i64,
}

impl LastSegInfo {
    /// Availability of the segment in seconds relative to the availability
    /// start time, i.e. its end time minus the availability time offset.
    pub fn availability_time_s(&self, ato_s: f64) -> f64 {
        (self.start_time + self.dur) as f64 / self.timescale as f64 - ato_s
    }
}

#[derive(Debug)]
pub struct RepData {
    pub id: String,
    pub content_type: String,
    pub media_timescale: u64,
    pub init_uri: String,
    pub media_uri: String,
    pub media_regexp: Regex,
    pub init_bytes: Vec<u8>,
    pub init_seg: InitSegment,
    pub segments: Vec<Segment>,
}

impl RepData {
    /// Total media duration of one loop in ticks.
    pub fn total_duration(&self) -> u64 {
        self.segments.last().map_or(0, |s| s.end_time)
    }

    /// Index of the first segment with `start_time >= t`.
    pub fn find_segment_index_from_time(&self, t: u64) -> usize {
        self.segments.partition_point(|seg| seg.start_time < t)
    }
}

#[derive(Debug)]
pub struct Asset {
    /// Relative path under the VoD root, "" for the root itself.
    pub asset_path: String,
    pub asset_dir: PathBuf,
    pub loop_dur_ms: i64,
    /// Nominal segment duration, loop duration / segment count.
    pub segment_dur_ms: i64,
    pub reps: BTreeMap<String, RepData>,
    mpds: BTreeMap<String, Mpd>,
}

/// Substitutes `$Time$` and `$Number$` in a media template.
pub fn replace_time_and_nr(template: &str, time: u64, nr: u32) -> String {
    template
        .replace("$Time$", &time.to_string())
        .replace("$Number$", &nr.to_string())
}

fn media_regexp(template: &str) -> Result<Regex, LiveSimError> {
    let pattern = regex::escape(template)
        .replace(r"\$Number\$", r"(\d+)")
        .replace(r"\$Time\$", r"(\d+)");
    Regex::new(&format!("^{}$", pattern))
        .map_err(|e| LiveSimError::Manifest(format!("bad media template {:?}: {}", template, e)))
}

impl Asset {
    fn new(asset_path: String, asset_dir: PathBuf) -> Self {
        Asset {
            asset_path,
            asset_dir,
            loop_dur_ms: 0,
            segment_dur_ms: 0,
            reps: BTreeMap::new(),
            mpds: BTreeMap::new(),
        }
    }

    /// A deep copy of one of the asset's VoD manifests.
    pub fn vod_mpd(&self, mpd_name: &str) -> Option<Mpd> {
        self.mpds.get(mpd_name).cloned()
    }

    pub fn mpd_names(&self) -> impl Iterator<Item = &str> {
        self.mpds.keys().map(|k| k.as_str())
    }

    /// The representation whose init segment matches `segment_part`.
    pub fn find_init(&self, segment_part: &str) -> Option<&RepData> {
        self.reps.values().find(|rep| rep.init_uri == segment_part)
    }

    fn load_mpd(&mut self, mpd_name: &str) -> Result<(), LiveSimError> {
        let xml = fs::read_to_string(self.asset_dir.join(mpd_name))?;
        let mpd = parse_mpd(&xml)
            .map_err(|e| LiveSimError::Manifest(format!("{}: {}", mpd_name, e)))?;

        let period = mpd
            .periods
            .first()
            .ok_or_else(|| LiveSimError::Manifest(format!("{}: no period", mpd_name)))?;
        for set in &period.adaptation_sets {
            for rep in &set.representations {
                if self.reps.contains_key(&rep.id) {
                    continue;
                }
                let template = rep
                    .segment_template
                    .as_ref()
                    .or(set.segment_template.as_ref())
                    .ok_or_else(|| {
                        LiveSimError::Manifest(format!(
                            "representation {} has no SegmentTemplate",
                            rep.id
                        ))
                    })?;
                let content_type = set
                    .content_type
                    .clone()
                    .or_else(|| set.mime_type.as_ref().map(|m| m.split('/').next().unwrap_or("").to_string()))
                    .unwrap_or_default();
                let rep_data = self.load_representation(&rep.id, &content_type, template)?;
                self.reps.insert(rep.id.clone(), rep_data);
            }
        }

        self.mpds.insert(mpd_name.to_string(), mpd);
        Ok(())
    }

    fn load_representation(
        &self,
        rep_id: &str,
        content_type: &str,
        template: &SegmentTemplate,
    ) -> Result<RepData, LiveSimError> {
        let init_uri = template
            .initialization
            .as_deref()
            .ok_or_else(|| LiveSimError::Manifest(format!("{}: no initialization template", rep_id)))?
            .replace("$RepresentationID$", rep_id);
        let media_uri = template
            .media
            .as_deref()
            .ok_or_else(|| LiveSimError::Manifest(format!("{}: no media template", rep_id)))?
            .replace("$RepresentationID$", rep_id);

        let init_bytes = fs::read(self.asset_dir.join(&init_uri))?;
        let init_seg = InitSegment::parse(&init_bytes)
            .map_err(|e| LiveSimError::Mp4(format!("{}: {}", init_uri, e)))?;
        let media_timescale = match template.timescale {
            Some(ts) => ts as u64,
            None => init_seg.timescale as u64,
        };

        let segments = match template.segment_timeline {
            Some(ref timeline) => {
                let mut segments = Vec::new();
                let mut t = 0u64;
                let mut nr = template.start_number.unwrap_or(1);
                for entry in &timeline.entries {
                    if entry.r < 0 {
                        return Err(LiveSimError::Manifest(format!(
                            "{}: open-ended repeat in VoD timeline",
                            rep_id
                        )));
                    }
                    if let Some(start) = entry.t {
                        t = start;
                    }
                    for _ in 0..=entry.r {
                        segments.push(Segment {
                            start_time: t,
                            end_time: t + entry.d,
                            nr,
                        });
                        t += entry.d;
                        nr += 1;
                    }
                }
                segments
            }
            None => self.probe_segments(rep_id, &media_uri, template, &init_seg)?,
        };

        if segments.is_empty() {
            return Err(LiveSimError::Manifest(format!("{}: no segments", rep_id)));
        }
        for pair in segments.windows(2) {
            if pair[0].end_time != pair[1].start_time {
                return Err(LiveSimError::Manifest(format!(
                    "{}: segments {} and {} are not contiguous",
                    rep_id, pair[0].nr, pair[1].nr
                )));
            }
        }

        Ok(RepData {
            id: rep_id.to_string(),
            content_type: content_type.to_string(),
            media_timescale,
            media_regexp: media_regexp(&media_uri)?,
            init_uri,
            media_uri,
            init_bytes,
            init_seg,
            segments,
        })
    }

    /// Walks `$Number$`-addressed segment files and takes their exact times
    /// from the fragment headers.
    fn probe_segments(
        &self,
        rep_id: &str,
        media_uri: &str,
        template: &SegmentTemplate,
        init_seg: &InitSegment,
    ) -> Result<Vec<Segment>, LiveSimError> {
        if media_uri.contains("$Time$") {
            return Err(LiveSimError::Manifest(format!(
                "{}: $Time$ addressing requires a SegmentTimeline",
                rep_id
            )));
        }
        let mut segments = Vec::new();
        let mut nr = template.start_number.unwrap_or(1);
        let mut expected_start = 0u64;
        loop {
            let path = self.asset_dir.join(replace_time_and_nr(media_uri, expected_start, nr));
            if !path.exists() {
                break;
            }
            let data = fs::read(&path)?;
            let seg = MediaSegment::parse(&data)
                .map_err(|e| LiveSimError::Mp4(format!("{}: {}", path.display(), e)))?;
            let start_time = seg.fragments[0]
                .base_media_decode_time()
                .map_err(LiveSimError::Mp4)?;
            let mut dur = 0u64;
            for frag in &seg.fragments {
                for sample in frag.full_samples(&init_seg.trex).map_err(LiveSimError::Mp4)? {
                    dur += sample.dur as u64;
                }
            }
            segments.push(Segment {
                start_time,
                end_time: start_time + dur,
                nr,
            });
            expected_start = start_time + dur;
            nr += 1;
            if segments.len() > 100_000 {
                return Err(LiveSimError::Manifest(format!("{}: too many segments", rep_id)));
            }
        }
        Ok(segments)
    }

    fn finalize(&mut self) -> Result<(), LiveSimError> {
        let mut loop_dur_ms: Option<i64> = None;
        for rep in self.reps.values() {
            let total = rep.total_duration() as i64;
            let rep_loop_ms = total * 1000 / rep.media_timescale as i64;
            match loop_dur_ms {
                None => loop_dur_ms = Some(rep_loop_ms),
                Some(existing) if existing != rep_loop_ms => {
                    return Err(LiveSimError::Manifest(format!(
                        "asset {:?}: representation {} loop {}ms differs from {}ms",
                        self.asset_path, rep.id, rep_loop_ms, existing
                    )));
                }
                Some(_) => {}
            }
        }
        self.loop_dur_ms =
            loop_dur_ms.ok_or_else(|| LiveSimError::Manifest(format!("asset {:?}: no representations", self.asset_path)))?;

        let reference_rep = self
            .reps
            .values()
            .find(|r| r.content_type == "video")
            .or_else(|| self.reps.values().next())
            .unwrap();
        self.segment_dur_ms = self.loop_dur_ms / reference_rep.segments.len() as i64;
        Ok(())
    }

    /// Produces the `<S>` entries covering the live window together with
    /// info about the youngest emitted segment and the absolute number of
    /// the first one.
    ///
    /// Entries start at the first segment whose end reaches into the
    /// window; the last wrap only contributes segments that are complete
    /// (end no later than now plus the availability time offset). Runs with
    /// equal duration and contiguous start merge into a single entry.
    pub fn generate_timeline_entries(
        &self,
        rep_id: &str,
        wt: &WrapTimes,
        ato_ms: i64,
        start_nr: i64,
    ) -> Result<(Vec<S>, LastSegInfo, i64), LiveSimError> {
        let rep = self.reps.get(rep_id).ok_or(LiveSimError::NotFound)?;
        let ts = rep.media_timescale as i64;
        let loop_ticks = self.loop_dur_ms * ts / 1000;
        let seg_count = rep.segments.len() as i64;
        let start_pos = wt.start_rel_ms * ts / 1000;
        let now_pos = (wt.now_rel_ms + ato_ms) * ts / 1000;

        let mut entries: Vec<S> = Vec::new();
        let mut lsi = LastSegInfo {
            timescale: ts as u64,
            start_time: 0,
            dur: 0,
            nr: -1,
        };
        let mut first_nr: i64 = -1;
        let mut next_t: i64 = 0;

        for wrap in wt.start_wraps..=wt.now_wraps {
            let wrap_offset = wrap * loop_ticks;
            for (idx, seg) in rep.segments.iter().enumerate() {
                if wrap == wt.start_wraps && (seg.end_time as i64) <= start_pos {
                    continue;
                }
                if wrap == wt.now_wraps && (seg.end_time as i64) > now_pos {
                    break;
                }
                let t = wrap_offset + seg.start_time as i64;
                let d = seg.dur() as i64;
                match entries.last_mut() {
                    Some(last) if last.d == d as u64 && t == next_t => last.r += 1,
                    _ => entries.push(S {
                        t: Some(t as u64),
                        d: d as u64,
                        r: 0,
                    }),
                }
                next_t = t + d;
                let nr = wrap * seg_count + idx as i64 + start_nr;
                if first_nr < 0 {
                    first_nr = nr;
                }
                lsi.start_time = t as u64;
                lsi.dur = d as u64;
                lsi.nr = nr;
            }
        }

        Ok((entries, lsi, first_nr))
    }
}

#[derive(Debug, Default)]
pub struct AssetStore {
    assets: BTreeMap<String, Asset>,
}

impl AssetStore {
    /// Scans the VoD root and loads every asset found beneath it.
    pub fn load(vod_root: &Path) -> Result<AssetStore, LiveSimError> {
        let mut mpd_paths = Vec::new();
        collect_mpd_paths(vod_root, &mut mpd_paths)?;

        let mut assets: BTreeMap<String, Asset> = BTreeMap::new();
        for mpd_path in mpd_paths {
            let asset_dir = mpd_path.parent().unwrap_or(vod_root);
            let asset_path = asset_dir
                .strip_prefix(vod_root)
                .unwrap_or(Path::new(""))
                .to_string_lossy()
                .replace('\\', "/");
            let mpd_name = mpd_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let asset = assets
                .entry(asset_path.clone())
                .or_insert_with(|| Asset::new(asset_path, asset_dir.to_path_buf()));
            asset.load_mpd(&mpd_name)?;
            info!(asset = %asset.asset_path, mpd = %mpd_name, "loaded VoD manifest");
        }

        for asset in assets.values_mut() {
            asset.finalize()?;
        }
        Ok(AssetStore { assets })
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Splits a content path into the asset it addresses and the remainder
    /// (manifest name or segment path). The longest matching asset path
    /// wins.
    pub fn find_asset_and_content<'a>(&'a self, content: &'a str) -> Option<(&'a Asset, &'a str)> {
        let mut best: Option<(&Asset, &str)> = None;
        for (path, asset) in &self.assets {
            let rest = if path.is_empty() {
                Some(content)
            } else {
                content
                    .strip_prefix(path.as_str())
                    .and_then(|r| r.strip_prefix('/'))
            };
            if let Some(rest) = rest {
                if rest.is_empty() {
                    continue;
                }
                let better = match best {
                    Some((current, _)) => path.len() > current.asset_path.len(),
                    None => true,
                };
                if better {
                    best = Some((asset, rest));
                }
            }
        }
        best
    }
}

fn collect_mpd_paths(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), LiveSimError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_mpd_paths(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "mpd") {
            out.push(path);
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::{asset_8s, TEST_TIMESCALE};
    use super::*;
    use crate::configurl::ResponseConfig;
    use crate::livempd::calc_wrap_times;

    #[test]
    fn window_at_live_edge_spans_the_wrap() {
        // Loop 8 s, tsbd 4 s, now 10 s: the window covers the segment at
        // 6 s of the first pass and the one at 8 s (first segment of the
        // second pass). Equal durations and contiguous starts merge.
        let asset = asset_8s();
        let cfg = ResponseConfig {
            time_shift_buffer_depth_s: 4,
            ..Default::default()
        };
        let wt = calc_wrap_times(&asset, &cfg, 10_000, 4_000);
        let (entries, lsi, first_nr) = asset
            .generate_timeline_entries("V300", &wt, 0, 1)
            .unwrap();

        assert_eq!(
            entries,
            vec![S {
                t: Some(6 * TEST_TIMESCALE),
                d: 2 * TEST_TIMESCALE,
                r: 1,
            }]
        );
        assert_eq!(first_nr, 4);
        assert_eq!(lsi.nr, 5);
        assert_eq!(lsi.start_time, 8 * TEST_TIMESCALE);
    }

    #[test]
    fn window_clipped_to_whole_wrap_boundary() {
        let asset = asset_8s();
        let cfg = ResponseConfig {
            time_shift_buffer_depth_s: 4,
            ..Default::default()
        };
        let wt = calc_wrap_times(&asset, &cfg, 12_000, 4_000);
        let (entries, _, first_nr) = asset
            .generate_timeline_entries("V300", &wt, 0, 1)
            .unwrap();

        assert_eq!(
            entries,
            vec![S {
                t: Some(720_000),
                d: 180_000,
                r: 1,
            }]
        );
        assert_eq!(first_nr, 5);
    }

    #[test]
    fn empty_window_before_availability_start() {
        let asset = asset_8s();
        let cfg = ResponseConfig {
            start_time_s: 100,
            ..Default::default()
        };
        let wt = calc_wrap_times(&asset, &cfg, 50_000, 60_000);
        let (entries, lsi, first_nr) = asset
            .generate_timeline_entries("V300", &wt, 0, 1)
            .unwrap();
        assert!(entries.is_empty());
        assert_eq!(lsi.nr, -1);
        assert_eq!(first_nr, -1);
    }

    #[test]
    fn availability_offset_extends_the_window() {
        // At now = 9 s the window [5 s, 9 s) holds the segments at 4 s and
        // 6 s; with one second of availability offset the 8 s segment of
        // the second pass becomes complete as well and joins the run.
        let asset = asset_8s();
        let cfg = ResponseConfig {
            time_shift_buffer_depth_s: 4,
            ..Default::default()
        };
        let wt = calc_wrap_times(&asset, &cfg, 9_000, 4_000);
        let (entries, _, _) = asset.generate_timeline_entries("V300", &wt, 0, 1).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].t, Some(4 * TEST_TIMESCALE));
        assert_eq!(entries[0].r, 1);

        let (entries, _, _) = asset
            .generate_timeline_entries("V300", &wt, 1_000, 1)
            .unwrap();
        assert_eq!(entries[0].r, 2);
    }

    #[test]
    fn segment_lookup_by_time() {
        let asset = asset_8s();
        let rep = asset.reps.get("V300").unwrap();
        assert_eq!(rep.find_segment_index_from_time(0), 0);
        assert_eq!(rep.find_segment_index_from_time(180_000), 1);
        assert_eq!(rep.find_segment_index_from_time(180_001), 2);
        assert_eq!(rep.find_segment_index_from_time(720_000), 4);
    }

    #[test]
    fn media_template_regexp_captures_the_placeholder() {
        let re = media_regexp("V300/$Number$.m4s").unwrap();
        let caps = re.captures("V300/42.m4s").unwrap();
        assert_eq!(&caps[1], "42");
        assert!(re.captures("A48/42.m4s").is_none());
        assert!(re.captures("V300/42.m4sX").is_none());
    }
}
