//! Dynamic manifest synthesis.
//!
//! A VoD manifest is projected onto wall-clock time: the asset loops from
//! the configured availability start, and every request rewrites the static
//! MPD into a dynamic one whose SegmentTemplate addresses the loop as if it
//! had been broadcast live since then.

use dash_manifest::writer::date_time_from_s;
use dash_manifest::{
    AdaptationSet, Descriptor, Latency, Mpd, Period, PlaybackRate, ProducerReferenceTime,
    Representation, S, SegmentTemplate, SegmentTimeline, ServiceDescription, format_date_time_ms,
    DYNAMIC_MPD_TYPE, STATIC_MPD_TYPE,
};

use crate::asset::{Asset, LastSegInfo};
use crate::configurl::{
    LiveMpdType, ResponseConfig, UtcTimingMethod, UTC_TIMING_HTTP_SERVER,
    UTC_TIMING_HTTP_SERVER_MS, UTC_TIMING_NTP_SERVER, UTC_TIMING_SNTP_SERVER,
};
use crate::errors::LiveSimError;

pub const SUBS_STPP_PREFIX: &str = "timestpp-";

/// Positions of the live window relative to the loop structure: how many
/// whole loops have passed at the window start and at "now", and the
/// offsets into the current loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapTimes {
    pub now_ms: i64,
    pub now_wraps: i64,
    pub now_wrap_ms: i64,
    pub now_rel_ms: i64,
    pub start_time_ms: i64,
    pub start_wraps: i64,
    pub start_wrap_ms: i64,
    pub start_rel_ms: i64,
}

pub fn calc_wrap_times(asset: &Asset, cfg: &ResponseConfig, now_ms: i64, tsbd_ms: i64) -> WrapTimes {
    let cfg_start_ms = cfg.start_time_s * 1000;
    let loop_ms = asset.loop_dur_ms;

    let mut start_time_ms = now_ms - tsbd_ms;
    if start_time_ms < cfg_start_ms {
        start_time_ms = cfg_start_ms;
    }
    let start_wraps = (start_time_ms - cfg_start_ms) / loop_ms;
    let start_wrap_ms = start_wraps * loop_ms + cfg_start_ms;
    let start_rel_ms = start_time_ms - start_wrap_ms;

    let now_wraps = (now_ms - cfg_start_ms) / loop_ms;
    let now_wrap_ms = now_wraps * loop_ms + cfg_start_ms;
    let now_rel_ms = now_ms - now_wrap_ms;

    WrapTimes {
        now_ms,
        now_wraps,
        now_wrap_ms,
        now_rel_ms,
        start_time_ms,
        start_wraps,
        start_wrap_ms,
        start_rel_ms,
    }
}

struct SegEntries {
    entries: Vec<S>,
    lsi: LastSegInfo,
    start_nr: i64,
    media_timescale: u64,
}

/// Generates the dynamic MPD for one request.
pub fn live_mpd(asset: &Asset, mpd_name: &str, cfg: &ResponseConfig, now_ms: i64) -> Result<Mpd, LiveSimError> {
    let mut mpd = asset.vod_mpd(mpd_name).ok_or(LiveSimError::NotFound)?;

    mpd.mpd_type = Some(DYNAMIC_MPD_TYPE.to_string());
    mpd.media_presentation_duration_ms = None;
    mpd.availability_start_time = Some(date_time_from_s(cfg.start_time_s));
    mpd.minimum_update_period_ms = Some(match cfg.minimum_update_period_s {
        Some(s) => (s * 1000) as u64,
        None => asset.segment_dur_ms as u64,
    });
    if let Some(spd) = cfg.suggested_presentation_delay_s {
        mpd.suggested_presentation_delay_ms = Some((spd * 1000) as u64);
    }
    mpd.time_shift_buffer_depth_ms = Some((cfg.time_shift_buffer_depth_s * 1000) as u64);

    if cfg.add_location {
        mpd.locations = vec![rebuild_location(cfg)];
    }

    if cfg.availability_time_offset_s() > 0.0 && !cfg.availability_time_complete {
        let latency_target_ms = cfg.latency_target_ms.ok_or(LiveSimError::LatencyTargetNotSet)?;
        mpd.service_descriptions = create_service_description(latency_target_ms);
    }

    let mut after_stop = false;
    let mut end_time_ms = now_ms;
    if let Some(stop_time_s) = cfg.stop_time_s {
        let stop_time_ms = stop_time_s * 1000;
        if stop_time_ms < now_ms {
            end_time_ms = stop_time_ms;
            after_stop = true;
        }
    }

    let wt = calc_wrap_times(asset, cfg, end_time_ms, cfg.time_shift_buffer_depth_s * 1000);

    let mut publish_time_s = cfg.start_time_s as f64;
    {
        let period = mpd
            .periods
            .first_mut()
            .ok_or_else(|| LiveSimError::Manifest("no period in VoD MPD".to_string()))?;
        period.duration_ms = None;
        period.id = Some("P0".to_string());
        period.start_ms = Some(0);

        for (i, set) in period.adaptation_sets.iter_mut().enumerate() {
            let se = calc_segment_entries_for_adaptation_set(cfg, asset, set, &wt)?;
            match cfg.live_mpd_type() {
                LiveMpdType::TimelineTime => {
                    adjust_adaptation_set_for_timeline_time(se, set, i == 0, &mut publish_time_s, cfg);
                }
                LiveMpdType::TimelineNumber => {
                    adjust_adaptation_set_for_timeline_nr(se, set, i == 0, &mut publish_time_s, cfg);
                }
                LiveMpdType::SegmentNumber => {
                    adjust_adaptation_set_for_segment_number(cfg, asset, set)?;
                }
            }
        }

        if !cfg.time_subs_stpp.is_empty() {
            add_time_subs_stpp(cfg, asset, period)?;
        }
    }
    mpd.publish_time = Some(format_date_time_ms((publish_time_s * 1000.0).round() as i64));

    if cfg.periods_per_hour.is_some() {
        split_period(&mut mpd, asset, cfg, &wt)?;
    }

    add_utc_timings(&mut mpd, cfg);

    if after_stop {
        // stop_time_s is set whenever after_stop is.
        let mpd_dur_s = cfg.stop_time_s.unwrap_or(0) - cfg.start_time_s;
        make_mpd_static(&mut mpd, mpd_dur_s);
    }

    Ok(mpd)
}

fn make_mpd_static(mpd: &mut Mpd, mpd_dur_s: i64) {
    mpd.mpd_type = Some(STATIC_MPD_TYPE.to_string());
    mpd.time_shift_buffer_depth_ms = None;
    mpd.minimum_update_period_ms = None;
    mpd.suggested_presentation_delay_ms = None;
    mpd.media_presentation_duration_ms = Some((mpd_dur_s * 1000) as u64);
}

/// Rebuilds the request URL from its path segments, substituting resolved
/// absolute times for `startrel_`/`stoprel_` segments.
fn rebuild_location(cfg: &ResponseConfig) -> String {
    let mut out = String::new();
    for part in cfg.url_parts.iter().skip(1) {
        out.push('/');
        if part.starts_with("startrel_") {
            out.push_str(&format!("start_{}", cfg.start_time_s));
        } else if part.starts_with("stoprel_") {
            out.push_str(&format!("stop_{}", cfg.stop_time_s.unwrap_or(0)));
        } else {
            out.push_str(part);
        }
    }
    out
}

fn create_service_description(latency_target_ms: u64) -> Vec<ServiceDescription> {
    let min_latency = latency_target_ms * 3 / 4;
    let max_latency = latency_target_ms * 2;
    vec![ServiceDescription {
        id: 0,
        latencies: vec![Latency {
            reference_id: 0,
            target_ms: Some(latency_target_ms),
            min_ms: Some(min_latency),
            max_ms: Some(max_latency),
        }],
        playback_rates: vec![PlaybackRate { min: 0.96, max: 1.04 }],
    }]
}

fn create_producer_reference_times(start_time_s: i64) -> Vec<ProducerReferenceTime> {
    vec![ProducerReferenceTime {
        id: 0,
        presentation_time: 0,
        prt_type: "encoder".to_string(),
        wall_clock_time: date_time_from_s(start_time_s),
        utc_timing: Some(Descriptor {
            scheme_id_uri: "urn:mpeg:dash:utc:http-iso:2014".to_string(),
            value: UTC_TIMING_HTTP_SERVER.to_string(),
        }),
    }]
}

fn calc_segment_entries_for_adaptation_set(
    cfg: &ResponseConfig,
    asset: &Asset,
    set: &mut AdaptationSet,
    wt: &WrapTimes,
) -> Result<SegEntries, LiveSimError> {
    let ato = cfg.availability_time_offset_s();
    {
        let st = set
            .segment_template
            .as_mut()
            .ok_or_else(|| LiveSimError::Manifest("no SegmentTemplate in AdaptationSet".to_string()))?;
        if cfg.live_mpd_type() != LiveMpdType::SegmentNumber && ato.is_infinite() {
            return Err(LiveSimError::AtoInfTimeline);
        }
        if ato != 0.0 {
            st.availability_time_offset = Some(ato);
        }
        if !cfg.availability_time_complete {
            st.availability_time_complete = Some(false);
        }
    }
    if !cfg.availability_time_complete && ato > 0.0 {
        set.producer_reference_times = create_producer_reference_times(cfg.start_time_s);
    }

    // Any representation of the set shares the segment grid.
    let rep_id = set
        .representations
        .first()
        .ok_or_else(|| LiveSimError::Manifest("no Representation in AdaptationSet".to_string()))?
        .id
        .clone();
    let rep = asset.reps.get(&rep_id).ok_or(LiveSimError::NotFound)?;
    let ato_ms = if ato.is_finite() { (1000.0 * ato) as i64 } else { 0 };
    let (entries, lsi, start_nr) =
        asset.generate_timeline_entries(&rep_id, wt, ato_ms, cfg.start_nr.unwrap_or(1))?;
    Ok(SegEntries {
        entries,
        lsi,
        start_nr,
        media_timescale: rep.media_timescale,
    })
}

fn adjust_adaptation_set_for_timeline_time(
    se: SegEntries,
    set: &mut AdaptationSet,
    first_set: bool,
    publish_time_s: &mut f64,
    cfg: &ResponseConfig,
) {
    if first_set {
        *publish_time_s = calc_publish_time(cfg, &se.lsi);
    }
    let st = set.segment_template.as_mut().unwrap();
    st.start_number = None;
    st.duration = None;
    if let Some(media) = st.media.take() {
        st.media = Some(media.replace("$Number$", "$Time$"));
    }
    st.timescale = Some(se.media_timescale as u32);
    st.segment_timeline = Some(SegmentTimeline { entries: se.entries });
}

fn adjust_adaptation_set_for_timeline_nr(
    se: SegEntries,
    set: &mut AdaptationSet,
    first_set: bool,
    publish_time_s: &mut f64,
    cfg: &ResponseConfig,
) {
    if first_set {
        *publish_time_s = calc_publish_time(cfg, &se.lsi);
    }
    let st = set.segment_template.as_mut().unwrap();
    st.start_number = None;
    st.duration = None;
    if let Some(media) = st.media.take() {
        st.media = Some(media.replace("$Time$", "$Number$"));
    }
    st.timescale = Some(se.media_timescale as u32);
    st.segment_timeline = Some(SegmentTimeline { entries: se.entries });
    if se.start_nr >= 0 {
        st.start_number = Some(se.start_nr as u32);
    }
}

fn adjust_adaptation_set_for_segment_number(
    cfg: &ResponseConfig,
    asset: &Asset,
    set: &mut AdaptationSet,
) -> Result<(), LiveSimError> {
    let rep_id = set
        .representations
        .first()
        .map(|r| r.id.clone())
        .ok_or_else(|| LiveSimError::Manifest("no Representation in AdaptationSet".to_string()))?;
    let st = set.segment_template.as_mut().unwrap();
    if st.duration.is_none() {
        let rep = asset.reps.get(&rep_id).ok_or(LiveSimError::NotFound)?;
        st.duration = Some(rep.total_duration() / rep.segments.len() as u64);
        st.timescale = Some(rep.media_timescale as u32);
    }
    st.segment_timeline = None;
    if let Some(start_nr) = cfg.start_nr {
        st.start_number = Some(start_nr as u32);
    }
    if let Some(media) = st.media.take() {
        st.media = Some(media.replace("$Time$", "$Number$"));
    }
    Ok(())
}

fn add_time_subs_stpp(cfg: &ResponseConfig, asset: &Asset, period: &mut Period) -> Result<(), LiveSimError> {
    let video_set = period
        .adaptation_sets
        .iter()
        .find(|set| set.content_type.as_deref() == Some("video"))
        .ok_or_else(|| LiveSimError::Manifest("no video adaptation set found".to_string()))?;
    let video_st = video_set
        .segment_template
        .clone()
        .ok_or_else(|| LiveSimError::Manifest("no SegmentTemplate in video adaptation set".to_string()))?;

    let seg_dur_ms = asset.segment_dur_ms as u64;
    let typical_stpp_seg_size_bits: u64 = 2000 * 8; // 2 kB
    for (i, lang) in cfg.time_subs_stpp.iter().enumerate() {
        let mut st = SegmentTemplate {
            initialization: Some("$RepresentationID$/init.mp4".to_string()),
            media: Some("$RepresentationID$/$Number$.m4s".to_string()),
            timescale: Some(1000),
            ..Default::default()
        };
        if let Some(video_dur) = video_st.duration {
            st.duration = Some(video_dur * 1000 / video_st.timescale() as u64);
        }
        st.start_number = video_st.start_number;

        let rep = Representation {
            id: format!("{}{}", SUBS_STPP_PREFIX, lang),
            bandwidth: Some(typical_stpp_seg_size_bits * 1000 / seg_dur_ms),
            start_with_sap: Some(1),
            ..Default::default()
        };
        let set = AdaptationSet {
            id: Some(100 + i as u32),
            lang: Some(lang.clone()),
            content_type: Some("text".to_string()),
            mime_type: Some("application/mp4".to_string()),
            segment_alignment: Some(true),
            codecs: Some("stpp".to_string()),
            roles: vec![Descriptor {
                scheme_id_uri: "urn:mpeg:dash:role:2011".to_string(),
                value: "subtitle".to_string(),
            }],
            segment_template: Some(st),
            representations: vec![rep],
            ..Default::default()
        };
        period.adaptation_sets.push(set);
    }
    Ok(())
}

/// Splits the single period into periods of 3600 / periods_per_hour
/// seconds, covering the whole live window.
fn split_period(mpd: &mut Mpd, asset: &Asset, cfg: &ResponseConfig, wt: &WrapTimes) -> Result<(), LiveSimError> {
    if mpd.periods.len() != 1 {
        return Err(LiveSimError::Manifest("not exactly one period in the MPD".to_string()));
    }
    let Some(periods_per_hour) = cfg.periods_per_hour else {
        return Ok(());
    };
    if periods_per_hour <= 0 {
        return Err(LiveSimError::UrlConfig(
            "key=periodsperhour, err=must be positive".to_string(),
        ));
    }
    let period_dur_s = 3600 / periods_per_hour;
    if period_dur_s * 1000 % asset.segment_dur_ms != 0 {
        return Err(LiveSimError::PeriodDurationMismatch {
            period_dur_s,
            segment_dur_ms: asset.segment_dur_ms,
        });
    }

    let start_period_nr = wt.start_time_ms / (period_dur_s * 1000);
    let end_period_nr = wt.now_ms / (period_dur_s * 1000);
    let in_period = mpd.periods[0].clone();

    let mut periods = Vec::with_capacity((end_period_nr - start_period_nr + 1) as usize);
    for p_nr in start_period_nr..=end_period_nr {
        let mut period = in_period.clone();
        period.id = Some(format!("P{}", p_nr));
        period.start_ms = Some((p_nr * period_dur_s * 1000) as u64);
        for (a_nr, set) in period.adaptation_sets.iter_mut().enumerate() {
            let in_st = in_period.adaptation_sets[a_nr]
                .segment_template
                .as_ref()
                .ok_or_else(|| LiveSimError::Manifest("no SegmentTemplate in AdaptationSet".to_string()))?;
            let st = set.segment_template.as_mut().unwrap();
            let timescale = st.timescale() as i64;
            let pto = p_nr * period_dur_s * timescale;
            st.presentation_time_offset = Some(pto as u64);
            let period_start_s = p_nr * period_dur_s;
            let period_end_s = (p_nr + 1) * period_dur_s;
            match cfg.live_mpd_type() {
                LiveMpdType::SegmentNumber => {
                    let seg_dur = st.duration.ok_or_else(|| {
                        LiveSimError::Manifest("SegmentTemplate without duration".to_string())
                    })?;
                    st.start_number = Some((pto as u64 / seg_dur) as u32);
                }
                LiveMpdType::TimelineTime => {
                    let in_entries = timeline_entries(in_st);
                    let (entries, _) = reduce_s(in_entries, None, timescale, period_start_s, period_end_s);
                    st.segment_timeline = Some(SegmentTimeline { entries });
                }
                LiveMpdType::TimelineNumber => {
                    let in_entries = timeline_entries(in_st);
                    let (entries, start_nr) =
                        reduce_s(in_entries, in_st.start_number, timescale, period_start_s, period_end_s);
                    st.segment_timeline = Some(SegmentTimeline { entries });
                    st.start_number = Some(start_nr);
                }
            }
        }
        periods.push(period);
    }
    mpd.periods = periods;
    Ok(())
}

fn timeline_entries(st: &SegmentTemplate) -> &[S] {
    st.segment_timeline
        .as_ref()
        .map(|tl| tl.entries.as_slice())
        .unwrap_or(&[])
}

/// Narrows timeline entries to the period's half-open tick range
/// `[period_start, period_end)`. Returns the reduced entries and the number
/// of the first one that was kept.
fn reduce_s(
    entries: &[S],
    start_nr: Option<u32>,
    timescale: i64,
    period_start_s: i64,
    period_end_s: i64,
) -> (Vec<S>, u32) {
    let p_start = (period_start_s * timescale) as u64;
    let p_end = (period_end_s * timescale) as u64;
    let mut t = 0u64;
    let mut nr = start_nr.unwrap_or(0);
    let mut out_start_nr = nr;
    let mut out: Vec<S> = Vec::with_capacity(entries.len());

    for entry in entries {
        if let Some(start) = entry.t {
            t = start;
        }
        let d = entry.d;
        for _ in 0..=entry.r {
            if t < p_start {
                t += d;
                nr += 1;
                continue;
            }
            if t >= p_end {
                return (out, out_start_nr);
            }
            match out.last_mut() {
                Some(last) if last.d == d => last.r += 1,
                _ => {
                    if out.is_empty() {
                        out_start_nr = nr;
                    }
                    out.push(S { t: Some(t), d, r: 0 });
                }
            }
            t += d;
            nr += 1;
        }
    }
    if out.is_empty() {
        out_start_nr = nr;
    }
    (out, out_start_nr)
}

/// The instant of the last manifest change, in seconds since epoch.
fn calc_publish_time(cfg: &ResponseConfig, lsi: &LastSegInfo) -> f64 {
    let ast = cfg.start_time_s as f64;
    if lsi.nr < 0 {
        return ast;
    }
    let avail_time = lsi.availability_time_s(cfg.availability_time_offset_s()) + ast;
    if avail_time < ast {
        return ast;
    }
    avail_time
}

fn add_utc_timings(mpd: &mut Mpd, cfg: &ResponseConfig) {
    if cfg.utc_timing_methods.is_empty() {
        // Default when none is configured: HTTP with ms precision.
        mpd.utc_timings = vec![Descriptor {
            scheme_id_uri: "urn:mpeg:dash:utc:http-iso:2014".to_string(),
            value: UTC_TIMING_HTTP_SERVER_MS.to_string(),
        }];
        return;
    }
    let mut timings = Vec::new();
    for method in &cfg.utc_timing_methods {
        let timing = match method {
            UtcTimingMethod::Direct => Descriptor {
                scheme_id_uri: "urn:mpeg:dash:utc:direct:2014".to_string(),
                value: mpd.publish_time.clone().unwrap_or_default(),
            },
            UtcTimingMethod::Ntp => Descriptor {
                scheme_id_uri: "urn:mpeg:dash:utc:ntp:2014".to_string(),
                value: UTC_TIMING_NTP_SERVER.to_string(),
            },
            UtcTimingMethod::Sntp => Descriptor {
                scheme_id_uri: "urn:mpeg:dash:utc:sntp:2014".to_string(),
                value: UTC_TIMING_SNTP_SERVER.to_string(),
            },
            UtcTimingMethod::HttpXsDate => Descriptor {
                scheme_id_uri: "urn:mpeg:dash:utc:http-xsdate:2014".to_string(),
                value: UTC_TIMING_HTTP_SERVER.to_string(),
            },
            UtcTimingMethod::HttpIso => Descriptor {
                scheme_id_uri: "urn:mpeg:dash:utc:http-iso:2014".to_string(),
                value: UTC_TIMING_HTTP_SERVER_MS.to_string(),
            },
            UtcTimingMethod::None => {
                mpd.utc_timings = Vec::new();
                return;
            }
        };
        timings.push(timing);
    }
    mpd.utc_timings = timings;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::test_support::{asset_8s, TEST_TIMESCALE};

    fn cfg_with(f: impl FnOnce(&mut ResponseConfig)) -> ResponseConfig {
        let mut cfg = ResponseConfig::default();
        f(&mut cfg);
        cfg
    }

    #[test]
    fn wrap_identity_holds() {
        let asset = asset_8s();
        let cfg = cfg_with(|c| c.start_time_s = 20);
        for now_ms in [20_000, 25_000, 50_001, 123_456] {
            let wt = calc_wrap_times(&asset, &cfg, now_ms, 14_000);
            assert_eq!(wt.start_wrap_ms + wt.start_rel_ms, wt.start_time_ms);
            assert_eq!(wt.now_wrap_ms + wt.now_rel_ms, wt.now_ms);
            assert!(wt.start_wraps <= wt.now_wraps);
            assert!((0..asset.loop_dur_ms).contains(&wt.start_rel_ms));
            assert!((0..asset.loop_dur_ms).contains(&wt.now_rel_ms));
        }
    }

    #[test]
    fn timeline_number_manifest_at_live_edge() {
        let asset = asset_8s();
        let cfg = cfg_with(|c| {
            c.time_shift_buffer_depth_s = 4;
            c.seg_timeline_nr = true;
        });
        let mpd = live_mpd(&asset, "stream.mpd", &cfg, 10_000).unwrap();

        assert_eq!(mpd.mpd_type.as_deref(), Some("dynamic"));
        assert_eq!(mpd.availability_start_time.as_deref(), Some("1970-01-01T00:00:00Z"));
        assert!(mpd.media_presentation_duration_ms.is_none());
        assert_eq!(mpd.minimum_update_period_ms, Some(2000));
        assert_eq!(mpd.time_shift_buffer_depth_ms, Some(4000));

        let st = mpd.periods[0].adaptation_sets[0].segment_template.as_ref().unwrap();
        assert_eq!(st.start_number, Some(4));
        assert_eq!(st.duration, None);
        assert_eq!(st.timescale, Some(TEST_TIMESCALE as u32));
        assert!(st.media.as_deref().unwrap().contains("$Number$"));
        let entries = &st.segment_timeline.as_ref().unwrap().entries;
        assert_eq!(
            entries,
            &vec![S {
                t: Some(6 * TEST_TIMESCALE),
                d: 2 * TEST_TIMESCALE,
                r: 1,
            }]
        );

        // Youngest segment ends at 10 s on the live timeline.
        assert_eq!(mpd.publish_time.as_deref(), Some("1970-01-01T00:00:10Z"));
    }

    #[test]
    fn timeline_time_manifest_uses_time_addressing() {
        let asset = asset_8s();
        let cfg = cfg_with(|c| {
            c.time_shift_buffer_depth_s = 4;
            c.seg_timeline_time = true;
        });
        let mpd = live_mpd(&asset, "stream.mpd", &cfg, 10_000).unwrap();
        let st = mpd.periods[0].adaptation_sets[0].segment_template.as_ref().unwrap();
        assert_eq!(st.start_number, None);
        assert!(st.media.as_deref().unwrap().contains("$Time$"));
        assert!(st.segment_timeline.is_some());
    }

    #[test]
    fn segment_number_manifest_has_fixed_duration() {
        let asset = asset_8s();
        let cfg = cfg_with(|c| c.time_shift_buffer_depth_s = 4);
        let mpd = live_mpd(&asset, "stream.mpd", &cfg, 10_000).unwrap();

        let st = mpd.periods[0].adaptation_sets[0].segment_template.as_ref().unwrap();
        assert_eq!(st.duration, Some(2 * TEST_TIMESCALE));
        assert_eq!(st.timescale, Some(TEST_TIMESCALE as u32));
        assert_eq!(st.start_number, Some(1));
        assert!(st.segment_timeline.is_none());
        assert_eq!(mpd.publish_time, mpd.availability_start_time);
    }

    #[test]
    fn low_latency_service_description_bounds() {
        let asset = asset_8s();
        let cfg = cfg_with(|c| {
            c.availability_time_offset_s = Some(1.5);
            c.availability_time_complete = false;
            c.latency_target_ms = Some(1000);
        });
        let mpd = live_mpd(&asset, "stream.mpd", &cfg, 10_000).unwrap();
        let latency = &mpd.service_descriptions[0].latencies[0];
        assert_eq!(latency.target_ms, Some(1000));
        assert_eq!(latency.min_ms, Some(750));
        assert_eq!(latency.max_ms, Some(2000));
        let rate = &mpd.service_descriptions[0].playback_rates[0];
        assert_eq!((rate.min, rate.max), (0.96, 1.04));

        let set = &mpd.periods[0].adaptation_sets[0];
        assert_eq!(set.producer_reference_times.len(), 1);
        let st = set.segment_template.as_ref().unwrap();
        assert_eq!(st.availability_time_offset, Some(1.5));
        assert_eq!(st.availability_time_complete, Some(false));
    }

    #[test]
    fn low_latency_without_target_fails() {
        let asset = asset_8s();
        let cfg = cfg_with(|c| {
            c.availability_time_offset_s = Some(1.5);
            c.availability_time_complete = false;
        });
        let err = live_mpd(&asset, "stream.mpd", &cfg, 10_000).unwrap_err();
        assert!(matches!(err, LiveSimError::LatencyTargetNotSet));
    }

    #[test]
    fn infinite_ato_rejected_with_timeline() {
        let asset = asset_8s();
        let cfg = cfg_with(|c| {
            c.seg_timeline_time = true;
            c.availability_time_offset_s = Some(f64::INFINITY);
        });
        let err = live_mpd(&asset, "stream.mpd", &cfg, 10_000).unwrap_err();
        assert!(matches!(err, LiveSimError::AtoInfTimeline));
    }

    #[test]
    fn infinite_ato_allowed_with_segment_number() {
        let asset = asset_8s();
        let cfg = cfg_with(|c| {
            c.availability_time_offset_s = Some(f64::INFINITY);
            c.availability_time_complete = false;
            c.latency_target_ms = Some(1000);
        });
        let mpd = live_mpd(&asset, "stream.mpd", &cfg, 10_000).unwrap();
        let st = mpd.periods[0].adaptation_sets[0].segment_template.as_ref().unwrap();
        assert_eq!(st.availability_time_offset, Some(f64::INFINITY));
    }

    #[test]
    fn period_split_in_segment_number_mode() {
        let asset = asset_8s();
        let cfg = cfg_with(|c| {
            c.time_shift_buffer_depth_s = 10;
            c.periods_per_hour = Some(60);
        });
        let mpd = live_mpd(&asset, "stream.mpd", &cfg, 130_000).unwrap();

        // Window [120 s, 130 s] fits into the single 60 s period P2.
        assert_eq!(mpd.periods.len(), 1);
        let period = &mpd.periods[0];
        assert_eq!(period.id.as_deref(), Some("P2"));
        assert_eq!(period.start_ms, Some(120_000));

        let st = period.adaptation_sets[0].segment_template.as_ref().unwrap();
        let pto = st.presentation_time_offset.unwrap();
        assert_eq!(pto, 120 * TEST_TIMESCALE);
        // StartNumber * Duration = PresentationTimeOffset
        assert_eq!(st.start_number.unwrap() as u64 * st.duration.unwrap(), pto);
    }

    #[test]
    fn period_split_covers_window_spanning_periods() {
        let asset = asset_8s();
        let cfg = cfg_with(|c| {
            c.time_shift_buffer_depth_s = 70;
            c.periods_per_hour = Some(60);
            c.seg_timeline_nr = true;
        });
        let mpd = live_mpd(&asset, "stream.mpd", &cfg, 130_000).unwrap();
        // Window [60 s, 130 s] spans periods P1 and P2.
        assert_eq!(mpd.periods.len(), 2);
        assert_eq!(mpd.periods[0].id.as_deref(), Some("P1"));
        assert_eq!(mpd.periods[1].id.as_deref(), Some("P2"));

        let st1 = mpd.periods[0].adaptation_sets[0].segment_template.as_ref().unwrap();
        let entries1 = &st1.segment_timeline.as_ref().unwrap().entries;
        // P1 holds [60 s, 120 s): 30 two-second segments in one run.
        assert_eq!(entries1.len(), 1);
        assert_eq!(entries1[0].t, Some(60 * TEST_TIMESCALE));
        assert_eq!(entries1[0].r, 29);
        // 60 s / 2 s per segment, numbering from 1.
        assert_eq!(st1.start_number, Some(31));

        let st2 = mpd.periods[1].adaptation_sets[0].segment_template.as_ref().unwrap();
        let entries2 = &st2.segment_timeline.as_ref().unwrap().entries;
        assert_eq!(entries2[0].t, Some(120 * TEST_TIMESCALE));
        assert_eq!(st2.start_number, Some(61));
    }

    #[test]
    fn period_duration_must_divide_into_segments() {
        let asset = asset_8s();
        let cfg = cfg_with(|c| c.periods_per_hour = Some(48)); // 75 s periods
        let err = live_mpd(&asset, "stream.mpd", &cfg, 130_000).unwrap_err();
        assert!(matches!(err, LiveSimError::PeriodDurationMismatch { .. }));
    }

    #[test]
    fn after_stop_manifest_turns_static() {
        let asset = asset_8s();
        let cfg = cfg_with(|c| {
            c.start_time_s = 0;
            c.stop_time_s = Some(100);
        });
        let mpd = live_mpd(&asset, "stream.mpd", &cfg, 200_000).unwrap();
        assert_eq!(mpd.mpd_type.as_deref(), Some("static"));
        assert_eq!(mpd.media_presentation_duration_ms, Some(100_000));
        assert!(mpd.minimum_update_period_ms.is_none());
        assert!(mpd.time_shift_buffer_depth_ms.is_none());
        assert!(mpd.suggested_presentation_delay_ms.is_none());
    }

    #[test]
    fn location_echoes_resolved_relative_times() {
        let asset = asset_8s();
        let mut cfg = ResponseConfig {
            add_location: true,
            start_time_s: 80,
            ..Default::default()
        };
        cfg.url_parts = "/livesim/startrel_-20/testpic/stream.mpd"
            .split('/')
            .map(|s| s.to_string())
            .collect();
        let mpd = live_mpd(&asset, "stream.mpd", &cfg, 100_000).unwrap();
        assert_eq!(mpd.locations, vec!["/livesim/start_80/testpic/stream.mpd"]);
    }

    #[test]
    fn stpp_subtitle_sets_follow_video_timing() {
        let asset = asset_8s();
        let cfg = cfg_with(|c| {
            c.time_subs_stpp = vec!["en".to_string(), "sv".to_string()];
        });
        let mpd = live_mpd(&asset, "stream.mpd", &cfg, 10_000).unwrap();
        let sets = &mpd.periods[0].adaptation_sets;
        assert_eq!(sets.len(), 3);

        let en = &sets[1];
        assert_eq!(en.id, Some(100));
        assert_eq!(en.lang.as_deref(), Some("en"));
        assert_eq!(en.content_type.as_deref(), Some("text"));
        assert_eq!(en.codecs.as_deref(), Some("stpp"));
        assert_eq!(en.roles[0].value, "subtitle");
        assert_eq!(sets[2].id, Some(101));

        let st = en.segment_template.as_ref().unwrap();
        assert_eq!(st.timescale, Some(1000));
        // Video runs 180000 ticks per segment at 90000 Hz -> 2000 ms.
        assert_eq!(st.duration, Some(2000));
        assert_eq!(en.representations[0].id, "timestpp-en");
        assert_eq!(en.representations[0].bandwidth, Some(8000));
    }

    #[test]
    fn default_utc_timing_is_http_iso() {
        let asset = asset_8s();
        let cfg = ResponseConfig::default();
        let mpd = live_mpd(&asset, "stream.mpd", &cfg, 10_000).unwrap();
        assert_eq!(mpd.utc_timings.len(), 1);
        assert_eq!(mpd.utc_timings[0].scheme_id_uri, "urn:mpeg:dash:utc:http-iso:2014");
        assert_eq!(mpd.utc_timings[0].value, UTC_TIMING_HTTP_SERVER_MS);
    }

    #[test]
    fn utc_timing_direct_and_none() {
        let asset = asset_8s();
        let cfg = cfg_with(|c| c.utc_timing_methods = vec![UtcTimingMethod::Direct]);
        let mpd = live_mpd(&asset, "stream.mpd", &cfg, 10_000).unwrap();
        assert_eq!(mpd.utc_timings[0].scheme_id_uri, "urn:mpeg:dash:utc:direct:2014");
        assert_eq!(mpd.utc_timings[0].value, mpd.publish_time.clone().unwrap());

        let cfg = cfg_with(|c| {
            c.utc_timing_methods = vec![UtcTimingMethod::Ntp, UtcTimingMethod::None]
        });
        let mpd = live_mpd(&asset, "stream.mpd", &cfg, 10_000).unwrap();
        assert!(mpd.utc_timings.is_empty());
    }
}
