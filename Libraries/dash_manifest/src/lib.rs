//! DASH manifest data structures (MPD and related types).
//! These model the subtree a live manifest generator has to read and
//! rewrite: MPD → Period → AdaptationSet → SegmentTemplate →
//! SegmentTimeline → S, plus the descriptors around them (Location,
//! ServiceDescription, UTCTiming, Role, ProducerReferenceTime).
//!
//! Attributes the model does not know are kept verbatim in per-element
//! `extra_attrs` lists and re-emitted on write, so a VoD manifest survives
//! the dynamic-rewrite round trip without losing information. Unknown child
//! elements are dropped.
//!
//! Durations are held in milliseconds, date-times as preformatted UTC
//! strings; `duration` on a SegmentTemplate and `t`/`d` on timeline entries
//! are media-timescale ticks as in the XML.

pub mod parser;
pub mod writer;

use std::fmt::Write as _;

pub const DYNAMIC_MPD_TYPE: &str = "dynamic";
pub const STATIC_MPD_TYPE: &str = "static";

/// Generic schemeIdUri/value descriptor (UTCTiming, Role, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    pub scheme_id_uri: String,
    pub value: String,
}

/// Latency bounds inside a ServiceDescription, all in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Latency {
    pub reference_id: u32,
    pub target_ms: Option<u64>,
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackRate {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceDescription {
    pub id: u32,
    pub latencies: Vec<Latency>,
    pub playback_rates: Vec<PlaybackRate>,
}

#[derive(Debug, Clone, Default)]
pub struct ProducerReferenceTime {
    pub id: u32,
    pub presentation_time: u64,
    pub prt_type: String,
    pub wall_clock_time: String,
    pub utc_timing: Option<Descriptor>,
}

/// One `<S>` entry of a SegmentTimeline: start `t` (ticks, optional),
/// duration `d` (ticks) and `r` additional repeats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S {
    pub t: Option<u64>,
    pub d: u64,
    pub r: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentTimeline {
    pub entries: Vec<S>,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentTemplate {
    pub timescale: Option<u32>,
    /// Segment duration in media ticks.
    pub duration: Option<u64>,
    pub start_number: Option<u32>,
    pub presentation_time_offset: Option<u64>,
    pub initialization: Option<String>,
    pub media: Option<String>,
    /// Seconds; may be `f64::INFINITY` (serialized as `INF`).
    pub availability_time_offset: Option<f64>,
    pub availability_time_complete: Option<bool>,
    pub segment_timeline: Option<SegmentTimeline>,
    pub extra_attrs: Vec<(String, String)>,
}

impl SegmentTemplate {
    pub fn timescale(&self) -> u32 {
        self.timescale.unwrap_or(1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Representation {
    pub id: String,
    pub bandwidth: Option<u64>,
    pub codecs: Option<String>,
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<String>,
    pub audio_sampling_rate: Option<String>,
    pub sar: Option<String>,
    pub start_with_sap: Option<u32>,
    pub segment_template: Option<SegmentTemplate>,
    pub extra_attrs: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct AdaptationSet {
    pub id: Option<u32>,
    pub lang: Option<String>,
    pub content_type: Option<String>,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub segment_alignment: Option<bool>,
    pub start_with_sap: Option<u32>,
    pub roles: Vec<Descriptor>,
    pub producer_reference_times: Vec<ProducerReferenceTime>,
    pub segment_template: Option<SegmentTemplate>,
    pub representations: Vec<Representation>,
    pub extra_attrs: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct Period {
    pub id: Option<String>,
    pub start_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub adaptation_sets: Vec<AdaptationSet>,
    pub extra_attrs: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct Mpd {
    pub profiles: Option<String>,
    pub mpd_type: Option<String>,
    pub availability_start_time: Option<String>,
    pub publish_time: Option<String>,
    pub media_presentation_duration_ms: Option<u64>,
    pub minimum_update_period_ms: Option<u64>,
    pub min_buffer_time_ms: Option<u64>,
    pub time_shift_buffer_depth_ms: Option<u64>,
    pub suggested_presentation_delay_ms: Option<u64>,
    pub max_segment_duration_ms: Option<u64>,
    pub locations: Vec<String>,
    pub service_descriptions: Vec<ServiceDescription>,
    pub utc_timings: Vec<Descriptor>,
    pub periods: Vec<Period>,
    pub extra_attrs: Vec<(String, String)>,
}

/// Formats milliseconds as an xs:duration, e.g. `PT8S` or `PT1.500S`.
pub fn format_duration_ms(ms: u64) -> String {
    if ms % 1000 == 0 {
        format!("PT{}S", ms / 1000)
    } else {
        format!("PT{}.{:03}S", ms / 1000, ms % 1000)
    }
}

/// Parses an xs:duration into milliseconds.
pub fn parse_duration_ms(value: &str) -> Option<u64> {
    let iso = iso8601_duration::Duration::parse(value).ok()?;
    iso.to_std().map(|d| d.as_millis() as u64)
}

/// Formats unix milliseconds as an xs:dateTime in UTC. Sub-second
/// precision is only written when the value is not a whole second.
pub fn format_date_time_ms(ms: i64) -> String {
    let dt = chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default();
    if ms % 1000 == 0 {
        dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }
}

/// Formats a float attribute without a trailing `.0` for whole values;
/// infinity becomes `INF` as required for availabilityTimeOffset.
pub fn format_float_attr(value: f64) -> String {
    if value.is_infinite() {
        return "INF".to_string();
    }
    let mut out = String::new();
    if value.fract() == 0.0 {
        let _ = write!(out, "{}", value as i64);
    } else {
        let _ = write!(out, "{}", value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration_ms(8000), "PT8S");
        assert_eq!(format_duration_ms(1500), "PT1.500S");
        assert_eq!(format_duration_ms(0), "PT0S");
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration_ms("PT8S"), Some(8000));
        assert_eq!(parse_duration_ms("PT1.5S"), Some(1500));
        assert_eq!(parse_duration_ms("PT1M40S"), Some(100_000));
        assert_eq!(parse_duration_ms("bogus"), None);
    }

    #[test]
    fn date_time_formatting() {
        assert_eq!(format_date_time_ms(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_date_time_ms(1500), "1970-01-01T00:00:01.500Z");
    }

    #[test]
    fn float_attr_formatting() {
        assert_eq!(format_float_attr(1.5), "1.5");
        assert_eq!(format_float_attr(2.0), "2");
        assert_eq!(format_float_attr(f64::INFINITY), "INF");
    }
}
