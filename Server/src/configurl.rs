//! URL-encoded response configuration.
//!
//! The simulator is configured per request through leading `key_value` path
//! segments, e.g. `/livesim/tsbd_30/segtimeline_1/asset/stream.mpd`. The
//! first segment that is not a recognized `key_value` pair starts the
//! content part (asset path plus manifest or segment name).

use std::fmt::Display;
use std::str::FromStr;

use crate::errors::LiveSimError;

/// Extra window beyond the time-shift buffer depth before a segment is
/// reported gone.
pub const TIME_SHIFT_BUFFER_DEPTH_MARGIN_S: i64 = 10;
pub const DEFAULT_TIME_SHIFT_BUFFER_DEPTH_S: i64 = 60;

pub const UTC_TIMING_NTP_SERVER: &str = "1.de.pool.ntp.org";
pub const UTC_TIMING_SNTP_SERVER: &str = "time.kfki.hu";
pub const UTC_TIMING_HTTP_SERVER: &str = "https://time.akamai.com/?iso";
pub const UTC_TIMING_HTTP_SERVER_MS: &str = "https://time.akamai.com/?iso&ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveMpdType {
    SegmentNumber,
    TimelineTime,
    TimelineNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtcTimingMethod {
    Direct,
    Ntp,
    Sntp,
    HttpXsDate,
    HttpIso,
    None,
}

impl FromStr for UtcTimingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(UtcTimingMethod::Direct),
            "ntp" => Ok(UtcTimingMethod::Ntp),
            "sntp" => Ok(UtcTimingMethod::Sntp),
            "httpxsdate" => Ok(UtcTimingMethod::HttpXsDate),
            "httpiso" => Ok(UtcTimingMethod::HttpIso),
            "none" => Ok(UtcTimingMethod::None),
            other => Err(format!("unknown UTC timing method {:?}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseConfig {
    /// All path segments of the request URL, kept for Location rebuild.
    pub url_parts: Vec<String>,
    pub start_time_s: i64,
    pub stop_time_s: Option<i64>,
    pub time_shift_buffer_depth_s: i64,
    pub minimum_update_period_s: Option<i64>,
    pub suggested_presentation_delay_s: Option<i64>,
    pub periods_per_hour: Option<i64>,
    pub start_nr: Option<i64>,
    pub availability_time_offset_s: Option<f64>,
    pub availability_time_complete: bool,
    pub latency_target_ms: Option<u64>,
    pub utc_timing_methods: Vec<UtcTimingMethod>,
    pub add_location: bool,
    pub time_subs_stpp: Vec<String>,
    pub seg_timeline_time: bool,
    pub seg_timeline_nr: bool,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        ResponseConfig {
            url_parts: Vec::new(),
            start_time_s: 0,
            stop_time_s: None,
            time_shift_buffer_depth_s: DEFAULT_TIME_SHIFT_BUFFER_DEPTH_S,
            minimum_update_period_s: None,
            suggested_presentation_delay_s: None,
            periods_per_hour: None,
            start_nr: None,
            availability_time_offset_s: None,
            availability_time_complete: true,
            latency_target_ms: None,
            utc_timing_methods: Vec::new(),
            add_location: false,
            time_subs_stpp: Vec::new(),
            seg_timeline_time: false,
            seg_timeline_nr: false,
        }
    }
}

impl ResponseConfig {
    pub fn live_mpd_type(&self) -> LiveMpdType {
        if self.seg_timeline_time {
            LiveMpdType::TimelineTime
        } else if self.seg_timeline_nr {
            LiveMpdType::TimelineNumber
        } else {
            LiveMpdType::SegmentNumber
        }
    }

    /// Availability time offset in seconds; 0 when not configured, may be
    /// `f64::INFINITY`.
    pub fn availability_time_offset_s(&self) -> f64 {
        self.availability_time_offset_s.unwrap_or(0.0)
    }
}

fn parse_val<T>(key: &str, value: &str) -> Result<T, LiveSimError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse::<T>()
        .map_err(|e| LiveSimError::UrlConfig(format!("key={}, err={}", key, e)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, LiveSimError> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(LiveSimError::UrlConfig(format!(
            "key={}, err=not a boolean: {:?}",
            key, other
        ))),
    }
}

fn parse_ato(value: &str) -> Result<f64, LiveSimError> {
    if value == "inf" {
        return Ok(f64::INFINITY);
    }
    let ato: f64 = parse_val("ato", value)?;
    if ato < 0.0 {
        return Err(LiveSimError::UrlConfig(
            "key=ato, err=must not be negative".to_string(),
        ));
    }
    Ok(ato)
}

/// Consumes the `key_value` config segments of a request path.
///
/// `parts` are the full path segments including the leading empty segment
/// and the `livesim` prefix. Returns the configuration and the index of the
/// first content segment.
pub fn process_url_cfg(parts: &[&str], now_ms: i64) -> Result<(ResponseConfig, usize), LiveSimError> {
    let mut cfg = ResponseConfig {
        url_parts: parts.iter().map(|p| p.to_string()).collect(),
        ..Default::default()
    };
    let now_s = now_ms / 1000;

    let mut idx = 2;
    while idx < parts.len() {
        let Some((key, value)) = parts[idx].split_once('_') else {
            break;
        };
        match key {
            "start" => cfg.start_time_s = parse_val(key, value)?,
            "stop" => cfg.stop_time_s = Some(parse_val(key, value)?),
            "startrel" => {
                let rel: i64 = parse_val(key, value)?;
                cfg.start_time_s = now_s + rel;
            }
            "stoprel" => {
                let rel: i64 = parse_val(key, value)?;
                cfg.stop_time_s = Some(now_s + rel);
            }
            "tsbd" => cfg.time_shift_buffer_depth_s = parse_val(key, value)?,
            "mup" => cfg.minimum_update_period_s = Some(parse_val(key, value)?),
            "spd" => cfg.suggested_presentation_delay_s = Some(parse_val(key, value)?),
            "periodsperhour" => cfg.periods_per_hour = Some(parse_val(key, value)?),
            "startnr" => cfg.start_nr = Some(parse_val(key, value)?),
            "ato" => cfg.availability_time_offset_s = Some(parse_ato(value)?),
            "atc" => cfg.availability_time_complete = parse_flag(key, value)?,
            "ltgt" => cfg.latency_target_ms = Some(parse_val(key, value)?),
            "addlocation" => cfg.add_location = parse_flag(key, value)?,
            "segtimeline" => cfg.seg_timeline_time = parse_flag(key, value)?,
            "segtimelinenr" => cfg.seg_timeline_nr = parse_flag(key, value)?,
            "timesubsstpp" => {
                cfg.time_subs_stpp = value.split(',').map(|lang| lang.to_string()).collect();
            }
            "utc" => {
                cfg.utc_timing_methods = value
                    .split('-')
                    .map(|m| {
                        m.parse::<UtcTimingMethod>()
                            .map_err(|e| LiveSimError::UrlConfig(format!("key=utc, err={}", e)))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
            }
            _ => break,
        }
        idx += 1;
    }

    if idx >= parts.len() || parts[idx..].join("").is_empty() {
        return Err(LiveSimError::UrlConfig("no content part".to_string()));
    }

    Ok((cfg, idx))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(url: &str) -> Vec<&str> {
        url.split('/').collect()
    }

    #[test]
    fn plain_manifest_url() {
        let parts = split("/livesim/tsbd_1/asset.mpd");
        let (cfg, idx) = process_url_cfg(&parts, 0).unwrap();
        assert_eq!(cfg.start_time_s, 0);
        assert_eq!(cfg.time_shift_buffer_depth_s, 1);
        assert!(cfg.availability_time_complete);
        assert_eq!(cfg.live_mpd_type(), LiveMpdType::SegmentNumber);
        assert_eq!(parts[idx..].join("/"), "asset.mpd");
    }

    #[test]
    fn content_part_may_contain_underscores() {
        let parts = split("/livesim/tsbd_1/tsb_asset/V300.cmfv");
        let (_, idx) = process_url_cfg(&parts, 0).unwrap();
        assert_eq!(parts[idx..].join("/"), "tsb_asset/V300.cmfv");
    }

    #[test]
    fn bad_value_names_the_key() {
        let parts = split("/livesim/tsbd_a/asset.mpd");
        let err = process_url_cfg(&parts, 0).unwrap_err();
        assert!(err.to_string().starts_with("key=tsbd, err="));
    }

    #[test]
    fn config_only_url_has_no_content_part() {
        let parts = split("/livesim/tsbd_1");
        let err = process_url_cfg(&parts, 0).unwrap_err();
        assert_eq!(err.to_string(), "no content part");
    }

    #[test]
    fn relative_start_resolves_against_now() {
        let parts = split("/livesim/startrel_-20/asset/stream.mpd");
        let (cfg, _) = process_url_cfg(&parts, 100_000).unwrap();
        assert_eq!(cfg.start_time_s, 80);
    }

    #[test]
    fn timeline_modes_and_subs() {
        let parts = split("/livesim/segtimeline_1/timesubsstpp_en,sv/asset/stream.mpd");
        let (cfg, _) = process_url_cfg(&parts, 0).unwrap();
        assert_eq!(cfg.live_mpd_type(), LiveMpdType::TimelineTime);
        assert_eq!(cfg.time_subs_stpp, vec!["en", "sv"]);
    }

    #[test]
    fn utc_method_list_is_ordered() {
        let parts = split("/livesim/utc_direct-httpiso/asset/stream.mpd");
        let (cfg, _) = process_url_cfg(&parts, 0).unwrap();
        assert_eq!(
            cfg.utc_timing_methods,
            vec![UtcTimingMethod::Direct, UtcTimingMethod::HttpIso]
        );
    }

    #[test]
    fn unknown_utc_method_fails() {
        let parts = split("/livesim/utc_quantum/asset/stream.mpd");
        let err = process_url_cfg(&parts, 0).unwrap_err();
        assert!(err.to_string().starts_with("key=utc, err="));
    }

    #[test]
    fn infinite_ato_is_accepted() {
        let parts = split("/livesim/ato_inf/asset/stream.mpd");
        let (cfg, _) = process_url_cfg(&parts, 0).unwrap();
        assert!(cfg.availability_time_offset_s().is_infinite());
    }
}
