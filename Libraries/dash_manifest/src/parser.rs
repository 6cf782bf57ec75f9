//! Event-driven MPD parsing on top of `quick-xml`.

use crate::{
    parse_duration_ms, AdaptationSet, Descriptor, Latency, Mpd, Period, PlaybackRate,
    ProducerReferenceTime, Representation, SegmentTemplate, SegmentTimeline, ServiceDescription, S,
};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

pub type ParseError = Box<dyn std::error::Error + Send + Sync>;

/// Parses an MPD document into the tree model. Unknown attributes are kept,
/// unknown elements skipped.
pub fn parse_mpd(xml: &str) -> Result<Mpd, ParseError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut state = ParserState::default();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => state.open(e, false)?,
            Event::Empty(ref e) => state.open(e, true)?,
            Event::Text(ref e) => {
                let text = e.unescape()?.trim().to_string();
                state.text(&text);
            }
            Event::End(ref e) => {
                let name = e.name().to_owned();
                let tag = std::str::from_utf8(name.as_ref())?.to_string();
                state.close(&tag);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    state.mpd.ok_or_else(|| "no MPD element in document".into())
}

#[derive(Default)]
struct ParserState {
    mpd: Option<Mpd>,
    current_period: Option<Period>,
    current_set: Option<AdaptationSet>,
    current_rep: Option<Representation>,
    inside_rep: bool,
    current_template: Option<SegmentTemplate>,
    current_service: Option<ServiceDescription>,
    current_prt: Option<ProducerReferenceTime>,
    in_location: bool,
}

impl ParserState {
    fn open(&mut self, e: &BytesStart, empty: bool) -> Result<(), ParseError> {
        let name = e.name().to_owned();
        let tag = std::str::from_utf8(name.as_ref())?;
        match tag {
            "MPD" => self.mpd = Some(parse_mpd_attrs(e)?),
            "Location" => self.in_location = !empty,
            "ServiceDescription" => {
                let mut service = ServiceDescription::default();
                for (key, value) in attr_pairs(e)? {
                    if key == "id" {
                        service.id = value.parse()?;
                    }
                }
                if empty {
                    if let Some(mpd) = self.mpd.as_mut() {
                        mpd.service_descriptions.push(service);
                    }
                } else {
                    self.current_service = Some(service);
                }
            }
            "Latency" => {
                if let Some(service) = self.current_service.as_mut() {
                    service.latencies.push(parse_latency_attrs(e)?);
                }
            }
            "PlaybackRate" => {
                if let Some(service) = self.current_service.as_mut() {
                    let mut rate = PlaybackRate::default();
                    for (key, value) in attr_pairs(e)? {
                        match key.as_str() {
                            "min" => rate.min = value.parse()?,
                            "max" => rate.max = value.parse()?,
                            _ => {}
                        }
                    }
                    service.playback_rates.push(rate);
                }
            }
            "UTCTiming" => {
                let descriptor = parse_descriptor_attrs(e)?;
                if let Some(prt) = self.current_prt.as_mut() {
                    prt.utc_timing = Some(descriptor);
                } else if let Some(mpd) = self.mpd.as_mut() {
                    mpd.utc_timings.push(descriptor);
                }
            }
            "Period" => self.current_period = Some(parse_period_attrs(e)?),
            "AdaptationSet" => {
                self.inside_rep = false;
                self.current_set = Some(parse_adaptation_set_attrs(e)?);
            }
            "Role" => {
                if let Some(set) = self.current_set.as_mut() {
                    set.roles.push(parse_descriptor_attrs(e)?);
                }
            }
            "ProducerReferenceTime" => {
                let prt = parse_producer_reference_time_attrs(e)?;
                if empty {
                    if let Some(set) = self.current_set.as_mut() {
                        set.producer_reference_times.push(prt);
                    }
                } else {
                    self.current_prt = Some(prt);
                }
            }
            "Representation" => {
                self.inside_rep = true;
                self.current_rep = Some(parse_representation_attrs(e)?);
            }
            "SegmentTemplate" => {
                let st = parse_segment_template_attrs(e)?;
                if empty {
                    self.assign_template(st);
                } else {
                    self.current_template = Some(st);
                }
            }
            "SegmentTimeline" => {
                if let Some(st) = self.current_template.as_mut() {
                    st.segment_timeline = Some(SegmentTimeline::default());
                }
            }
            "S" => {
                if let Some(timeline) = self
                    .current_template
                    .as_mut()
                    .and_then(|st| st.segment_timeline.as_mut())
                {
                    timeline.entries.push(parse_s_attrs(e)?);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if self.in_location && !text.is_empty() {
            if let Some(mpd) = self.mpd.as_mut() {
                mpd.locations.push(text.to_string());
            }
        }
    }

    fn close(&mut self, tag: &str) {
        match tag {
            "Location" => self.in_location = false,
            "ServiceDescription" => {
                if let (Some(service), Some(mpd)) = (self.current_service.take(), self.mpd.as_mut()) {
                    mpd.service_descriptions.push(service);
                }
            }
            "ProducerReferenceTime" => {
                if let (Some(prt), Some(set)) = (self.current_prt.take(), self.current_set.as_mut()) {
                    set.producer_reference_times.push(prt);
                }
            }
            "SegmentTemplate" => {
                if let Some(st) = self.current_template.take() {
                    self.assign_template(st);
                }
            }
            "Representation" => {
                self.inside_rep = false;
                if let (Some(rep), Some(set)) = (self.current_rep.take(), self.current_set.as_mut()) {
                    set.representations.push(rep);
                }
            }
            "AdaptationSet" => {
                if let (Some(set), Some(period)) = (self.current_set.take(), self.current_period.as_mut()) {
                    period.adaptation_sets.push(set);
                }
            }
            "Period" => {
                if let (Some(period), Some(mpd)) = (self.current_period.take(), self.mpd.as_mut()) {
                    mpd.periods.push(period);
                }
            }
            _ => {}
        }
    }

    fn assign_template(&mut self, st: SegmentTemplate) {
        if self.inside_rep {
            if let Some(rep) = self.current_rep.as_mut() {
                rep.segment_template = Some(st);
                return;
            }
        }
        if let Some(set) = self.current_set.as_mut() {
            set.segment_template = Some(st);
        }
    }
}

fn attr_pairs(e: &BytesStart) -> Result<Vec<(String, String)>, ParseError> {
    let mut pairs = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
        let value = attr.unescape_value()?.to_string();
        pairs.push((key, value));
    }
    Ok(pairs)
}

fn parse_bool(value: &str) -> bool {
    value == "true" || value == "1"
}

fn parse_float(value: &str) -> Result<f64, ParseError> {
    if value == "INF" {
        Ok(f64::INFINITY)
    } else {
        Ok(value.parse::<f64>()?)
    }
}

fn parse_mpd_attrs(e: &BytesStart) -> Result<Mpd, ParseError> {
    let mut mpd = Mpd::default();
    for (key, value) in attr_pairs(e)? {
        match key.as_str() {
            "profiles" => mpd.profiles = Some(value),
            "type" => mpd.mpd_type = Some(value),
            "availabilityStartTime" => mpd.availability_start_time = Some(value),
            "publishTime" => mpd.publish_time = Some(value),
            "mediaPresentationDuration" => mpd.media_presentation_duration_ms = parse_duration_ms(&value),
            "minimumUpdatePeriod" => mpd.minimum_update_period_ms = parse_duration_ms(&value),
            "minBufferTime" => mpd.min_buffer_time_ms = parse_duration_ms(&value),
            "timeShiftBufferDepth" => mpd.time_shift_buffer_depth_ms = parse_duration_ms(&value),
            "suggestedPresentationDelay" => mpd.suggested_presentation_delay_ms = parse_duration_ms(&value),
            "maxSegmentDuration" => mpd.max_segment_duration_ms = parse_duration_ms(&value),
            // The writer owns the namespace declarations.
            "xmlns" | "xmlns:xsi" | "xsi:schemaLocation" => {}
            _ => mpd.extra_attrs.push((key, value)),
        }
    }
    Ok(mpd)
}

fn parse_period_attrs(e: &BytesStart) -> Result<Period, ParseError> {
    let mut period = Period::default();
    for (key, value) in attr_pairs(e)? {
        match key.as_str() {
            "id" => period.id = Some(value),
            "start" => period.start_ms = parse_duration_ms(&value),
            "duration" => period.duration_ms = parse_duration_ms(&value),
            _ => period.extra_attrs.push((key, value)),
        }
    }
    Ok(period)
}

fn parse_adaptation_set_attrs(e: &BytesStart) -> Result<AdaptationSet, ParseError> {
    let mut set = AdaptationSet::default();
    for (key, value) in attr_pairs(e)? {
        match key.as_str() {
            "id" => set.id = Some(value.parse()?),
            "lang" => set.lang = Some(value),
            "contentType" => set.content_type = Some(value),
            "mimeType" => set.mime_type = Some(value),
            "codecs" => set.codecs = Some(value),
            "segmentAlignment" => set.segment_alignment = Some(parse_bool(&value)),
            "startWithSAP" => set.start_with_sap = Some(value.parse()?),
            _ => set.extra_attrs.push((key, value)),
        }
    }
    Ok(set)
}

fn parse_representation_attrs(e: &BytesStart) -> Result<Representation, ParseError> {
    let mut rep = Representation::default();
    for (key, value) in attr_pairs(e)? {
        match key.as_str() {
            "id" => rep.id = value,
            "bandwidth" => rep.bandwidth = Some(value.parse()?),
            "codecs" => rep.codecs = Some(value),
            "mimeType" => rep.mime_type = Some(value),
            "width" => rep.width = Some(value.parse()?),
            "height" => rep.height = Some(value.parse()?),
            "frameRate" => rep.frame_rate = Some(value),
            "audioSamplingRate" => rep.audio_sampling_rate = Some(value),
            "sar" => rep.sar = Some(value),
            "startWithSAP" => rep.start_with_sap = Some(value.parse()?),
            _ => rep.extra_attrs.push((key, value)),
        }
    }
    Ok(rep)
}

fn parse_segment_template_attrs(e: &BytesStart) -> Result<SegmentTemplate, ParseError> {
    let mut st = SegmentTemplate::default();
    for (key, value) in attr_pairs(e)? {
        match key.as_str() {
            "timescale" => st.timescale = Some(value.parse()?),
            "duration" => st.duration = Some(value.parse()?),
            "startNumber" => st.start_number = Some(value.parse()?),
            "presentationTimeOffset" => st.presentation_time_offset = Some(value.parse()?),
            "initialization" => st.initialization = Some(value),
            "media" => st.media = Some(value),
            "availabilityTimeOffset" => st.availability_time_offset = Some(parse_float(&value)?),
            "availabilityTimeComplete" => st.availability_time_complete = Some(parse_bool(&value)),
            _ => st.extra_attrs.push((key, value)),
        }
    }
    Ok(st)
}

fn parse_s_attrs(e: &BytesStart) -> Result<S, ParseError> {
    let mut s = S::default();
    for (key, value) in attr_pairs(e)? {
        match key.as_str() {
            "t" => s.t = Some(value.parse()?),
            "d" => s.d = value.parse()?,
            "r" => s.r = value.parse()?,
            _ => {}
        }
    }
    Ok(s)
}

fn parse_descriptor_attrs(e: &BytesStart) -> Result<Descriptor, ParseError> {
    let mut descriptor = Descriptor::default();
    for (key, value) in attr_pairs(e)? {
        match key.as_str() {
            "schemeIdUri" => descriptor.scheme_id_uri = value,
            "value" => descriptor.value = value,
            _ => {}
        }
    }
    Ok(descriptor)
}

fn parse_latency_attrs(e: &BytesStart) -> Result<Latency, ParseError> {
    let mut latency = Latency::default();
    for (key, value) in attr_pairs(e)? {
        match key.as_str() {
            "referenceId" => latency.reference_id = value.parse()?,
            "target" => latency.target_ms = Some(value.parse()?),
            "min" => latency.min_ms = Some(value.parse()?),
            "max" => latency.max_ms = Some(value.parse()?),
            _ => {}
        }
    }
    Ok(latency)
}

fn parse_producer_reference_time_attrs(e: &BytesStart) -> Result<ProducerReferenceTime, ParseError> {
    let mut prt = ProducerReferenceTime::default();
    for (key, value) in attr_pairs(e)? {
        match key.as_str() {
            "id" => prt.id = value.parse()?,
            "presentationTime" => prt.presentation_time = value.parse()?,
            "type" => prt.prt_type = value,
            "wallClockTime" => prt.wall_clock_time = value,
            _ => {}
        }
    }
    Ok(prt)
}
