//! MPD serialization with `quick-xml` events.

use crate::{
    format_date_time_ms, format_duration_ms, format_float_attr, AdaptationSet, Descriptor, Mpd,
    Period, ProducerReferenceTime, Representation, SegmentTemplate, ServiceDescription,
};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

pub type WriteError = Box<dyn std::error::Error + Send + Sync>;

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn push_opt(tag: &mut BytesStart, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        tag.push_attribute((key, v.as_str()));
    }
}

fn push_opt_duration(tag: &mut BytesStart, key: &str, ms: Option<u64>) {
    if let Some(ms) = ms {
        tag.push_attribute((key, format_duration_ms(ms).as_str()));
    }
}

/// Serializes the MPD tree to an XML document string.
pub fn write_mpd(mpd: &Mpd) -> Result<String, WriteError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut root = BytesStart::new("MPD");
    root.push_attribute(("xmlns", "urn:mpeg:dash:schema:mpd:2011"));
    push_opt(&mut root, "profiles", &mpd.profiles);
    push_opt(&mut root, "type", &mpd.mpd_type);
    push_opt(&mut root, "availabilityStartTime", &mpd.availability_start_time);
    push_opt(&mut root, "publishTime", &mpd.publish_time);
    push_opt_duration(&mut root, "mediaPresentationDuration", mpd.media_presentation_duration_ms);
    push_opt_duration(&mut root, "minimumUpdatePeriod", mpd.minimum_update_period_ms);
    push_opt_duration(&mut root, "minBufferTime", mpd.min_buffer_time_ms);
    push_opt_duration(&mut root, "timeShiftBufferDepth", mpd.time_shift_buffer_depth_ms);
    push_opt_duration(&mut root, "suggestedPresentationDelay", mpd.suggested_presentation_delay_ms);
    push_opt_duration(&mut root, "maxSegmentDuration", mpd.max_segment_duration_ms);
    for (key, value) in &mpd.extra_attrs {
        root.push_attribute((key.as_str(), value.as_str()));
    }
    writer.write_event(Event::Start(root))?;

    for location in &mpd.locations {
        writer.write_event(Event::Start(BytesStart::new("Location")))?;
        writer.write_event(Event::Text(BytesText::new(location)))?;
        writer.write_event(Event::End(BytesEnd::new("Location")))?;
    }

    for service in &mpd.service_descriptions {
        write_service_description(&mut writer, service)?;
    }

    for period in &mpd.periods {
        write_period(&mut writer, period)?;
    }

    for timing in &mpd.utc_timings {
        write_descriptor(&mut writer, "UTCTiming", timing)?;
    }

    writer.write_event(Event::End(BytesEnd::new("MPD")))?;

    let bytes = writer.into_inner().into_inner();
    Ok(String::from_utf8(bytes)?)
}

fn write_descriptor(writer: &mut XmlWriter, tag_name: &str, descriptor: &Descriptor) -> Result<(), WriteError> {
    let mut tag = BytesStart::new(tag_name);
    tag.push_attribute(("schemeIdUri", descriptor.scheme_id_uri.as_str()));
    if !descriptor.value.is_empty() {
        tag.push_attribute(("value", descriptor.value.as_str()));
    }
    writer.write_event(Event::Empty(tag))?;
    Ok(())
}

fn write_service_description(writer: &mut XmlWriter, service: &ServiceDescription) -> Result<(), WriteError> {
    let mut tag = BytesStart::new("ServiceDescription");
    tag.push_attribute(("id", service.id.to_string().as_str()));
    writer.write_event(Event::Start(tag))?;
    for latency in &service.latencies {
        let mut l = BytesStart::new("Latency");
        l.push_attribute(("referenceId", latency.reference_id.to_string().as_str()));
        if let Some(target) = latency.target_ms {
            l.push_attribute(("target", target.to_string().as_str()));
        }
        if let Some(min) = latency.min_ms {
            l.push_attribute(("min", min.to_string().as_str()));
        }
        if let Some(max) = latency.max_ms {
            l.push_attribute(("max", max.to_string().as_str()));
        }
        writer.write_event(Event::Empty(l))?;
    }
    for rate in &service.playback_rates {
        let mut r = BytesStart::new("PlaybackRate");
        r.push_attribute(("min", format_float_attr(rate.min).as_str()));
        r.push_attribute(("max", format_float_attr(rate.max).as_str()));
        writer.write_event(Event::Empty(r))?;
    }
    writer.write_event(Event::End(BytesEnd::new("ServiceDescription")))?;
    Ok(())
}

fn write_period(writer: &mut XmlWriter, period: &Period) -> Result<(), WriteError> {
    let mut tag = BytesStart::new("Period");
    push_opt(&mut tag, "id", &period.id);
    push_opt_duration(&mut tag, "start", period.start_ms);
    push_opt_duration(&mut tag, "duration", period.duration_ms);
    for (key, value) in &period.extra_attrs {
        tag.push_attribute((key.as_str(), value.as_str()));
    }
    if period.adaptation_sets.is_empty() {
        writer.write_event(Event::Empty(tag))?;
        return Ok(());
    }
    writer.write_event(Event::Start(tag))?;
    for set in &period.adaptation_sets {
        write_adaptation_set(writer, set)?;
    }
    writer.write_event(Event::End(BytesEnd::new("Period")))?;
    Ok(())
}

fn write_adaptation_set(writer: &mut XmlWriter, set: &AdaptationSet) -> Result<(), WriteError> {
    let mut tag = BytesStart::new("AdaptationSet");
    if let Some(id) = set.id {
        tag.push_attribute(("id", id.to_string().as_str()));
    }
    push_opt(&mut tag, "contentType", &set.content_type);
    push_opt(&mut tag, "lang", &set.lang);
    push_opt(&mut tag, "mimeType", &set.mime_type);
    push_opt(&mut tag, "codecs", &set.codecs);
    if let Some(aligned) = set.segment_alignment {
        tag.push_attribute(("segmentAlignment", if aligned { "true" } else { "false" }));
    }
    if let Some(sap) = set.start_with_sap {
        tag.push_attribute(("startWithSAP", sap.to_string().as_str()));
    }
    for (key, value) in &set.extra_attrs {
        tag.push_attribute((key.as_str(), value.as_str()));
    }
    writer.write_event(Event::Start(tag))?;

    for role in &set.roles {
        write_descriptor(writer, "Role", role)?;
    }
    for prt in &set.producer_reference_times {
        write_producer_reference_time(writer, prt)?;
    }
    if let Some(ref st) = set.segment_template {
        write_segment_template(writer, st)?;
    }
    for rep in &set.representations {
        write_representation(writer, rep)?;
    }

    writer.write_event(Event::End(BytesEnd::new("AdaptationSet")))?;
    Ok(())
}

fn write_producer_reference_time(writer: &mut XmlWriter, prt: &ProducerReferenceTime) -> Result<(), WriteError> {
    let mut tag = BytesStart::new("ProducerReferenceTime");
    tag.push_attribute(("id", prt.id.to_string().as_str()));
    tag.push_attribute(("presentationTime", prt.presentation_time.to_string().as_str()));
    if !prt.prt_type.is_empty() {
        tag.push_attribute(("type", prt.prt_type.as_str()));
    }
    tag.push_attribute(("wallClockTime", prt.wall_clock_time.as_str()));
    match prt.utc_timing {
        Some(ref timing) => {
            writer.write_event(Event::Start(tag))?;
            write_descriptor(writer, "UTCTiming", timing)?;
            writer.write_event(Event::End(BytesEnd::new("ProducerReferenceTime")))?;
        }
        None => {
            writer.write_event(Event::Empty(tag))?;
        }
    }
    Ok(())
}

fn write_segment_template(writer: &mut XmlWriter, st: &SegmentTemplate) -> Result<(), WriteError> {
    let mut tag = BytesStart::new("SegmentTemplate");
    if let Some(timescale) = st.timescale {
        tag.push_attribute(("timescale", timescale.to_string().as_str()));
    }
    if let Some(duration) = st.duration {
        tag.push_attribute(("duration", duration.to_string().as_str()));
    }
    if let Some(nr) = st.start_number {
        tag.push_attribute(("startNumber", nr.to_string().as_str()));
    }
    if let Some(pto) = st.presentation_time_offset {
        tag.push_attribute(("presentationTimeOffset", pto.to_string().as_str()));
    }
    push_opt(&mut tag, "initialization", &st.initialization);
    push_opt(&mut tag, "media", &st.media);
    if let Some(ato) = st.availability_time_offset {
        tag.push_attribute(("availabilityTimeOffset", format_float_attr(ato).as_str()));
    }
    if let Some(atc) = st.availability_time_complete {
        tag.push_attribute(("availabilityTimeComplete", if atc { "true" } else { "false" }));
    }
    for (key, value) in &st.extra_attrs {
        tag.push_attribute((key.as_str(), value.as_str()));
    }

    match st.segment_timeline {
        Some(ref timeline) => {
            writer.write_event(Event::Start(tag))?;
            writer.write_event(Event::Start(BytesStart::new("SegmentTimeline")))?;
            for entry in &timeline.entries {
                let mut s = BytesStart::new("S");
                if let Some(t) = entry.t {
                    s.push_attribute(("t", t.to_string().as_str()));
                }
                s.push_attribute(("d", entry.d.to_string().as_str()));
                if entry.r != 0 {
                    s.push_attribute(("r", entry.r.to_string().as_str()));
                }
                writer.write_event(Event::Empty(s))?;
            }
            writer.write_event(Event::End(BytesEnd::new("SegmentTimeline")))?;
            writer.write_event(Event::End(BytesEnd::new("SegmentTemplate")))?;
        }
        None => {
            writer.write_event(Event::Empty(tag))?;
        }
    }
    Ok(())
}

fn write_representation(writer: &mut XmlWriter, rep: &Representation) -> Result<(), WriteError> {
    let mut tag = BytesStart::new("Representation");
    tag.push_attribute(("id", rep.id.as_str()));
    if let Some(bandwidth) = rep.bandwidth {
        tag.push_attribute(("bandwidth", bandwidth.to_string().as_str()));
    }
    push_opt(&mut tag, "codecs", &rep.codecs);
    push_opt(&mut tag, "mimeType", &rep.mime_type);
    if let Some(width) = rep.width {
        tag.push_attribute(("width", width.to_string().as_str()));
    }
    if let Some(height) = rep.height {
        tag.push_attribute(("height", height.to_string().as_str()));
    }
    push_opt(&mut tag, "frameRate", &rep.frame_rate);
    push_opt(&mut tag, "audioSamplingRate", &rep.audio_sampling_rate);
    push_opt(&mut tag, "sar", &rep.sar);
    if let Some(sap) = rep.start_with_sap {
        tag.push_attribute(("startWithSAP", sap.to_string().as_str()));
    }
    for (key, value) in &rep.extra_attrs {
        tag.push_attribute((key.as_str(), value.as_str()));
    }
    match rep.segment_template {
        Some(ref st) => {
            writer.write_event(Event::Start(tag))?;
            write_segment_template(writer, st)?;
            writer.write_event(Event::End(BytesEnd::new("Representation")))?;
        }
        None => {
            writer.write_event(Event::Empty(tag))?;
        }
    }
    Ok(())
}

/// Formats unix seconds as an xs:dateTime (UTC). Convenience for callers
/// that track availability starts in whole seconds.
pub fn date_time_from_s(seconds: i64) -> String {
    format_date_time_ms(seconds * 1000)
}
