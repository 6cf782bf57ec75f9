use crate::{format_fourcc, peek_box_header, read_u32_be, read_version_and_flags, write_version_and_flags};

use super::generic::Mp4Box;

pub const TRUN_DATA_OFFSET_PRESENT: u32 = 0x000001;
pub const TRUN_FIRST_SAMPLE_FLAGS_PRESENT: u32 = 0x000004;
pub const TRUN_SAMPLE_DURATION_PRESENT: u32 = 0x000100;
pub const TRUN_SAMPLE_SIZE_PRESENT: u32 = 0x000200;
pub const TRUN_SAMPLE_FLAGS_PRESENT: u32 = 0x000400;
pub const TRUN_SAMPLE_CTS_OFFSET_PRESENT: u32 = 0x000800;

/// One row of a track run. Fields are `None` when the corresponding
/// per-sample flag is absent and the fragment/track default applies.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct TrunSample {
    pub dur: Option<u32>,
    pub size: Option<u32>,
    pub flags: Option<u32>,
    pub cts_offset: Option<i32>,
}

impl std::fmt::Debug for TrunSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrunSample")
            .field("dur", &self.dur)
            .field("size", &self.size)
            .field("flags", &self.flags.map(|fl| format!("0x{:08X}", fl)))
            .field("cts_offset", &self.cts_offset)
            .finish()
    }
}

/// The `TrunBox` struct represents a Track Fragment Run Box.
/// The flags decide which of the optional header fields and which
/// per-sample columns are present. Version 1 stores composition time
/// offsets as signed values, version 0 as unsigned.
#[derive(Clone)]
pub struct TrunBox {
    pub version: u8,
    pub flags: u32,
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<u32>,
    pub samples: Vec<TrunSample>,
}

impl Default for TrunBox {
    fn default() -> Self {
        TrunBox {
            version: 0,
            flags: TRUN_DATA_OFFSET_PRESENT | TRUN_SAMPLE_DURATION_PRESENT | TRUN_SAMPLE_SIZE_PRESENT,
            data_offset: Some(0),
            first_sample_flags: None,
            samples: Vec::new(),
        }
    }
}

impl std::fmt::Debug for TrunBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrunBox")
            .field("box_size", &self.box_size())
            .field("box_type", &format_fourcc(&self.box_type()))
            .field("version", &self.version)
            .field("flags", &format!("0x{:06X}", self.flags))
            .field("data_offset", &self.data_offset)
            .field("first_sample_flags", &self.first_sample_flags)
            .field("sample_count", &self.samples.len())
            .finish()
    }
}

impl TrunBox {
    fn bytes_per_sample(&self) -> u32 {
        let mut n = 0;
        if self.flags & TRUN_SAMPLE_DURATION_PRESENT != 0 {
            n += 4;
        }
        if self.flags & TRUN_SAMPLE_SIZE_PRESENT != 0 {
            n += 4;
        }
        if self.flags & TRUN_SAMPLE_FLAGS_PRESENT != 0 {
            n += 4;
        }
        if self.flags & TRUN_SAMPLE_CTS_OFFSET_PRESENT != 0 {
            n += 4;
        }
        n
    }
}

impl Mp4Box for TrunBox {
    fn box_type(&self) -> [u8; 4] {
        *b"trun"
    }

    fn box_size(&self) -> u32 {
        let mut size = 8 + 4 + 4; // header + version/flags + sample_count
        if self.flags & TRUN_DATA_OFFSET_PRESENT != 0 {
            size += 4;
        }
        if self.flags & TRUN_FIRST_SAMPLE_FLAGS_PRESENT != 0 {
            size += 4;
        }
        size + self.bytes_per_sample() * self.samples.len() as u32
    }

    fn write_box(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.box_size().to_be_bytes());
        buffer.extend_from_slice(&self.box_type());
        write_version_and_flags(buffer, self.version, self.flags);
        buffer.extend_from_slice(&(self.samples.len() as u32).to_be_bytes());
        if self.flags & TRUN_DATA_OFFSET_PRESENT != 0 {
            buffer.extend_from_slice(&self.data_offset.unwrap_or(0).to_be_bytes());
        }
        if self.flags & TRUN_FIRST_SAMPLE_FLAGS_PRESENT != 0 {
            buffer.extend_from_slice(&self.first_sample_flags.unwrap_or(0).to_be_bytes());
        }
        for sample in &self.samples {
            if self.flags & TRUN_SAMPLE_DURATION_PRESENT != 0 {
                buffer.extend_from_slice(&sample.dur.unwrap_or(0).to_be_bytes());
            }
            if self.flags & TRUN_SAMPLE_SIZE_PRESENT != 0 {
                buffer.extend_from_slice(&sample.size.unwrap_or(0).to_be_bytes());
            }
            if self.flags & TRUN_SAMPLE_FLAGS_PRESENT != 0 {
                buffer.extend_from_slice(&sample.flags.unwrap_or(0).to_be_bytes());
            }
            if self.flags & TRUN_SAMPLE_CTS_OFFSET_PRESENT != 0 {
                buffer.extend_from_slice(&(sample.cts_offset.unwrap_or(0) as u32).to_be_bytes());
            }
        }
    }

    fn read_box(data: &[u8]) -> Result<(Self, usize), String> {
        let (size, btype) = peek_box_header(data, 0)?;
        if &btype != b"trun" {
            return Err("Not a TRUN box".into());
        }

        let (version, flags) = read_version_and_flags(data, 8)?;
        let sample_count = read_u32_be(data, 12)? as usize;
        let mut offset = 16;

        let data_offset = if flags & TRUN_DATA_OFFSET_PRESENT != 0 {
            let val = read_u32_be(data, offset)? as i32;
            offset += 4;
            Some(val)
        } else {
            None
        };

        let first_sample_flags = if flags & TRUN_FIRST_SAMPLE_FLAGS_PRESENT != 0 {
            let val = read_u32_be(data, offset)?;
            offset += 4;
            Some(val)
        } else {
            None
        };

        let mut samples = Vec::with_capacity(sample_count);
        for _ in 0..sample_count {
            let mut sample = TrunSample::default();
            if flags & TRUN_SAMPLE_DURATION_PRESENT != 0 {
                sample.dur = Some(read_u32_be(data, offset)?);
                offset += 4;
            }
            if flags & TRUN_SAMPLE_SIZE_PRESENT != 0 {
                sample.size = Some(read_u32_be(data, offset)?);
                offset += 4;
            }
            if flags & TRUN_SAMPLE_FLAGS_PRESENT != 0 {
                sample.flags = Some(read_u32_be(data, offset)?);
                offset += 4;
            }
            if flags & TRUN_SAMPLE_CTS_OFFSET_PRESENT != 0 {
                // Version 0 carries the offset unsigned; the cast keeps the bits.
                sample.cts_offset = Some(read_u32_be(data, offset)? as i32);
                offset += 4;
            }
            samples.push(sample);
        }

        if offset != size {
            return Err(format!(
                "TRUN box size mismatch: parsed {} of {} bytes",
                offset, size
            ));
        }

        Ok((
            TrunBox {
                version,
                flags,
                data_offset,
                first_sample_flags,
                samples,
            },
            size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_sample_round_trip() {
        let trun = TrunBox {
            version: 0,
            flags: TRUN_DATA_OFFSET_PRESENT | TRUN_SAMPLE_DURATION_PRESENT | TRUN_SAMPLE_SIZE_PRESENT,
            data_offset: Some(196),
            first_sample_flags: None,
            samples: vec![
                TrunSample {
                    dur: Some(3000),
                    size: Some(1200),
                    ..Default::default()
                },
                TrunSample {
                    dur: Some(3000),
                    size: Some(800),
                    ..Default::default()
                },
            ],
        };
        let mut buf = Vec::new();
        trun.write_box(&mut buf);
        assert_eq!(buf.len(), trun.box_size() as usize);

        let (parsed, consumed) = TrunBox::read_box(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(parsed.data_offset, Some(196));
        assert_eq!(parsed.samples, trun.samples);
    }

    #[test]
    fn negative_cts_offset_survives_version_1() {
        let trun = TrunBox {
            version: 1,
            flags: TRUN_SAMPLE_SIZE_PRESENT | TRUN_SAMPLE_CTS_OFFSET_PRESENT,
            data_offset: None,
            first_sample_flags: None,
            samples: vec![TrunSample {
                size: Some(100),
                cts_offset: Some(-1500),
                ..Default::default()
            }],
        };
        let mut buf = Vec::new();
        trun.write_box(&mut buf);
        let (parsed, _) = TrunBox::read_box(&buf).unwrap();
        assert_eq!(parsed.samples[0].cts_offset, Some(-1500));
    }
}
