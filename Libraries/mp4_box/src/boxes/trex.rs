use crate::{format_fourcc, peek_box_header, read_u32_be, read_version_and_flags, write_version_and_flags};

use super::generic::Mp4Box;

/// The `TrexBox` struct represents a Track Extends Box (`trex`).
/// It lives in the init segment (`moov/mvex`) and supplies the sample
/// defaults that fragments fall back to when neither `trun` rows nor the
/// `tfhd` carry explicit values.
#[derive(Clone)]
pub struct TrexBox {
    pub version: u8,
    pub flags: u32,
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl Default for TrexBox {
    fn default() -> Self {
        TrexBox {
            version: 0,
            flags: 0,
            track_id: 1,
            default_sample_description_index: 1,
            default_sample_duration: 0,
            default_sample_size: 0,
            default_sample_flags: 0,
        }
    }
}

impl std::fmt::Debug for TrexBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrexBox")
            .field("box_size", &self.box_size())
            .field("box_type", &format_fourcc(&self.box_type()))
            .field("version", &self.version)
            .field("flags", &format!("0x{:06X}", self.flags))
            .field("track_id", &self.track_id)
            .field(
                "default_sample_description_index",
                &self.default_sample_description_index,
            )
            .field("default_sample_duration", &self.default_sample_duration)
            .field("default_sample_size", &self.default_sample_size)
            .field(
                "default_sample_flags",
                &format!("0x{:08X}", self.default_sample_flags),
            )
            .finish()
    }
}

impl Mp4Box for TrexBox {
    fn box_type(&self) -> [u8; 4] {
        *b"trex"
    }

    fn box_size(&self) -> u32 {
        8 + 4 + 5 * 4 // header + version/flags + 5 fields
    }

    fn write_box(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.box_size().to_be_bytes());
        buffer.extend_from_slice(&self.box_type());
        write_version_and_flags(buffer, self.version, self.flags);
        buffer.extend_from_slice(&self.track_id.to_be_bytes());
        buffer.extend_from_slice(&self.default_sample_description_index.to_be_bytes());
        buffer.extend_from_slice(&self.default_sample_duration.to_be_bytes());
        buffer.extend_from_slice(&self.default_sample_size.to_be_bytes());
        buffer.extend_from_slice(&self.default_sample_flags.to_be_bytes());
    }

    fn read_box(data: &[u8]) -> Result<(Self, usize), String> {
        let (size, btype) = peek_box_header(data, 0)?;
        if &btype != b"trex" {
            return Err("Not a TREX box".into());
        }
        if size < 32 {
            return Err("TREX box too small".into());
        }

        let (version, flags) = read_version_and_flags(data, 8)?;
        Ok((
            TrexBox {
                version,
                flags,
                track_id: read_u32_be(data, 12)?,
                default_sample_description_index: read_u32_be(data, 16)?,
                default_sample_duration: read_u32_be(data, 20)?,
                default_sample_size: read_u32_be(data, 24)?,
                default_sample_flags: read_u32_be(data, 28)?,
            },
            size,
        ))
    }
}
