use crate::{format_fourcc, peek_box_header, read_u32_be, read_u64_be, read_version_and_flags, write_version_and_flags};

use super::generic::Mp4Box;

pub const TFHD_BASE_DATA_OFFSET_PRESENT: u32 = 0x000001;
pub const TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT: u32 = 0x000002;
pub const TFHD_DEFAULT_SAMPLE_DURATION_PRESENT: u32 = 0x000008;
pub const TFHD_DEFAULT_SAMPLE_SIZE_PRESENT: u32 = 0x000010;
pub const TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT: u32 = 0x000020;
pub const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

// The `TfhdBox` struct represents a Track Fragment Header Box.
// The flags govern which optional fields are present; the present fields
// override the `trex` defaults for the whole fragment.
#[derive(Clone)]
pub struct TfhdBox {
    pub version: u8,
    pub flags: u32,
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
}

impl Default for TfhdBox {
    fn default() -> Self {
        TfhdBox {
            version: 0,
            flags: TFHD_DEFAULT_BASE_IS_MOOF,
            track_id: 1,
            base_data_offset: None,
            sample_description_index: None,
            default_sample_duration: None,
            default_sample_size: None,
            default_sample_flags: None,
        }
    }
}

impl std::fmt::Debug for TfhdBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TfhdBox")
            .field("box_size", &self.box_size())
            .field("box_type", &format_fourcc(&self.box_type()))
            .field("version", &self.version)
            .field("flags", &format!("0x{:06X}", self.flags))
            .field("track_id", &self.track_id)
            .field("base_data_offset", &self.base_data_offset)
            .field("sample_description_index", &self.sample_description_index)
            .field("default_sample_duration", &self.default_sample_duration)
            .field("default_sample_size", &self.default_sample_size)
            .field("default_sample_flags", &self.default_sample_flags)
            .finish()
    }
}

impl Mp4Box for TfhdBox {
    fn box_type(&self) -> [u8; 4] {
        *b"tfhd"
    }

    fn box_size(&self) -> u32 {
        let mut size = 8 + 4 + 4; // header + version/flags + track_id
        if self.flags & TFHD_BASE_DATA_OFFSET_PRESENT != 0 {
            size += 8;
        }
        if self.flags & TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT != 0 {
            size += 4;
        }
        if self.flags & TFHD_DEFAULT_SAMPLE_DURATION_PRESENT != 0 {
            size += 4;
        }
        if self.flags & TFHD_DEFAULT_SAMPLE_SIZE_PRESENT != 0 {
            size += 4;
        }
        if self.flags & TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT != 0 {
            size += 4;
        }
        size
    }

    fn write_box(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.box_size().to_be_bytes());
        buffer.extend_from_slice(&self.box_type());
        write_version_and_flags(buffer, self.version, self.flags);
        buffer.extend_from_slice(&self.track_id.to_be_bytes());

        if self.flags & TFHD_BASE_DATA_OFFSET_PRESENT != 0 {
            buffer.extend_from_slice(&self.base_data_offset.unwrap_or(0).to_be_bytes());
        }
        if self.flags & TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT != 0 {
            buffer.extend_from_slice(&self.sample_description_index.unwrap_or(1).to_be_bytes());
        }
        if self.flags & TFHD_DEFAULT_SAMPLE_DURATION_PRESENT != 0 {
            buffer.extend_from_slice(&self.default_sample_duration.unwrap_or(0).to_be_bytes());
        }
        if self.flags & TFHD_DEFAULT_SAMPLE_SIZE_PRESENT != 0 {
            buffer.extend_from_slice(&self.default_sample_size.unwrap_or(0).to_be_bytes());
        }
        if self.flags & TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT != 0 {
            buffer.extend_from_slice(&self.default_sample_flags.unwrap_or(0).to_be_bytes());
        }
    }

    fn read_box(data: &[u8]) -> Result<(Self, usize), String> {
        let (size, btype) = peek_box_header(data, 0)?;
        if &btype != b"tfhd" {
            return Err("Not a TFHD box".into());
        }

        let (version, flags) = read_version_and_flags(data, 8)?;
        let mut offset = 12;

        let track_id = read_u32_be(data, offset)?;
        offset += 4;

        let base_data_offset = if flags & TFHD_BASE_DATA_OFFSET_PRESENT != 0 {
            let val = read_u64_be(data, offset)?;
            offset += 8;
            Some(val)
        } else {
            None
        };

        let sample_description_index = if flags & TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT != 0 {
            let val = read_u32_be(data, offset)?;
            offset += 4;
            Some(val)
        } else {
            None
        };

        let default_sample_duration = if flags & TFHD_DEFAULT_SAMPLE_DURATION_PRESENT != 0 {
            let val = read_u32_be(data, offset)?;
            offset += 4;
            Some(val)
        } else {
            None
        };

        let default_sample_size = if flags & TFHD_DEFAULT_SAMPLE_SIZE_PRESENT != 0 {
            let val = read_u32_be(data, offset)?;
            offset += 4;
            Some(val)
        } else {
            None
        };

        let default_sample_flags = if flags & TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT != 0 {
            Some(read_u32_be(data, offset)?)
        } else {
            None
        };

        Ok((
            TfhdBox {
                version,
                flags,
                track_id,
                base_data_offset,
                sample_description_index,
                default_sample_duration,
                default_sample_size,
                default_sample_flags,
            },
            size,
        ))
    }
}
