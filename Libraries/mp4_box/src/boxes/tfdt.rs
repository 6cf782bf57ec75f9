use crate::{format_fourcc, peek_box_header, read_u32_be, read_u64_be, read_version_and_flags, write_version_and_flags};

use super::generic::Mp4Box;

// The `TfdtBox` struct represents a Track Fragment Decode Time Box.
// `base_media_decode_time` is the decode time of the first sample of the
// fragment, in media timescale units. Version 0 stores it in 32 bits,
// version 1 in 64 bits; the version read from the source is preserved on
// write so a rewrite with an unchanged value is byte-identical.
#[derive(Default, Clone)]
pub struct TfdtBox {
    pub version: u8,
    pub flags: u32,
    pub base_media_decode_time: u64,
}

impl std::fmt::Debug for TfdtBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TfdtBox")
            .field("box_size", &self.box_size())
            .field("box_type", &format_fourcc(&self.box_type()))
            .field("version", &self.version)
            .field("flags", &self.flags)
            .field("base_media_decode_time", &self.base_media_decode_time)
            .finish()
    }
}

impl Mp4Box for TfdtBox {
    fn box_type(&self) -> [u8; 4] {
        *b"tfdt"
    }

    fn box_size(&self) -> u32 {
        8 + 4 + if self.version == 1 { 8 } else { 4 }
    }

    fn write_box(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.box_size().to_be_bytes());
        buffer.extend_from_slice(&self.box_type());
        write_version_and_flags(buffer, self.version, self.flags);
        if self.version == 1 {
            buffer.extend_from_slice(&self.base_media_decode_time.to_be_bytes());
        } else {
            buffer.extend_from_slice(&(self.base_media_decode_time as u32).to_be_bytes());
        }
    }

    fn read_box(data: &[u8]) -> Result<(Self, usize), String> {
        let (size, btype) = peek_box_header(data, 0)?;
        if &btype != b"tfdt" {
            return Err("Not a TFDT box".into());
        }

        let (version, flags) = read_version_and_flags(data, 8)?;
        let base_media_decode_time = match version {
            0 => read_u32_be(data, 12)? as u64,
            1 => read_u64_be(data, 12)?,
            _ => return Err(format!("Unsupported TFDT version: {}", version)),
        };

        Ok((
            TfdtBox {
                version,
                flags,
                base_media_decode_time,
            },
            size,
        ))
    }
}
