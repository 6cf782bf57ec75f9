use crate::{format_fourcc, peek_box_header, read_u32_be, read_version_and_flags, write_version_and_flags};

use super::generic::Mp4Box;

// The `MfhdBox` struct represents a Movie Fragment Header Box.
// Its `sequence_number` is the 1-based ordinal of the movie fragment and is
// one of the two fields rewritten when a VoD segment is projected onto the
// live timeline.
#[derive(Clone)]
pub struct MfhdBox {
    pub version: u8,
    pub flags: u32,
    pub sequence_number: u32,
}

impl Default for MfhdBox {
    fn default() -> Self {
        MfhdBox {
            version: 0,
            flags: 0,
            sequence_number: 1,
        }
    }
}

impl std::fmt::Debug for MfhdBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MfhdBox")
            .field("box_size", &self.box_size())
            .field("box_type", &format_fourcc(&self.box_type()))
            .field("version", &self.version)
            .field("flags", &format!("0x{:06X}", self.flags))
            .field("sequence_number", &self.sequence_number)
            .finish()
    }
}

impl Mp4Box for MfhdBox {
    fn box_type(&self) -> [u8; 4] {
        *b"mfhd"
    }

    fn box_size(&self) -> u32 {
        8 + 4 + 4 // header + version/flags + sequence_number
    }

    fn write_box(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.box_size().to_be_bytes());
        buffer.extend_from_slice(&self.box_type());
        write_version_and_flags(buffer, self.version, self.flags);
        buffer.extend_from_slice(&self.sequence_number.to_be_bytes());
    }

    fn read_box(data: &[u8]) -> Result<(Self, usize), String> {
        let (size, btype) = peek_box_header(data, 0)?;
        if &btype != b"mfhd" {
            return Err("Not an MFHD box".into());
        }
        if size < 16 {
            return Err("MFHD box too small".into());
        }

        let (version, flags) = read_version_and_flags(data, 8)?;
        let sequence_number = read_u32_be(data, 12)?;

        Ok((
            MfhdBox {
                version,
                flags,
                sequence_number,
            },
            size,
        ))
    }
}
