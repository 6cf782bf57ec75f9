use crate::{format_capped_bytes, format_fourcc, peek_box_header};

use super::generic::Mp4Box;

// The `MdatBox` struct represents a Media Data Box: the raw sample bytes of
// a fragment. The rewriter never touches its content.
#[derive(Default, Clone)]
pub struct MdatBox {
    pub data: Vec<u8>,
}

impl std::fmt::Debug for MdatBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdatBox")
            .field("box_size", &self.box_size())
            .field("box_type", &format_fourcc(&self.box_type()))
            .field("data", &format_capped_bytes(&self.data))
            .finish()
    }
}

impl Mp4Box for MdatBox {
    fn box_type(&self) -> [u8; 4] {
        *b"mdat"
    }

    fn box_size(&self) -> u32 {
        8 + self.data.len() as u32
    }

    fn write_box(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.box_size().to_be_bytes());
        buffer.extend_from_slice(&self.box_type());
        buffer.extend_from_slice(&self.data);
    }

    fn read_box(data: &[u8]) -> Result<(Self, usize), String> {
        let (size, btype) = peek_box_header(data, 0)?;
        if &btype != b"mdat" {
            return Err("Not an MDAT box".into());
        }
        Ok((
            MdatBox {
                data: data[8..size].to_vec(),
            },
            size,
        ))
    }
}
