use crate::{format_capped_bytes, format_fourcc, peek_box_header};

// The `Mp4Box` trait is the common interface of all box types in this crate.
//
// Required methods:
// - `box_type`: the 4-byte type identifier of the box.
// - `box_size`: the total serialized size in bytes, including the header.
// - `write_box`: serializes the box into a buffer.
// - `read_box`: parses the box from a byte slice.
//
// `read_box` receives a slice starting at the box header and returns the
// parsed box together with the number of bytes consumed, so callers can
// walk sibling boxes with simple offset arithmetic.
pub trait Mp4Box {
    // Returns the 4-byte type identifier of the box.
    fn box_type(&self) -> [u8; 4];

    // Calculates the total size of the box in bytes.
    // The size includes the header (8 bytes: 4 bytes for size and 4 bytes for type)
    // and the size of the box's content.
    fn box_size(&self) -> u32;

    // Serializes the box into the provided buffer.
    fn write_box(&self, buffer: &mut Vec<u8>);

    /// Reads a box from the given byte slice.
    /// Returns a tuple of (BoxInstance, bytes_consumed).
    fn read_box(data: &[u8]) -> Result<(Self, usize), String>
    where
        Self: Sized;
}

// The `UnknownBox` struct carries a box this crate does not model.
// The payload is kept verbatim so the box survives a round trip unchanged.
#[derive(Clone)]
pub struct UnknownBox {
    pub btype: [u8; 4],
    pub data: Vec<u8>,
}

impl std::fmt::Debug for UnknownBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnknownBox")
            .field("box_size", &self.box_size())
            .field("box_type", &format_fourcc(&self.box_type()))
            .field("data", &format_capped_bytes(&self.data))
            .finish()
    }
}

impl Mp4Box for UnknownBox {
    fn box_type(&self) -> [u8; 4] {
        self.btype
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
        Ok((
            UnknownBox {
                btype,
                data: data[8..size].to_vec(),
            },
            size,
        ))
    }
}
