use crate::{format_fourcc, peek_box_header, read_u32_be};

use super::generic::Mp4Box;

// The `StypBox` struct represents a Segment Type Box.
// It prefixes a media segment (or the first CMAF chunk of one) and names the
// major brand plus the brands the segment is compatible with.
#[derive(Clone, PartialEq, Eq)]
pub struct StypBox {
    pub major_brand: [u8; 4],
    pub minor_version: u32,
    pub compatible_brands: Vec<[u8; 4]>,
}

impl Default for StypBox {
    fn default() -> Self {
        StypBox {
            major_brand: *b"msdh",
            minor_version: 0,
            compatible_brands: vec![*b"msdh", *b"msix", *b"cmfs"],
        }
    }
}

impl std::fmt::Debug for StypBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StypBox")
            .field("box_size", &self.box_size())
            .field("box_type", &format_fourcc(&self.box_type()))
            .field("major_brand", &format_fourcc(&self.major_brand))
            .field("minor_version", &self.minor_version)
            .field(
                "compatible_brands",
                &self
                    .compatible_brands
                    .iter()
                    .map(format_fourcc)
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Mp4Box for StypBox {
    fn box_type(&self) -> [u8; 4] {
        *b"styp"
    }

    fn box_size(&self) -> u32 {
        8 + 4 + 4 + (4 * self.compatible_brands.len() as u32)
    }

    fn write_box(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.box_size().to_be_bytes());
        buffer.extend_from_slice(&self.box_type());
        buffer.extend_from_slice(&self.major_brand);
        buffer.extend_from_slice(&self.minor_version.to_be_bytes());
        for brand in &self.compatible_brands {
            buffer.extend_from_slice(brand);
        }
    }

    fn read_box(data: &[u8]) -> Result<(Self, usize), String> {
        let (size, btype) = peek_box_header(data, 0)?;
        if &btype != b"styp" {
            return Err("Not an STYP box".into());
        }
        if size < 16 {
            return Err("STYP box too small".into());
        }

        let major_brand = data[8..12].try_into().unwrap();
        let minor_version = read_u32_be(data, 12)?;

        let mut compatible_brands = Vec::new();
        let mut offset = 16;
        while offset + 4 <= size {
            compatible_brands.push(data[offset..offset + 4].try_into().unwrap());
            offset += 4;
        }

        Ok((
            StypBox {
                major_brand,
                minor_version,
                compatible_brands,
            },
            size,
        ))
    }
}
