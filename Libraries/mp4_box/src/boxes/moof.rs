use crate::{format_fourcc, peek_box_header};

use super::{generic::Mp4Box, mfhd::MfhdBox, traf::TrafBox};

// The `MoofBox` struct represents a Movie Fragment Box: one `mfhd` followed
// by one or more `traf` boxes. The live rewriter stamps the new sequence
// number into `mfhd` and shifts every `traf`'s decode time.
#[derive(Default, Clone)]
pub struct MoofBox {
    pub mfhd: MfhdBox,
    pub trafs: Vec<TrafBox>,
}

impl std::fmt::Debug for MoofBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoofBox")
            .field("box_size", &self.box_size())
            .field("box_type", &format_fourcc(&self.box_type()))
            .field("mfhd", &self.mfhd)
            .field("trafs", &self.trafs)
            .finish()
    }
}

impl Mp4Box for MoofBox {
    fn box_type(&self) -> [u8; 4] {
        *b"moof"
    }

    fn box_size(&self) -> u32 {
        8 + self.mfhd.box_size() + self.trafs.iter().map(|t| t.box_size()).sum::<u32>()
    }

    fn write_box(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.box_size().to_be_bytes());
        buffer.extend_from_slice(&self.box_type());
        self.mfhd.write_box(buffer);
        for traf in &self.trafs {
            let before = buffer.len();
            let traf_size = traf.box_size() as usize;
            traf.write_box(buffer);
            debug_assert_eq!(buffer.len(), before + traf_size);
        }
    }

    fn read_box(data: &[u8]) -> Result<(Self, usize), String> {
        let (size, btype) = peek_box_header(data, 0)?;
        if &btype != b"moof" {
            return Err("Not a MOOF box".into());
        }

        let mut offset = 8;
        let (mfhd, mfhd_size) = MfhdBox::read_box(&data[offset..size])?;
        offset += mfhd_size;

        let mut trafs = Vec::new();
        while offset < size {
            let (sub_size, sub_type) = peek_box_header(data, offset)?;
            if &sub_type != b"traf" {
                return Err(format!(
                    "Unexpected box type in MOOF: {}",
                    format_fourcc(&sub_type)
                ));
            }
            let (traf, traf_size) = TrafBox::read_box(&data[offset..offset + sub_size])?;
            trafs.push(traf);
            offset += traf_size;
        }

        if trafs.is_empty() {
            return Err("MOOF box must contain at least one TRAF box".into());
        }

        Ok((MoofBox { mfhd, trafs }, size))
    }
}
