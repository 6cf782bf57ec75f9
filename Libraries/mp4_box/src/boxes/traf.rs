use crate::{format_fourcc, peek_box_header};

use super::{generic::{Mp4Box, UnknownBox}, tfdt::TfdtBox, tfhd::TfhdBox, trun::TrunBox};

// The `TrafBox` struct represents a Track Fragment Box.
// A CMAF fragment carries one `tfhd`, one `tfdt` and one `trun` per track
// fragment. Other children (`sbgp`, `sgpd`, `senc`, ...) are kept opaque in
// their original position so the re-encoded fragment matches the source.
#[derive(Default, Clone)]
pub struct TrafBox {
    pub tfhd: TfhdBox,
    pub tfdt: Option<TfdtBox>,
    pub trun: Option<TrunBox>,
    pub others: Vec<UnknownBox>,
}

impl std::fmt::Debug for TrafBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafBox")
            .field("box_size", &self.box_size())
            .field("box_type", &format_fourcc(&self.box_type()))
            .field("tfhd", &self.tfhd)
            .field("tfdt", &self.tfdt)
            .field("trun", &self.trun)
            .field("others", &self.others.len())
            .finish()
    }
}

impl Mp4Box for TrafBox {
    fn box_type(&self) -> [u8; 4] {
        *b"traf"
    }

    fn box_size(&self) -> u32 {
        let mut size = 8 + self.tfhd.box_size();
        if let Some(ref tfdt) = self.tfdt {
            size += tfdt.box_size();
        }
        if let Some(ref trun) = self.trun {
            size += trun.box_size();
        }
        size += self.others.iter().map(|b| b.box_size()).sum::<u32>();
        size
    }

    // Children are written in the canonical tfhd/tfdt/trun order, then the
    // opaque ones. Parsing below only accepts sources in that same order, so
    // a round trip cannot reorder boxes.
    fn write_box(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.box_size().to_be_bytes());
        buffer.extend_from_slice(&self.box_type());
        self.tfhd.write_box(buffer);
        if let Some(ref tfdt) = self.tfdt {
            tfdt.write_box(buffer);
        }
        if let Some(ref trun) = self.trun {
            trun.write_box(buffer);
        }
        for other in &self.others {
            other.write_box(buffer);
        }
    }

    fn read_box(data: &[u8]) -> Result<(Self, usize), String> {
        let (size, btype) = peek_box_header(data, 0)?;
        if &btype != b"traf" {
            return Err("Not a TRAF box".into());
        }

        let mut offset = 8;
        let mut tfhd = None;
        let mut tfdt = None;
        let mut trun = None;
        let mut others = Vec::new();

        while offset < size {
            let (sub_size, sub_type) = peek_box_header(data, offset)?;
            let sub = &data[offset..offset + sub_size];
            match &sub_type {
                b"tfhd" => {
                    if tfhd.is_some() {
                        return Err("Duplicate TFHD box inside TRAF".into());
                    }
                    let (parsed, parsed_size) = TfhdBox::read_box(sub)?;
                    if parsed_size != sub_size {
                        return Err("Incorrect TFHD box size".into());
                    }
                    tfhd = Some(parsed);
                }
                b"tfdt" => {
                    if tfdt.is_some() {
                        return Err("Duplicate TFDT box inside TRAF".into());
                    }
                    let (parsed, parsed_size) = TfdtBox::read_box(sub)?;
                    if parsed_size != sub_size {
                        return Err("Incorrect TFDT box size".into());
                    }
                    tfdt = Some(parsed);
                }
                b"trun" => {
                    if trun.is_some() {
                        return Err("Duplicate TRUN box inside TRAF".into());
                    }
                    let (parsed, parsed_size) = TrunBox::read_box(sub)?;
                    if parsed_size != sub_size {
                        return Err("Incorrect TRUN box size".into());
                    }
                    trun = Some(parsed);
                }
                _ => {
                    let (parsed, _) = UnknownBox::read_box(sub)?;
                    others.push(parsed);
                }
            }
            offset += sub_size;
        }

        let tfhd = tfhd.ok_or_else(|| "Missing required TFHD box inside TRAF".to_string())?;

        Ok((
            TrafBox {
                tfhd,
                tfdt,
                trun,
                others,
            },
            size,
        ))
    }
}
