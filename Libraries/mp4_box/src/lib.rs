//! # Fragmented MP4 boxes for segment rewriting
//!
//! A CMAF media segment is a flat sequence of boxes: an optional `styp`,
//! then one or more `moof`/`mdat` pairs. A live simulator that re-stamps
//! VoD segments only needs to touch two fields inside each fragment:
//!
//! - `moof/mfhd` carries the fragment sequence number.
//! - `moof/traf/tfdt` carries the base media decode time.
//!
//! Everything else must survive a parse/serialize round trip bit for bit.
//! This crate therefore models exactly the fragment-level boxes (`styp`,
//! `moof`, `mfhd`, `traf`, `tfhd`, `tfdt`, `trun`, `mdat`, `trex`) and
//! keeps anything it does not understand as an opaque byte blob.
//!
//! - The `boxes` module defines the individual box types.
//! - The `segment` module assembles them into fragments and media segments,
//!   including full-sample expansion for low-latency chunking.
//! - The `init` module extracts track defaults (`trex`, timescale, track id)
//!   from an initialization segment without modeling the whole `moov` tree.

pub mod boxes;
pub mod init;
pub mod segment;

pub fn format_fourcc(fourcc: &[u8; 4]) -> String {
    std::str::from_utf8(fourcc).unwrap_or("????").to_string()
}

pub fn format_capped_bytes(data: &[u8]) -> String {
    let capped = &data[..data.len().min(8)];
    if data.len() > 8 {
        format!("{:?} ...", capped)
    } else {
        format!("{:?}", capped)
    }
}

pub fn read_u32_be(data: &[u8], offset: usize) -> Result<u32, String> {
    data.get(offset..offset + 4)
        .ok_or_else(|| "Out of bounds while reading u32".to_string())
        .map(|bytes| u32::from_be_bytes(bytes.try_into().unwrap()))
}

pub fn read_u64_be(data: &[u8], offset: usize) -> Result<u64, String> {
    data.get(offset..offset + 8)
        .ok_or_else(|| "Out of bounds while reading u64".to_string())
        .map(|bytes| u64::from_be_bytes(bytes.try_into().unwrap()))
}

pub fn read_version_and_flags(data: &[u8], offset: usize) -> Result<(u8, u32), String> {
    let word = read_u32_be(data, offset)?;
    Ok(((word >> 24) as u8, word & 0x00FF_FFFF))
}

pub fn write_version_and_flags(buffer: &mut Vec<u8>, version: u8, flags: u32) {
    buffer.push(version);
    buffer.push(((flags >> 16) & 0xFF) as u8);
    buffer.push(((flags >> 8) & 0xFF) as u8);
    buffer.push((flags & 0xFF) as u8);
}

/// Reads a box header at `offset` and returns (size, type).
/// The size is the full box size including the 8-byte header.
pub fn peek_box_header(data: &[u8], offset: usize) -> Result<(usize, [u8; 4]), String> {
    if data.len() < offset + 8 {
        return Err("Remaining data too small for MP4 box header".into());
    }
    let size = read_u32_be(data, offset)? as usize;
    let btype: [u8; 4] = data[offset + 4..offset + 8].try_into().unwrap();
    if size < 8 || offset + size > data.len() {
        return Err(format!(
            "Corrupted MP4 box size of box {:?}: reported size {}, {} bytes left",
            format_fourcc(&btype),
            size,
            data.len() - offset
        ));
    }
    Ok((size, btype))
}
