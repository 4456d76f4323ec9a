/*
    REFERENCES
    ----------

    1. https://github.com/shaka-project/shaka-player/blob/7098f43f70119226bca2e5583833aaf27b498e33/lib/util/mp4_box_parsers.js
    2. https://github.com/shaka-project/shaka-player/blob/7098f43f70119226bca2e5583833aaf27b498e33/externs/shaka/mp4_parser.js

*/

use crate::{Error, Reader, Result};
use std::{cell::Cell, collections::HashMap, rc::Rc};

/// `Result` type returned by box callbacks.
pub type HandlerResult = Result<()>;
/// Callback type for parsing a box.
pub type CallbackType = Rc<dyn Fn(ParsedBox) -> HandlerResult>;

/// Mp4 box parser driven by per box type callbacks.
///
/// Offsets reported through [`ParsedBox::start`] are absolute, i.e. relative to
/// the `offset` passed to [`Mp4Parser::parse_at`], so callbacks can record the
/// exact location of a field inside the original file.
#[derive(Clone, Default)]
pub struct Mp4Parser {
    headers: HashMap<u32, BoxType>,
    box_definitions: HashMap<u32, CallbackType>,
    done: Rc<Cell<bool>>,
}

impl Mp4Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a box type as a Basic Box.
    pub fn base_box<F>(mut self, type_: &str, definition: F) -> Self
    where
        F: Fn(ParsedBox) -> HandlerResult + 'static,
    {
        let type_code = type_from_string(type_);
        self.headers.insert(type_code, BoxType::BasicBox);
        self.box_definitions.insert(type_code, Rc::new(definition));
        self
    }

    /// Declare a box type as a Full Box.
    pub fn full_box<F>(mut self, type_: &str, definition: F) -> Self
    where
        F: Fn(ParsedBox) -> HandlerResult + 'static,
    {
        let type_code = type_from_string(type_);
        self.headers.insert(type_code, BoxType::FullBox);
        self.box_definitions.insert(type_code, Rc::new(definition));
        self
    }

    /// Stop parsing. Useful for extracting information from partial segments and
    /// avoiding an out-of-bounds error once you find what you are looking for.
    pub fn stop(&self) {
        self.done.set(true);
    }

    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    /// Parse the given data using the added callbacks.
    ///
    /// # Arguments
    ///
    /// - `partial_okay` - If true, allow reading partial payloads
    ///   from some boxes. If the goal is a child box, we can sometimes find it
    ///   without enough data to find all child boxes.
    /// - `stop_on_partial` - If true, stop reading if an incomplete
    ///   box is detected.
    pub fn parse(&self, data: &[u8], partial_okay: bool, stop_on_partial: bool) -> HandlerResult {
        self.parse_at(data, 0, partial_okay, stop_on_partial)
    }

    /// Same as [`Mp4Parser::parse`] but `data` starts at `offset` in the file.
    pub fn parse_at(
        &self,
        data: &[u8],
        offset: u64,
        partial_okay: bool,
        stop_on_partial: bool,
    ) -> HandlerResult {
        let mut reader = Reader::new_big_endian(data);

        self.done.set(false);

        while reader.has_more_data() && !self.is_done() {
            self.parse_next(offset, &mut reader, partial_okay, stop_on_partial)?;
        }

        Ok(())
    }

    /// Parse the next box on the current level.
    ///
    /// # Arguments
    ///
    /// - `abs_start` - The absolute start position of `reader` in the original
    ///   byte array.
    pub fn parse_next(
        &self,
        abs_start: u64,
        reader: &mut Reader,
        partial_okay: bool,
        stop_on_partial: bool,
    ) -> HandlerResult {
        let start = reader.get_position();

        // size(4 bytes) + type(4 bytes) = 8 bytes
        if stop_on_partial && start + 8 > reader.get_length() {
            self.stop();
            return Ok(());
        }

        let mut size = reader.read_u32()? as u64;
        let type_ = reader.read_u32()?;
        let mut has_64_bit_size = false;

        match size {
            0 => size = reader.get_length() - start,
            1 => {
                if stop_on_partial && reader.get_position() + 8 > reader.get_length() {
                    self.stop();
                    return Ok(());
                }
                size = reader.read_u64()?;
                has_64_bit_size = true;
            }
            _ => (),
        }

        let Some(box_definition) = self.box_definitions.get(&type_) else {
            // Move the read head to be at the end of the box.
            // If the box is longer than the remaining parts of the file, e.g. the
            // mp4 is improperly formatted, or this was a partial range request that
            // ended in the middle of a box, just skip to the end.
            let skip_length = (start + size)
                .saturating_sub(reader.get_position())
                .min(reader.remaining());
            reader.skip(skip_length)?;
            return Ok(());
        };

        let mut version = None;
        let mut flags = None;

        if self.headers.get(&type_) == Some(&BoxType::FullBox) {
            if stop_on_partial && reader.get_position() + 4 > reader.get_length() {
                self.stop();
                return Ok(());
            }

            let version_and_flags = reader.read_u32()?;
            version = Some(version_and_flags >> 24);
            flags = Some(version_and_flags & 0xFFFFFF);
        }

        // Read the whole payload so that the current level can be safely read
        // regardless of how the payload is parsed.
        let mut end = start + size;

        if partial_okay && end > reader.get_length() {
            // For partial reads, truncate the payload if we must.
            end = reader.get_length();
        }

        if stop_on_partial && end > reader.get_length() {
            self.stop();
            return Ok(());
        }

        if end < reader.get_position() {
            return Err(Error::new_decode_err(format!(
                "{} box (declared size {} is smaller than its header)",
                type_to_string(type_),
                size
            )));
        }

        let payload = reader.read_bytes_u8((end - reader.get_position()) as usize)?;

        box_definition(ParsedBox {
            name: type_to_string(type_),
            box_type: type_,
            parser: self.clone(),
            partial_okay,
            stop_on_partial,
            version,
            flags,
            reader: Reader::new_big_endian(payload),
            size,
            start: start + abs_start,
            has_64_bit_size,
        })
    }
}

// CALLBACKS

/// A callback that tells the Mp4 parser to treat the body of a box as a series
/// of boxes. The number of boxes is limited by the size of the parent box.
pub fn children(mut box_: ParsedBox) -> HandlerResult {
    let payload_offset = box_.payload_offset();

    while box_.reader.has_more_data() && !box_.parser.is_done() {
        box_.parser.parse_next(
            payload_offset,
            &mut box_.reader,
            box_.partial_okay,
            box_.stop_on_partial,
        )?;
    }

    Ok(())
}

/// A callback that tells the Mp4 parser to treat the body of a box as a sample
/// description. A sample description box has a fixed number of children. The
/// number of children is represented by a 4 byte unsigned integer. Each child
/// is a box.
pub fn sample_description(mut box_: ParsedBox) -> HandlerResult {
    let payload_offset = box_.payload_offset();
    let count = box_.reader.read_u32()?;

    for _ in 0..count {
        if !box_.reader.has_more_data() {
            break;
        }

        box_.parser.parse_next(
            payload_offset,
            &mut box_.reader,
            box_.partial_okay,
            box_.stop_on_partial,
        )?;

        if box_.parser.is_done() {
            break;
        }
    }

    Ok(())
}

/// A callback that tells the Mp4 parser to treat the body of a box as a visual
/// sample entry. A visual sample entry has some fixed-sized fields
/// describing the video codec parameters, followed by an arbitrary number of
/// appended children. Each child is a box.
pub fn visual_sample_entry(mut box_: ParsedBox) -> HandlerResult {
    // Skip 6 reserved bytes.
    // Skip 2-byte data reference index.
    // Skip 16 more reserved bytes.
    // Skip 4 bytes for width/height.
    // Skip 8 bytes for horizontal/vertical resolution.
    // Skip 4 more reserved bytes (0)
    // Skip 2-byte frame count.
    // Skip 32-byte compressor name (length byte, then name, then 0-padding).
    // Skip 2-byte depth.
    // Skip 2 more reserved bytes (0xff)
    // 78 bytes total.
    box_.reader.skip(78)?;
    sample_entry_children(box_)
}

/// A callback that tells the Mp4 parser to treat the body of a box as a audio
/// sample entry. A audio sample entry has some fixed-sized fields
/// describing the audio codec parameters, followed by an arbitrary number of
/// appended children. Each child is a box.
pub fn audio_sample_entry(mut box_: ParsedBox) -> HandlerResult {
    // 6 bytes reserved
    // 2 bytes data reference index
    box_.reader.skip(8)?;

    // 2 bytes version
    let version = box_.reader.read_u16()?;
    // 2 bytes revision (0, could be ignored)
    // 4 bytes reserved
    box_.reader.skip(6)?;

    if version == 2 {
        // 16 bytes hard-coded values with no comments
        // 8 bytes sample rate
        // 4 bytes channel count
        // 4 bytes hard-coded values with no comments
        // 4 bytes bits per sample
        // 4 bytes lpcm flags
        // 4 bytes sample size
        // 4 bytes samples per packet
        box_.reader.skip(48)?;
    } else {
        // 2 bytes channel count
        // 2 bytes bits per sample
        // 2 bytes compression ID
        // 2 bytes packet size
        // 2 bytes sample rate
        // 2 byte reserved
        box_.reader.skip(12)?;
    }

    if version == 1 {
        // 4 bytes samples per packet
        // 4 bytes bytes per packet
        // 4 bytes bytes per frame
        // 4 bytes bytes per sample
        box_.reader.skip(16)?;
    }

    sample_entry_children(box_)
}

/// A callback for sample entries whose format specific fields are unknown
/// (text, system and metadata entries). Only the common `SampleEntry` fields
/// are skipped before the children.
pub fn generic_sample_entry(mut box_: ParsedBox) -> HandlerResult {
    // 6 bytes reserved
    // 2 bytes data reference index
    box_.reader.skip(8)?;
    sample_entry_children(box_)
}

fn sample_entry_children(mut box_: ParsedBox) -> HandlerResult {
    let payload_offset = box_.payload_offset();

    // Trailing bytes shorter than a box header are padding.
    while box_.reader.remaining() >= 8 && !box_.parser.is_done() {
        box_.parser.parse_next(
            payload_offset,
            &mut box_.reader,
            box_.partial_okay,
            box_.stop_on_partial,
        )?;
    }

    Ok(())
}

// UTILS

/// Four character code of a box type as an integer.
pub const fn fourcc(name: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*name)
}

/// Convert an ascii string name to the integer type for a box.
/// The name must be four characters long.
pub fn type_from_string(name: &str) -> u32 {
    assert!(name.len() == 4, "MP4 box names must be 4 characters long");

    name.bytes().fold(0, |code, chr| (code << 8) | chr as u32)
}

/// Convert an integer type from a box into an ascii string name.
/// Useful for debugging.
pub fn type_to_string(type_: u32) -> String {
    String::from_utf8_lossy(&type_.to_be_bytes()).into_owned()
}

/// An enum used to track the type of box so that the correct values can be
/// read from the header.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoxType {
    BasicBox,
    FullBox,
}

/// Parsed mp4 box.
pub struct ParsedBox {
    /// The box name, a 4-character string (fourcc).
    pub name: String,
    /// The box type as an integer.
    pub box_type: u32,
    /// The parser that parsed this box. The parser can be used to parse child
    /// boxes where the configuration of the current parser is needed to parsed
    /// other boxes.
    pub parser: Mp4Parser,
    /// If true, allows reading partial payloads from some boxes.
    pub partial_okay: bool,
    /// If true, stop reading if an incomplete box is detected.
    pub stop_on_partial: bool,
    /// The absolute start of this box (before the header).
    pub start: u64,
    /// The size of this box (including the header).
    pub size: u64,
    /// The version for a full box, `None` for basic boxes.
    pub version: Option<u32>,
    /// The flags for a full box, `None` for basic boxes.
    pub flags: Option<u32>,
    /// The reader for this box is only for this box. Reading or not reading to
    /// the end will have no affect on the parser reading other sibling boxes.
    pub reader: Reader,
    /// If true, the box header had a 64-bit size field. This affects the offsets
    /// of other fields.
    pub has_64_bit_size: bool,
}

impl ParsedBox {
    /// Find the header size of the box.
    pub fn header_size(&self) -> u64 {
        let basic_header_size = 8;
        let _64_bit_field_size = if self.has_64_bit_size { 8 } else { 0 };
        let version_and_flags_size = if self.flags.is_some() { 4 } else { 0 };
        basic_header_size + _64_bit_field_size + version_and_flags_size
    }

    /// Absolute offset of the first payload byte.
    pub fn payload_offset(&self) -> u64 {
        self.start + self.header_size()
    }

    /// Absolute offset of the reader's current position.
    pub fn position(&self) -> u64 {
        self.payload_offset() + self.reader.get_position()
    }

    /// Absolute offset of the 4-byte type field, e.g. for renaming the box.
    pub fn type_offset(&self) -> u64 {
        self.start + 4
    }

    pub fn version(&self) -> u32 {
        self.version.unwrap_or(0)
    }

    pub fn flags(&self) -> u32 {
        self.flags.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn boxed(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut data = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        data.extend_from_slice(name);
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn reports_absolute_offsets_of_nested_boxes() {
        let inner = boxed(b"free", &[0; 4]);
        let outer = [boxed(b"skip", &[1, 2]), boxed(b"moov", &inner)].concat();
        let starts = Rc::new(RefCell::new(Vec::new()));

        Mp4Parser::new()
            .base_box("moov", children)
            .base_box("free", {
                let starts = starts.clone();
                move |box_| {
                    starts.borrow_mut().push((box_.start, box_.type_offset(), box_.size));
                    Ok(())
                }
            })
            .parse_at(&outer, 100, false, false)
            .unwrap();

        // skip (10 bytes) + moov header (8 bytes)
        assert_eq!(*starts.borrow(), vec![(118, 122, 12)]);
    }

    #[test]
    fn full_box_reads_version_and_flags() {
        let data = boxed(b"tfhd", &[1, 0x02, 0x00, 0x01, 0, 0, 0, 7]);
        let seen = Rc::new(RefCell::new(None));

        Mp4Parser::new()
            .full_box("tfhd", {
                let seen = seen.clone();
                move |mut box_| {
                    let track_id = box_.reader.read_u32()?;
                    *seen.borrow_mut() = Some((box_.version(), box_.flags(), track_id));
                    Ok(())
                }
            })
            .parse(&data, false, false)
            .unwrap();

        assert_eq!(*seen.borrow(), Some((1, 0x020001, 7)));
    }

    #[test]
    fn stop_on_partial_ends_quietly() {
        let mut data = boxed(b"moov", &[0; 16]);
        data.truncate(12);

        let parser = Mp4Parser::new().base_box("moov", children);
        assert!(parser.parse(&data, false, true).is_ok());
        assert!(parser.is_done());
    }

    #[test]
    fn converts_type_names() {
        assert_eq!(type_from_string("moov"), fourcc(b"moov"));
        assert_eq!(type_to_string(fourcc(b"cbcs")), "cbcs");
    }
}
