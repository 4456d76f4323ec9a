use crate::{Error, Result, type_to_string};
use std::io::{Read, Seek, SeekFrom};

/// Location of a box inside a seekable stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxHeader {
    pub box_type: u32,
    /// Absolute offset of the first header byte.
    pub offset: u64,
    /// 8, or 16 for boxes with a 64-bit size.
    pub header_size: u64,
    /// Size of the box including its header.
    pub size: u64,
}

impl BoxHeader {
    /// Read the header at the current position of `reader`. Returns `None` at
    /// the end of the stream.
    pub fn read<R: Read + Seek>(reader: &mut R, stream_length: u64) -> Result<Option<Self>> {
        let offset = reader.stream_position()?;

        if offset >= stream_length {
            return Ok(None);
        }

        if stream_length - offset < 8 {
            return Err(Error::new_read_err(format!(
                "box header at offset {offset} (only {} bytes left)",
                stream_length - offset
            )));
        }

        let mut buf = [0; 8];
        reader.read_exact(&mut buf)?;

        let mut size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64;
        let box_type = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let mut header_size = 8;

        match size {
            0 => size = stream_length - offset,
            1 => {
                let mut large = [0; 8];
                reader.read_exact(&mut large)?;
                size = u64::from_be_bytes(large);
                header_size = 16;
            }
            _ => (),
        }

        if size < header_size {
            return Err(Error::new_decode_err(format!(
                "{} box at offset {offset} (size {size} is smaller than its header)",
                type_to_string(box_type)
            )));
        }

        if offset.checked_add(size).is_none_or(|end| end > stream_length) {
            return Err(Error::new_read_err(format!(
                "{} box at offset {offset} (size {size} runs past the end of the file)",
                type_to_string(box_type)
            )));
        }

        Ok(Some(Self {
            box_type,
            offset,
            header_size,
            size,
        }))
    }

    /// Read every top-level header of `reader`, leaving it positioned at the end.
    pub fn read_all<R: Read + Seek>(reader: &mut R) -> Result<Vec<Self>> {
        let stream_length = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut headers = Vec::new();

        while let Some(header) = Self::read(reader, stream_length)? {
            reader.seek(SeekFrom::Start(header.end()))?;
            headers.push(header);
        }

        Ok(headers)
    }

    /// Read the whole box, header included.
    pub fn read_box<R: Read + Seek>(&self, reader: &mut R) -> Result<Vec<u8>> {
        let length = usize::try_from(self.size).map_err(|_| {
            Error::new(format!("{} box is too large to be read in memory", self.name()))
        })?;

        let mut data = vec![0; length];
        reader.seek(SeekFrom::Start(self.offset))?;
        reader.read_exact(&mut data)?;
        Ok(data)
    }

    pub fn name(&self) -> String {
        type_to_string(self.box_type)
    }

    pub fn payload_offset(&self) -> u64 {
        self.offset + self.header_size
    }

    pub fn payload_size(&self) -> u64 {
        self.size - self.header_size
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}
