use crate::{ParsedBox, Result};

/// Sample Auxiliary Information Sizes Box (saiz).
#[derive(Clone, Debug)]
pub struct SaizBox {
    pub aux_info_type: Option<u32>,
    pub default_sample_info_size: u8,
    pub sample_count: u32,
    /// Empty when every sample uses `default_sample_info_size`.
    pub sample_info_sizes: Vec<u8>,
}

impl SaizBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let flags = box_.flags();
        let reader = &mut box_.reader;

        let mut aux_info_type = None;

        if flags & 0x000001 != 0 {
            aux_info_type = Some(reader.read_u32()?);
            // aux_info_type_parameter
            reader.skip(4)?;
        }

        let default_sample_info_size = reader.read_u8()?;
        let sample_count = reader.read_u32()?;
        let mut sample_info_sizes = Vec::new();

        if default_sample_info_size == 0 {
            sample_info_sizes = reader.read_bytes_u8(sample_count as usize)?;
        }

        Ok(Self {
            aux_info_type,
            default_sample_info_size,
            sample_count,
            sample_info_sizes,
        })
    }

    /// Size of the auxiliary information of sample `index`.
    pub fn size_of(&self, index: usize) -> u8 {
        if self.default_sample_info_size != 0 {
            self.default_sample_info_size
        } else {
            self.sample_info_sizes.get(index).copied().unwrap_or(0)
        }
    }
}

/// Sample Auxiliary Information Offsets Box (saio).
#[derive(Clone, Debug)]
pub struct SaioBox {
    pub aux_info_type: Option<u32>,
    pub offsets: Vec<u64>,
}

impl SaioBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let version = box_.version();
        let flags = box_.flags();
        let reader = &mut box_.reader;

        let mut aux_info_type = None;

        if flags & 0x000001 != 0 {
            aux_info_type = Some(reader.read_u32()?);
            reader.skip(4)?;
        }

        let entry_count = reader.read_u32()?;
        let mut offsets = Vec::with_capacity(entry_count.min(4096) as usize);

        for _ in 0..entry_count {
            offsets.push(if version == 0 {
                reader.read_u32()? as u64
            } else {
                reader.read_u64()?
            });
        }

        Ok(Self {
            aux_info_type,
            offsets,
        })
    }
}
