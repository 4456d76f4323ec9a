use crate::{ParsedBox, Result};

/// Track Fragment Header Box (tfhd).
#[derive(Clone, Debug, Default)]
pub struct TfhdBox {
    /// As per the spec: an integer that uniquely identifies this
    /// track over the entire life‐time of this presentation
    pub track_id: u32,
    /// If specified via flags, this indicate the base data offset
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    /// If specified via flags, this overrides the default sample
    /// duration in the Track Extends Box for this fragment
    pub default_sample_duration: Option<u32>,
    /// If specified via flags, this overrides the default sample
    /// size in the Track Extends Box for this fragment
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
    /// Data offsets of this fragment are relative to the enclosing moof.
    pub default_base_is_moof: bool,
}

impl TfhdBox {
    /// Parses a TFHD Box.
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let flags = box_.flags();
        let reader = &mut box_.reader;

        let mut tfhd = Self {
            track_id: reader.read_u32()?,
            default_base_is_moof: flags & 0x020000 != 0,
            ..Default::default()
        };

        if flags & 0x000001 != 0 {
            tfhd.base_data_offset = Some(reader.read_u64()?);
        }

        if flags & 0x000002 != 0 {
            tfhd.sample_description_index = Some(reader.read_u32()?);
        }

        if flags & 0x000008 != 0 {
            tfhd.default_sample_duration = Some(reader.read_u32()?);
        }

        if flags & 0x000010 != 0 {
            tfhd.default_sample_size = Some(reader.read_u32()?);
        }

        if flags & 0x000020 != 0 {
            tfhd.default_sample_flags = Some(reader.read_u32()?);
        }

        Ok(tfhd)
    }
}
