use crate::{ParsedBox, Result};

#[derive(Clone, Copy, Debug, Default)]
pub struct TrunSample {
    /// The length of the sample in timescale units.
    pub sample_duration: Option<u32>,
    /// The size of the sample in bytes.
    pub sample_size: Option<u32>,
    pub sample_flags: Option<u32>,
    /// The time since the start of the sample in timescale units.
    pub sample_composition_time_offset: Option<i32>,
}

/// Track Fragment Run Box (trun).
#[derive(Clone, Debug)]
pub struct TrunBox {
    /// If specified via flags, this indicate the offset of the sample in bytes.
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<u32>,
    /// An array of size sampleCount containing data for each sample
    pub samples: Vec<TrunSample>,
}

impl TrunBox {
    /// Parses a TRUN Box.
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let version = box_.version();
        let flags = box_.flags();
        let reader = &mut box_.reader;

        let sample_count = reader.read_u32()?;
        let mut data_offset = None;
        let mut first_sample_flags = None;

        // "data_offset"
        if flags & 0x000001 != 0 {
            data_offset = Some(reader.read_i32()?);
        }

        if flags & 0x000004 != 0 {
            first_sample_flags = Some(reader.read_u32()?);
        }

        let mut samples = Vec::with_capacity(sample_count.min(65536) as usize);

        for _ in 0..sample_count {
            let mut sample = TrunSample::default();

            if flags & 0x000100 != 0 {
                sample.sample_duration = Some(reader.read_u32()?);
            }

            if flags & 0x000200 != 0 {
                sample.sample_size = Some(reader.read_u32()?);
            }

            if flags & 0x000400 != 0 {
                sample.sample_flags = Some(reader.read_u32()?);
            }

            if flags & 0x000800 != 0 {
                sample.sample_composition_time_offset = Some(if version == 0 {
                    reader.read_u32()? as i32
                } else {
                    reader.read_i32()?
                });
            }

            samples.push(sample);
        }

        Ok(Self {
            data_offset,
            first_sample_flags,
            samples,
        })
    }
}
