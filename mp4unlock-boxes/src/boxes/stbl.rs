use crate::{ParsedBox, Result, bail};

/// Track Header Box (tkhd), only the track identifier is kept.
#[derive(Clone, Copy, Debug)]
pub struct TkhdBox {
    pub track_id: u32,
}

impl TkhdBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let version = box_.version();
        // creation_time and modification_time
        box_.reader.skip(if version == 1 { 16 } else { 8 })?;

        Ok(Self {
            track_id: box_.reader.read_u32()?,
        })
    }
}

/// Sample Size Box (stsz).
#[derive(Clone, Debug)]
pub struct StszBox {
    /// Non zero when every sample has this size.
    pub sample_size: u32,
    pub sample_count: u32,
    pub entry_sizes: Vec<u32>,
    /// Absolute offset of the first `entry_size`.
    pub entries_offset: u64,
}

impl StszBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let entries_offset = box_.position() + 8;
        let reader = &mut box_.reader;

        let sample_size = reader.read_u32()?;
        let sample_count = reader.read_u32()?;
        let mut entry_sizes = Vec::new();

        if sample_size == 0 {
            if sample_count as u64 * 4 > reader.remaining() {
                bail!("stsz box (table of {} entries is truncated)", sample_count);
            }

            entry_sizes.reserve(sample_count as usize);

            for _ in 0..sample_count {
                entry_sizes.push(reader.read_u32()?);
            }
        }

        Ok(Self {
            sample_size,
            sample_count,
            entry_sizes,
            entries_offset,
        })
    }

    pub fn size_of(&self, index: usize) -> Option<u32> {
        if self.sample_size != 0 {
            (index < self.sample_count as usize).then_some(self.sample_size)
        } else {
            self.entry_sizes.get(index).copied()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StscEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

/// Sample To Chunk Box (stsc).
#[derive(Clone, Debug)]
pub struct StscBox {
    pub entries: Vec<StscEntry>,
}

impl StscBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let reader = &mut box_.reader;
        let entry_count = reader.read_u32()?;
        let mut entries = Vec::with_capacity(entry_count.min(65536) as usize);

        for _ in 0..entry_count {
            entries.push(StscEntry {
                first_chunk: reader.read_u32()?,
                samples_per_chunk: reader.read_u32()?,
                sample_description_index: reader.read_u32()?,
            });
        }

        Ok(Self { entries })
    }

    /// Expand the run length table into one entry per chunk.
    pub fn chunks(&self, chunk_count: usize) -> Result<Vec<StscEntry>> {
        let mut chunks = Vec::with_capacity(chunk_count);

        for (i, entry) in self.entries.iter().enumerate() {
            if entry.first_chunk == 0 || entry.first_chunk as usize > chunk_count + 1 {
                bail!("stsc box (first chunk {} is out of range)", entry.first_chunk);
            }

            let last = match self.entries.get(i + 1) {
                Some(next) if next.first_chunk > entry.first_chunk => next.first_chunk as usize - 1,
                Some(_) => bail!("stsc box (entries are not increasing)"),
                None => chunk_count,
            };

            for chunk in entry.first_chunk as usize..=last.min(chunk_count) {
                chunks.push(StscEntry {
                    first_chunk: chunk as u32,
                    ..*entry
                });
            }
        }

        Ok(chunks)
    }
}

/// Chunk Offset Box, either `stco` or `co64`.
#[derive(Clone, Debug)]
pub struct ChunkOffsetBox {
    pub offsets: Vec<u64>,
    pub is_64_bit: bool,
    /// Absolute offset of the first entry.
    pub entries_offset: u64,
}

impl ChunkOffsetBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let is_64_bit = box_.box_type == crate::fourcc(b"co64");
        let entries_offset = box_.position() + 4;
        let reader = &mut box_.reader;

        let entry_count = reader.read_u32()?;
        let entry_size = if is_64_bit { 8 } else { 4 };

        if entry_count as u64 * entry_size > reader.remaining() {
            bail!("{} box (table of {} entries is truncated)", box_.name, entry_count);
        }

        let mut offsets = Vec::with_capacity(entry_count as usize);

        for _ in 0..entry_count {
            offsets.push(if is_64_bit {
                reader.read_u64()?
            } else {
                reader.read_u32()? as u64
            });
        }

        Ok(Self {
            offsets,
            is_64_bit,
            entries_offset,
        })
    }
}
