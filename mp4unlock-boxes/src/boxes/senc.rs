use crate::{ParsedBox, Reader, Result, bail};

/// A subsample entry, clear bytes followed by protected bytes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Subsample {
    pub clear_bytes: u16,
    pub encrypted_bytes: u32,
}

/// Sample encryption information for a single sample.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SencSample {
    /// Empty when the track uses a constant IV.
    pub iv: Vec<u8>,
    /// Empty when the whole sample is protected.
    pub subsamples: Vec<Subsample>,
}

impl SencSample {
    /// Read one `CencSampleAuxiliaryDataFormat` record, the layout shared by
    /// `senc` entries and `saiz`/`saio` auxiliary information.
    pub fn read(reader: &mut Reader, iv_size: u8, has_subsamples: bool) -> Result<Self> {
        let iv = reader.read_bytes_u8(iv_size as usize)?;
        let mut subsamples = Vec::new();

        if has_subsamples {
            let subsample_count = reader.read_u16()?;

            for _ in 0..subsample_count {
                subsamples.push(Subsample {
                    clear_bytes: reader.read_u16()?,
                    encrypted_bytes: reader.read_u32()?,
                });
            }
        }

        Ok(Self { iv, subsamples })
    }
}

/// Sample Encryption Box (senc), or its PIFF `uuid` predecessor.
///
/// The IV size lives in the track's `tenc`, so entries are kept raw until
/// [`SencBox::samples`] is called with it.
#[derive(Clone, Debug)]
pub struct SencBox {
    pub flags: u32,
    pub sample_count: u32,
    /// PIFF override of the track defaults.
    pub algorithm_id: Option<u32>,
    pub iv_size: Option<u8>,
    pub kid: Option<[u8; 16]>,
    data: Vec<u8>,
}

impl SencBox {
    /// Parse a senc full box.
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let flags = box_.flags();
        Self::read_entries(&mut box_.reader, flags, None)
    }

    /// Parse a PIFF sample encryption box. The reader must be positioned right
    /// after the 16 byte extended type.
    pub fn from_piff(box_: &mut ParsedBox) -> Result<Self> {
        let reader = &mut box_.reader;
        let flags = reader.read_u32()? & 0xFFFFFF;
        let mut override_ = None;

        if flags & 0x000001 != 0 {
            let algorithm_id = reader.read_u24()?;
            let iv_size = reader.read_u8()?;
            let kid = reader.read_array::<16>()?;
            override_ = Some((algorithm_id, iv_size, kid));
        }

        Self::read_entries(reader, flags, override_)
    }

    fn read_entries(
        reader: &mut Reader,
        flags: u32,
        override_: Option<(u32, u8, [u8; 16])>,
    ) -> Result<Self> {
        let sample_count = reader.read_u32()?;

        Ok(Self {
            flags,
            sample_count,
            algorithm_id: override_.map(|x| x.0),
            iv_size: override_.map(|x| x.1),
            kid: override_.map(|x| x.2),
            data: reader.read_to_end()?,
        })
    }

    /// Check if this senc box has subsample encryption info.
    pub fn has_subsamples(&self) -> bool {
        self.flags & 0x000002 != 0
    }

    /// Decode every entry using `iv_size`, unless the box overrides it.
    pub fn samples(&self, iv_size: u8) -> Result<Vec<SencSample>> {
        let iv_size = self.iv_size.unwrap_or(iv_size);

        if !matches!(iv_size, 0 | 8 | 16) {
            bail!("senc box (invalid iv size {})", iv_size);
        }

        let mut reader = Reader::new_big_endian(self.data.as_slice());
        let mut samples = Vec::with_capacity(self.sample_count.min(65536) as usize);

        for _ in 0..self.sample_count {
            samples.push(SencSample::read(
                &mut reader,
                iv_size,
                self.has_subsamples(),
            )?);
        }

        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mp4Parser;

    #[test]
    fn decodes_subsample_entries() {
        let mut data = vec![0, 0, 0, 0, b's', b'e', b'n', b'c', 0, 0, 0, 2, 0, 0, 0, 1];
        data.extend_from_slice(&[7; 8]);
        data.extend_from_slice(&[0, 1, 0, 5, 0, 0, 0, 32]);
        let size = data.len() as u32;
        data[..4].copy_from_slice(&size.to_be_bytes());

        let senc = crate::data!();

        Mp4Parser::new()
            .full_box("senc", {
                let senc = senc.clone();
                move |mut box_| {
                    *senc.borrow_mut() = Some(SencBox::new(&mut box_)?);
                    Ok(())
                }
            })
            .parse(&data, false, false)
            .unwrap();

        let senc = senc.take().unwrap();
        let samples = senc.samples(8).unwrap();

        assert!(senc.has_subsamples());
        assert_eq!(samples[0].iv, vec![7; 8]);
        assert_eq!(
            samples[0].subsamples,
            vec![Subsample {
                clear_bytes: 5,
                encrypted_bytes: 32
            }]
        );
        assert!(senc.samples(16).is_err());
    }
}
