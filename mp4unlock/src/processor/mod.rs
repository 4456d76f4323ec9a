//! Decryption strategies, one per protection scheme.
//!
//! | Scheme | Strategy |
//! |--------|----------|
//! | `cenc`, `cens`, `cbc1`, `cbcs`, PIFF | samples decrypted in place, layout preserved |
//! | OMA DCF | atomic `odrm` objects, or `odkm` tracks through the track rewriter |
//! | Marlin IPMP | every media track through the track rewriter |
//! | standard | `odkm` tracks through the track rewriter, other files copied |

mod cenc;
mod cipher;
mod marlin;
mod oma;
mod rewrite;
mod standard;

use crate::{
    KeyMap,
    error::DecryptError,
    movie::{Movie, SampleEntry, Track},
    progress::ProgressListener,
    scheme::ProtectionScheme,
};
use log::debug;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Result type for decryption strategies.
pub type Result<T> = std::result::Result<T, DecryptError>;

const FREE: [u8; 4] = *b"free";

/// A decryption strategy bound to the keys of a job.
pub enum Processor {
    OmaDcf(KeyMap),
    MarlinIpmp(KeyMap),
    Cenc(KeyMap),
    Standard(KeyMap),
}

impl Processor {
    /// Select the strategy for `scheme`. Cipher parameters are resolved per
    /// track while processing.
    pub fn new(scheme: ProtectionScheme, keys: KeyMap) -> Self {
        let processor = match scheme {
            ProtectionScheme::OmaDcf => Self::OmaDcf(keys),
            ProtectionScheme::MarlinIpmp => Self::MarlinIpmp(keys),
            ProtectionScheme::Cenc(_) => Self::Cenc(keys),
            ProtectionScheme::Standard => Self::Standard(keys),
        };

        debug!("using {} decrypting processor", processor.name());
        processor
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::OmaDcf(_) => "oma-dcf",
            Self::MarlinIpmp(_) => "marlin-ipmp",
            Self::Cenc(_) => "cenc",
            Self::Standard(_) => "standard",
        }
    }

    /// Transform the whole of `input` into `output`.
    ///
    /// `input` is read from offset 0 and `output` must be empty. The last
    /// progress tick satisfies `step == total`.
    pub fn process<R, W>(
        &self,
        input: &mut R,
        output: &mut W,
        listener: &mut dyn ProgressListener,
    ) -> Result<()>
    where
        R: Read + Seek,
        W: Write + Seek,
    {
        input.seek(SeekFrom::Start(0))?;

        match self {
            Self::OmaDcf(keys) => oma::process(keys, input, output, listener),
            Self::MarlinIpmp(keys) => marlin::process(keys, input, output, listener),
            Self::Cenc(keys) => cenc::process(keys, input, output, listener),
            Self::Standard(keys) => standard::process(keys, input, output, listener),
        }
    }
}

/// Decrypts the samples of one track for the track rewriter.
pub(crate) trait TrackDecrypter {
    fn decrypt_sample(&mut self, data: Vec<u8>) -> Result<Vec<u8>>;
}

/// Overwrite the type of the box whose type field is at `type_offset`.
/// `data` holds the bytes starting at `base` in the file.
fn rename(data: &mut [u8], base: u64, type_offset: u64, name: [u8; 4]) -> Result<()> {
    patch(data, base, type_offset, &name)
}

/// Overwrite the bytes at absolute `offset` of a buffer starting at `base`.
fn patch(data: &mut [u8], base: u64, offset: u64, bytes: &[u8]) -> Result<()> {
    let field = offset
        .checked_sub(base)
        .and_then(|x| usize::try_from(x).ok())
        .and_then(|x| data.get_mut(x..x + bytes.len()))
        .ok_or_else(|| {
            DecryptError::InvalidFormat(format!("field at offset {offset} is out of range"))
        })?;

    field.copy_from_slice(bytes);
    Ok(())
}

/// Rename the selected protected sample entries back to their original
/// format and turn their `sinf` boxes, as well as every `pssh`, into `free`.
fn strip_protection<F>(movie: &Movie, data: &mut [u8], base: u64, mut select: F) -> Result<()>
where
    F: FnMut(&Track, &SampleEntry) -> bool,
{
    for track in &movie.tracks {
        for entry in &track.entries {
            let Some(protection) = &entry.protection else {
                continue;
            };

            if !entry.is_protected() || !select(track, entry) {
                continue;
            }

            if let Some(format) = protection.original_format {
                rename(data, base, entry.type_offset, format.to_be_bytes())?;
            }

            for &sinf in &protection.sinf {
                rename(data, base, sinf, FREE)?;
            }
        }
    }

    for &pssh in &movie.pssh {
        rename(data, base, pssh, FREE)?;
    }

    Ok(())
}

/// Read `length` bytes at `offset`.
fn read_at<R: Read + Seek>(input: &mut R, offset: u64, length: u64) -> Result<Vec<u8>> {
    let length = usize::try_from(length)
        .map_err(|_| DecryptError::Unsupported(format!("{length} bytes do not fit in memory")))?;
    let mut data = vec![0; length];

    input.seek(SeekFrom::Start(offset))?;
    input.read_exact(&mut data)?;
    Ok(data)
}

/// Copy `length` bytes at `offset` of `input` to the current position of `output`.
fn copy_range<R, W>(input: &mut R, output: &mut W, offset: u64, length: u64) -> Result<()>
where
    R: Read + Seek,
    W: Write,
{
    input.seek(SeekFrom::Start(offset))?;
    let copied = io::copy(&mut input.by_ref().take(length), output)?;

    if copied != length {
        return Err(DecryptError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {length} bytes at offset {offset}, got {copied}"),
        )));
    }

    Ok(())
}

/// Progress over a known number of units, e.g. top-level boxes or chunks.
/// Ticks `1..total` are sent as units are done, [`StepTicker::finish`] sends
/// the last one.
struct StepTicker<'a> {
    listener: &'a mut dyn ProgressListener,
    total: u32,
    step: u32,
}

impl<'a> StepTicker<'a> {
    fn new(listener: &'a mut dyn ProgressListener, total: usize) -> Self {
        Self {
            listener,
            total: u32::try_from(total).unwrap_or(u32::MAX).max(1),
            step: 0,
        }
    }

    fn tick(&mut self) {
        if self.step + 1 < self.total {
            self.step += 1;
            self.listener.on_progress(self.step, self.total);
        }
    }

    fn finish(self) {
        self.listener.on_progress(self.total, self.total);
    }
}
