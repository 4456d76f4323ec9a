//! Protection scheme detection.

use crate::{error::DecryptError, movie::Movie};
use log::debug;
use mp4unlock_boxes::{
    BoxHeader, Mp4Parser,
    boxes::{FtypBox, SchmBox},
    fourcc,
};
use std::{
    fmt,
    io::{Read, Seek, SeekFrom},
};

/// Common encryption scheme of a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CencScheme {
    Cenc,
    Cbc1,
    Cens,
    Cbcs,
}

impl CencScheme {
    pub fn from_scheme_type(scheme_type: u32) -> Option<Self> {
        match scheme_type {
            SchmBox::CENC => Some(Self::Cenc),
            SchmBox::CBC1 => Some(Self::Cbc1),
            SchmBox::CENS => Some(Self::Cens),
            SchmBox::CBCS => Some(Self::Cbcs),
            _ => None,
        }
    }
}

impl fmt::Display for CencScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cenc => "cenc",
            Self::Cbc1 => "cbc1",
            Self::Cens => "cens",
            Self::Cbcs => "cbcs",
        })
    }
}

/// How a file is protected, which decides the decryption strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtectionScheme {
    OmaDcf,
    MarlinIpmp,
    Cenc(CencScheme),
    Standard,
}

impl fmt::Display for ProtectionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OmaDcf => f.write_str("oma-dcf"),
            Self::MarlinIpmp => f.write_str("marlin-ipmp"),
            Self::Cenc(scheme) => write!(f, "mpeg-cenc ({scheme})"),
            Self::Standard => f.write_str("standard"),
        }
    }
}

/// Classify the protection scheme of `input`.
///
/// Only the `ftyp` and `moov` boxes are read. Missing or unreadable metadata
/// is not an error, such files are classified as [`ProtectionScheme::Standard`].
/// The read position of `input` is left unspecified.
pub fn detect<R: Read + Seek>(input: &mut R) -> ProtectionScheme {
    match inspect(input) {
        Ok(scheme) => scheme,
        Err(e) => {
            debug!("metadata inspection failed, assuming standard protection ({e})");
            ProtectionScheme::Standard
        }
    }
}

fn inspect<R: Read + Seek>(input: &mut R) -> Result<ProtectionScheme, DecryptError> {
    let stream_length = input.seek(SeekFrom::End(0))?;
    input.seek(SeekFrom::Start(0))?;

    let mut ftyp = None;
    let mut movie = None;

    loop {
        let header = match BoxHeader::read(input, stream_length) {
            Ok(Some(header)) => header,
            Ok(None) => break,
            Err(e) => {
                debug!("stopped reading top-level boxes ({e})");
                break;
            }
        };

        if header.box_type == fourcc(b"ftyp") && ftyp.is_none() {
            match read_ftyp(&header.read_box(input)?, header.offset) {
                Ok(x) => ftyp = x,
                Err(e) => debug!("ignoring unreadable ftyp box ({e})"),
            }
        } else if header.box_type == fourcc(b"moov") && movie.is_none() {
            match Movie::parse(&header.read_box(input)?, header.offset) {
                Ok(x) => movie = Some(x),
                Err(e) => debug!("ignoring unreadable moov box ({e})"),
            }
        }

        input.seek(SeekFrom::Start(header.end()))?;
    }

    if let Some(ftyp) = ftyp {
        if ftyp.has_brand(FtypBox::ODCF) {
            return Ok(ProtectionScheme::OmaDcf);
        }

        if ftyp.has_brand(FtypBox::MGSV) {
            return Ok(ProtectionScheme::MarlinIpmp);
        }

        if ftyp.has_brand(FtypBox::PIFF) {
            return Ok(ProtectionScheme::Cenc(CencScheme::Cenc));
        }
    }

    for track in movie.iter().flat_map(|x| &x.tracks) {
        let Some(entry) = track.entries.first() else {
            continue;
        };

        if !entry.is_protected() {
            continue;
        }

        if let Some(scheme) = entry.scheme_type().and_then(CencScheme::from_scheme_type) {
            return Ok(ProtectionScheme::Cenc(scheme));
        }
    }

    Ok(ProtectionScheme::Standard)
}

fn read_ftyp(data: &[u8], offset: u64) -> Result<Option<FtypBox>, DecryptError> {
    let ftyp = mp4unlock_boxes::data!();

    Mp4Parser::new()
        .base_box("ftyp", {
            let ftyp = ftyp.clone();
            move |mut box_| {
                *ftyp.borrow_mut() = Some(FtypBox::new(&mut box_)?);
                Ok(())
            }
        })
        .parse_at(data, offset, false, false)?;

    Ok(ftyp.take())
}
