use crate::{ParsedBox, Result, fourcc};

/// Scheme Type Box (schm) - identifies the protection scheme.
#[derive(Clone, Debug)]
pub struct SchmBox {
    /// The scheme type as a 4-byte code (e.g., 'cenc', 'cbcs').
    pub scheme_type: u32,
    /// The version of the scheme.
    pub scheme_version: u32,
    /// Optional scheme URI (if flags & 0x000001).
    pub scheme_uri: Option<String>,
}

impl SchmBox {
    /// AES-CTR full sample and subsample encryption.
    pub const CENC: u32 = fourcc(b"cenc");
    /// AES-CTR pattern encryption.
    pub const CENS: u32 = fourcc(b"cens");
    /// AES-CBC full sample and subsample encryption.
    pub const CBC1: u32 = fourcc(b"cbc1");
    /// AES-CBC pattern encryption.
    pub const CBCS: u32 = fourcc(b"cbcs");
    /// PIFF 1.1 track encryption, parameters live in a uuid box.
    pub const PIFF: u32 = fourcc(b"piff");
    /// OMA DCF key management.
    pub const ODKM: u32 = fourcc(b"odkm");

    /// Parse a schm box from a ParsedBox.
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let flags = box_.flags();
        let reader = &mut box_.reader;

        let scheme_type = reader.read_u32()?;
        // Some writers emit a 16-bit version, only the type matters.
        let scheme_version = if reader.remaining() >= 4 {
            reader.read_u32()?
        } else {
            reader.read_u16().map(u32::from).unwrap_or(0)
        };

        let mut scheme_uri = None;

        if flags & 0x000001 != 0 && reader.has_more_data() {
            let bytes = reader.read_to_end()?;
            scheme_uri = Some(
                String::from_utf8_lossy(&bytes)
                    .trim_end_matches('\0')
                    .to_owned(),
            );
        }

        Ok(Self {
            scheme_type,
            scheme_version,
            scheme_uri,
        })
    }

    /// True for the four common encryption schemes.
    pub fn is_common_encryption(&self) -> bool {
        matches!(
            self.scheme_type,
            Self::CENC | Self::CENS | Self::CBC1 | Self::CBCS
        )
    }
}

/// Original Format Box (frma).
#[derive(Clone, Copy, Debug)]
pub struct FrmaBox {
    pub original_format: u32,
}

impl FrmaBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        Ok(Self {
            original_format: box_.reader.read_u32()?,
        })
    }
}
