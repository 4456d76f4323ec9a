use crate::{ParsedBox, Result, bail};

/// Extended type of the PIFF track encryption box.
pub const PIFF_TRACK_ENCRYPTION: [u8; 16] = [
    0x89, 0x74, 0xdb, 0xce, 0x7b, 0xe7, 0x4c, 0x51, 0x84, 0xf9, 0x71, 0x48, 0xf9, 0x88, 0x25, 0x54,
];

/// Extended type of the PIFF sample encryption box.
pub const PIFF_SAMPLE_ENCRYPTION: [u8; 16] = [
    0xa2, 0x39, 0x4f, 0x52, 0x5a, 0x97, 0x4f, 0x14, 0xa2, 0x44, 0x6c, 0x42, 0x7c, 0x64, 0x8d, 0xf4,
];

/// Track Encryption Box (tenc) - default protection parameters of a track.
#[derive(Clone, Debug, PartialEq)]
pub struct TencBox {
    pub default_is_protected: bool,
    pub default_per_sample_iv_size: u8,
    pub default_kid: [u8; 16],
    pub default_crypt_byte_block: u8,
    pub default_skip_byte_block: u8,
    pub default_constant_iv: Option<Vec<u8>>,
    /// Only set by PIFF boxes: 1 for AES-CTR, 2 for AES-CBC.
    pub algorithm_id: Option<u32>,
}

impl TencBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let version = box_.version();
        let reader = &mut box_.reader;

        // reserved
        reader.skip(1)?;

        let mut default_crypt_byte_block = 0;
        let mut default_skip_byte_block = 0;

        if version == 0 {
            reader.skip(1)?;
        } else {
            let blocks = reader.read_u8()?;
            default_crypt_byte_block = blocks >> 4;
            default_skip_byte_block = blocks & 0x0F;
        }

        let default_is_protected = reader.read_u8()? != 0;
        let default_per_sample_iv_size = reader.read_u8()?;
        let default_kid = reader.read_array::<16>()?;
        let mut default_constant_iv = None;

        if default_is_protected && default_per_sample_iv_size == 0 {
            let size = reader.read_u8()?;

            if size != 8 && size != 16 {
                bail!("tenc box (invalid constant iv size {})", size);
            }

            default_constant_iv = Some(reader.read_bytes_u8(size as usize)?);
        }

        Ok(Self {
            default_is_protected,
            default_per_sample_iv_size,
            default_kid,
            default_crypt_byte_block,
            default_skip_byte_block,
            default_constant_iv,
            algorithm_id: None,
        })
    }

    /// Parse a PIFF track encryption box. The reader must be positioned right
    /// after the 16 byte extended type.
    pub fn from_piff(box_: &mut ParsedBox) -> Result<Self> {
        let reader = &mut box_.reader;

        // version and flags
        reader.skip(4)?;

        let algorithm_id = reader.read_u24()?;
        let default_per_sample_iv_size = reader.read_u8()?;
        let default_kid = reader.read_array::<16>()?;

        Ok(Self {
            default_is_protected: algorithm_id != 0,
            default_per_sample_iv_size,
            default_kid,
            default_crypt_byte_block: 0,
            default_skip_byte_block: 0,
            default_constant_iv: None,
            algorithm_id: Some(algorithm_id),
        })
    }
}
