use crate::{ParsedBox, Result};

/// OMA DRM Common Headers Box (ohdr).
#[derive(Clone, Debug)]
pub struct OhdrBox {
    pub encryption_method: u8,
    pub padding_scheme: u8,
    pub plaintext_length: u64,
    pub content_id: String,
    pub rights_issuer_url: String,
    pub textual_headers: Vec<u8>,
    /// Absolute offset of the `encryption_method` byte, `padding_scheme`
    /// follows it.
    pub method_offset: u64,
}

impl OhdrBox {
    pub const ENCRYPTION_NULL: u8 = 0;
    pub const ENCRYPTION_AES_128_CBC: u8 = 1;
    pub const ENCRYPTION_AES_128_CTR: u8 = 2;

    pub const PADDING_NONE: u8 = 0;
    pub const PADDING_RFC_2630: u8 = 1;

    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let method_offset = box_.position();
        let reader = &mut box_.reader;

        let encryption_method = reader.read_u8()?;
        let padding_scheme = reader.read_u8()?;
        let plaintext_length = reader.read_u64()?;
        let content_id_length = reader.read_u16()?;
        let rights_issuer_url_length = reader.read_u16()?;
        let textual_headers_length = reader.read_u16()?;

        let content_id = reader.read_bytes_u8(content_id_length as usize)?;
        let rights_issuer_url = reader.read_bytes_u8(rights_issuer_url_length as usize)?;
        let textual_headers = reader.read_bytes_u8(textual_headers_length as usize)?;

        Ok(Self {
            encryption_method,
            padding_scheme,
            plaintext_length,
            content_id: String::from_utf8_lossy(&content_id).into_owned(),
            rights_issuer_url: String::from_utf8_lossy(&rights_issuer_url).into_owned(),
            textual_headers,
            method_offset,
        })
    }
}

/// OMA DRM Access Unit Format Box (odaf).
#[derive(Clone, Copy, Debug, Default)]
pub struct OdafBox {
    /// Every sample starts with a byte telling whether it is encrypted.
    pub selective_encryption: bool,
    pub key_indicator_length: u8,
    pub iv_length: u8,
}

impl OdafBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let reader = &mut box_.reader;

        let flags = reader.read_u8()?;
        let key_indicator_length = reader.read_u8()?;
        let iv_length = reader.read_u8()?;

        Ok(Self {
            selective_encryption: flags & 0x80 != 0,
            key_indicator_length,
            iv_length,
        })
    }
}
