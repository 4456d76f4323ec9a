use crate::{ParsedBox, Result, fourcc};

/// File Type Box (ftyp).
#[derive(Clone, Debug, PartialEq)]
pub struct FtypBox {
    pub major_brand: u32,
    pub minor_version: u32,
    pub compatible_brands: Vec<u32>,
}

impl FtypBox {
    /// OMA DRM content format.
    pub const ODCF: u32 = fourcc(b"odcf");
    /// Marlin IPMP.
    pub const MGSV: u32 = fourcc(b"MGSV");
    /// Microsoft protected interoperable file format.
    pub const PIFF: u32 = fourcc(b"piff");

    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let reader = &mut box_.reader;

        let major_brand = reader.read_u32()?;
        let minor_version = reader.read_u32()?;
        let mut compatible_brands = Vec::new();

        while reader.remaining() >= 4 {
            compatible_brands.push(reader.read_u32()?);
        }

        Ok(Self {
            major_brand,
            minor_version,
            compatible_brands,
        })
    }

    /// True when `brand` is the major brand or one of the compatible brands.
    pub fn has_brand(&self, brand: u32) -> bool {
        self.major_brand == brand || self.compatible_brands.contains(&brand)
    }
}
