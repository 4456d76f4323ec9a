use crate::{ParsedBox, Result, fourcc};

/// Handler Reference Box (hdlr).
pub struct HdlrBox {
    pub handler_type: u32,
}

impl HdlrBox {
    /// Object descriptor stream.
    pub const ODSM: u32 = fourcc(b"odsm");
    /// Scene description stream.
    pub const SDSM: u32 = fourcc(b"sdsm");

    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        // pre_defined
        box_.reader.skip(4)?;

        Ok(Self {
            handler_type: box_.reader.read_u32()?,
        })
    }
}
