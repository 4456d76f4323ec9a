//! Typed readers for the boxes inspected while decrypting.
//!
//! Every reader takes the [`ParsedBox`](crate::ParsedBox) handed to a parser
//! callback, so callers decide which part of the box tree is walked.

mod ftyp;
mod hdlr;
mod oma;
mod saiz;
mod schm;
mod senc;
mod stbl;
mod tenc;
mod tfhd;
mod trex;
mod trun;

pub use ftyp::FtypBox;
pub use hdlr::HdlrBox;
pub use oma::{OdafBox, OhdrBox};
pub use saiz::{SaioBox, SaizBox};
pub use schm::{FrmaBox, SchmBox};
pub use senc::{SencBox, SencSample, Subsample};
pub use stbl::{ChunkOffsetBox, StscBox, StscEntry, StszBox, TkhdBox};
pub use tenc::{PIFF_SAMPLE_ENCRYPTION, PIFF_TRACK_ENCRYPTION, TencBox};
pub use tfhd::TfhdBox;
pub use trex::TrexBox;
pub use trun::{TrunBox, TrunSample};

#[macro_export]
macro_rules! data {
    () => {
        std::rc::Rc::new(std::cell::RefCell::new(None))
    };
    ($val:expr) => {
        std::rc::Rc::new(std::cell::RefCell::new($val))
    };
}
