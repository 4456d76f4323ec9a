//! This crate contains a mp4 parser ported from [shaka-player](https://github.com/shaka-project/shaka-player) project,
//! together with typed readers for the boxes that describe protected content
//! (`sinf`, `tenc`, `senc`, `saiz`/`saio`, the OMA DCF headers) and the sample
//! tables needed to locate encrypted samples.
//!
//! # Example
//!
//! ```
//! use mp4unlock_boxes::{boxes::FtypBox, parser::Mp4Parser};
//!
//! let data = [
//!     0, 0, 0, 16, b'f', b't', b'y', b'p', b'o', b'd', b'c', b'f', 0, 0, 0, 0,
//! ];
//! let ftyp = mp4unlock_boxes::data!();
//!
//! Mp4Parser::new()
//!     .base_box("ftyp", {
//!         let ftyp = ftyp.clone();
//!         move |mut box_| {
//!             *ftyp.borrow_mut() = Some(FtypBox::new(&mut box_)?);
//!             Ok(())
//!         }
//!     })
//!     .parse(&data, false, false)?;
//!
//! assert!(ftyp.take().unwrap().has_brand(FtypBox::ODCF));
//! # Ok::<(), mp4unlock_boxes::Error>(())
//! ```

pub mod boxes;
pub mod parser;

mod error;
mod header;
mod reader;

pub use error::Error;
pub use header::BoxHeader;
pub use parser::{Mp4Parser, ParsedBox, fourcc, type_from_string, type_to_string};
pub use reader::Reader;

/// A `Result` alias where the `Err` case is `mp4unlock_boxes::Error`.
pub type Result<T> = std::result::Result<T, Error>;
