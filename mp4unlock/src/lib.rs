//! This crate decrypts protected mp4 files with known keys, in pure Rust.
//!
//! The protection scheme is detected from the file itself and one of the
//! following strategies is used.
//!
//! - MPEG common encryption (`cenc`, `cens`, `cbc1`, `cbcs`) and PIFF, keys
//!   are addressed by KID.
//! - OMA DCF, atomic objects and `odkm` protected tracks, keys are addressed
//!   by track ID.
//! - Marlin IPMP, keys are addressed by track ID.
//!
//! Files with no known protection are copied unchanged.
//!
//! # Example
//!
//! ```no_run
//! use mp4unlock::{DecryptJob, ProgressBridge, progress};
//!
//! let (sender, events) = progress::channel();
//! let handle = DecryptJob::builder()
//!     .input("encrypted.mp4")
//!     .output("decrypted.mp4")
//!     .key("eb676abbcb345e96bbcf616630f1a3da", "100b6c20940f779a4589152b57d2dacb")?
//!     .progress(ProgressBridge::Channel(sender))
//!     .build()
//!     .spawn()
//!     .expect("cannot spawn a worker thread");
//!
//! events.dispatch(|step, total| println!("{step}/{total}"));
//! handle.join()?;
//! # Ok::<(), mp4unlock::Error>(())
//! ```

mod error;
mod job;
mod keys;
mod movie;
mod processor;
pub mod progress;
mod scheme;

pub use error::{DecryptError, Error};
pub use job::{
    DecryptJob, DecryptJobBuilder, DecryptRequest, JobHandle, JobState, decrypt, decrypt_file,
};
pub use keys::{KeyMap, KeyMapBuilder, Kid};
pub use processor::Processor;
pub use progress::{
    KdamRenderer, LocalIndicator, ProgressBridge, ProgressEvents, ProgressListener,
    ProgressRenderer, ProgressSender, ProgressTick,
};
pub use scheme::{CencScheme, ProtectionScheme, detect};

/// A `Result` alias where the `Err` case is `mp4unlock::Error`.
pub type Result<T> = std::result::Result<T, Error>;
