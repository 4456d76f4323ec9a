//! Marlin IPMP (ACBC).

use super::{
    Result, TrackDecrypter,
    cipher::{cbc_decrypt_padded, expand_iv},
    rewrite::{self, Decrypters},
};
use crate::{KeyMap, error::DecryptError, progress::ProgressListener};
use log::{debug, warn};
use mp4unlock_boxes::boxes::HdlrBox;
use std::io::{Read, Seek, Write};

pub(super) fn process<R, W>(
    keys: &KeyMap,
    input: &mut R,
    output: &mut W,
    listener: &mut dyn ProgressListener,
) -> Result<()>
where
    R: Read + Seek,
    W: Write + Seek,
{
    rewrite::rewrite(input, output, listener, |movie| {
        let mut decrypters = Decrypters::new();

        for track in &movie.tracks {
            if matches!(track.handler_type, HdlrBox::ODSM | HdlrBox::SDSM) {
                continue;
            }

            let Some(key) = keys.get_track(track.id) else {
                warn!("no key for track {}, copying it as is", track.id);
                continue;
            };

            debug!("decrypting marlin track {}", track.id);
            decrypters.insert(track.id, Box::new(MarlinDecrypter { key: *key }));
        }

        Ok(decrypters)
    })
}

/// Samples are a 16 byte IV followed by AES-128-CBC ciphertext with PKCS#7
/// padding.
struct MarlinDecrypter {
    key: [u8; 16],
}

impl TrackDecrypter for MarlinDecrypter {
    fn decrypt_sample(&mut self, data: Vec<u8>) -> Result<Vec<u8>> {
        if data.len() < 32 {
            return Err(DecryptError::InvalidFormat(format!(
                "{} byte sample is too short for an IV and a block",
                data.len()
            )));
        }

        let iv = expand_iv(&data[..16])?;
        cbc_decrypt_padded(&self.key, &iv, data[16..].to_vec())
    }
}
