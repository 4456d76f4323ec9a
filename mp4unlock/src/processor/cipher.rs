use super::Result;
use crate::{error::DecryptError, scheme::CencScheme};
use aes::{
    Aes128,
    cipher::{
        BlockDecryptMut, KeyIvInit, StreamCipher, block_padding::Pkcs7, generic_array::GenericArray,
    },
};
use mp4unlock_boxes::boxes::Subsample;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

const BLOCK_SIZE: usize = 16;

/// Widen an 8 or 16 byte IV to a 16 byte counter block, zero filled on the right.
pub(crate) fn expand_iv(iv: &[u8]) -> Result<[u8; 16]> {
    if iv.len() != 8 && iv.len() != 16 {
        return Err(DecryptError::InvalidFormat(format!(
            "expected an 8 or 16 byte IV, got {} bytes",
            iv.len()
        )));
    }

    let mut block = [0; 16];
    block[..iv.len()].copy_from_slice(iv);
    Ok(block)
}

pub(crate) fn ctr_apply(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    Aes128Ctr::new(key.into(), iv.into()).apply_keystream(data);
}

/// AES-128-CBC with RFC 2630 (PKCS#7) padding, returns the plaintext.
pub(crate) fn cbc_decrypt_padded(key: &[u8; 16], iv: &[u8; 16], mut data: Vec<u8>) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(DecryptError::Padding);
    }

    let length = Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<Pkcs7>(&mut data)
        .map_err(|_| DecryptError::Padding)?
        .len();

    data.truncate(length);
    Ok(data)
}

/// AES-128-CBC over the whole blocks of `data`, a trailing partial block is
/// left as is.
pub(crate) fn cbc_decrypt_blocks(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    let mut decryptor = Aes128CbcDec::new(key.into(), iv.into());

    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        decryptor.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

/// Decrypts samples of one common encryption track.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SampleDecrypter {
    scheme: CencScheme,
    key: [u8; 16],
    crypt_byte_block: usize,
    skip_byte_block: usize,
}

impl SampleDecrypter {
    pub(crate) fn new(scheme: CencScheme, key: [u8; 16], crypt_byte_block: u8, skip_byte_block: u8) -> Self {
        Self {
            scheme,
            key,
            crypt_byte_block: crypt_byte_block as usize,
            skip_byte_block: skip_byte_block as usize,
        }
    }

    /// Decrypt `data` in place.
    ///
    /// Without `subsamples` the whole sample is one protected range.
    pub(crate) fn decrypt(&self, data: &mut [u8], iv: &[u8; 16], subsamples: &[Subsample]) -> Result<()> {
        let ranges = protected_ranges(data.len(), subsamples)?;

        match self.scheme {
            CencScheme::Cenc => {
                let mut cipher = Aes128Ctr::new((&self.key).into(), iv.into());

                for (start, end) in ranges {
                    cipher.apply_keystream(&mut data[start..end]);
                }
            }
            CencScheme::Cens => {
                let mut cipher = Aes128Ctr::new((&self.key).into(), iv.into());

                for (start, end) in ranges {
                    self.for_each_crypt_run(&mut data[start..end], |run| {
                        cipher.apply_keystream(run)
                    });
                }
            }
            CencScheme::Cbc1 => {
                // The chain runs across subsamples, gather the protected bytes.
                let mut buffer = Vec::with_capacity(data.len());

                for &(start, end) in &ranges {
                    buffer.extend_from_slice(&data[start..end]);
                }

                cbc_decrypt_blocks(&self.key, iv, &mut buffer);

                let mut position = 0;

                for (start, end) in ranges {
                    let length = end - start;
                    data[start..end].copy_from_slice(&buffer[position..position + length]);
                    position += length;
                }
            }
            CencScheme::Cbcs => {
                for (start, end) in ranges {
                    let mut decryptor = Aes128CbcDec::new((&self.key).into(), iv.into());

                    self.for_each_crypt_run(&mut data[start..end], |run| {
                        for block in run.chunks_exact_mut(BLOCK_SIZE) {
                            decryptor.decrypt_block_mut(GenericArray::from_mut_slice(block));
                        }
                    });
                }
            }
        }

        Ok(())
    }

    /// Call `f` with every encrypted run of the crypt/skip pattern over
    /// `range`. A `0:0` pattern encrypts everything.
    fn for_each_crypt_run<F: FnMut(&mut [u8])>(&self, range: &mut [u8], mut f: F) {
        let crypt_size = self.crypt_byte_block * BLOCK_SIZE;
        let skip_size = self.skip_byte_block * BLOCK_SIZE;

        if crypt_size == 0 {
            f(range);
            return;
        }

        let mut offset = 0;

        while offset < range.len() {
            let end = range.len().min(offset + crypt_size);
            f(&mut range[offset..end]);
            offset = end + skip_size;
        }
    }
}

/// `(start, end)` byte ranges of the protected parts of a sample.
fn protected_ranges(length: usize, subsamples: &[Subsample]) -> Result<Vec<(usize, usize)>> {
    if subsamples.is_empty() {
        return Ok(vec![(0, length)]);
    }

    let mut ranges = Vec::with_capacity(subsamples.len());
    let mut position = 0;

    for subsample in subsamples {
        let start = position + subsample.clear_bytes as usize;
        let end = start + subsample.encrypted_bytes as usize;

        if end > length {
            return Err(DecryptError::SubsampleError(format!(
                "subsamples describe {end} bytes but the sample has {length} bytes"
            )));
        }

        if end > start {
            ranges.push((start, end));
        }

        position = end;
    }

    Ok(ranges)
}
