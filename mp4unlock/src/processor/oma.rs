//! OMA DCF, both atomic objects (`odrm`) and tracks protected with `odkm`.

use super::{
    Result, StepTicker, TrackDecrypter,
    cipher::{cbc_decrypt_blocks, cbc_decrypt_padded, ctr_apply, expand_iv},
    copy_range,
    rewrite::{self, Decrypters},
};
use crate::{KeyMap, error::DecryptError, movie::Movie, progress::ProgressListener};
use log::{debug, warn};
use mp4unlock_boxes::{
    BoxHeader, Mp4Parser, Reader, fourcc,
    boxes::{OhdrBox, SchmBox},
    parser,
};
use std::io::{Cursor, Read, Seek, Write};

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
    let headers = BoxHeader::read_all(input)?;

    if headers.iter().any(|x| x.box_type == fourcc(b"moov")) {
        debug!("decrypting oma pdcf tracks");
        return rewrite::rewrite(input, output, listener, |movie| odkm_decrypters(keys, movie));
    }

    let mut ticker = StepTicker::new(listener, headers.len());
    let mut ordinal = 0;

    for header in &headers {
        if header.box_type == fourcc(b"odrm") {
            ordinal += 1;

            let key = keys
                .get_track(ordinal)
                .ok_or(DecryptError::TrackKeyNotFound(ordinal))?;

            let data = header.read_box(input)?;
            output.write_all(&decrypt_odrm(&data, header.offset, key)?)?;
        } else {
            copy_range(input, output, header.offset, header.size)?;
        }

        ticker.tick();
    }

    ticker.finish();
    Ok(())
}

/// Decrypt one atomic DCF object. `data` is the whole `odrm` box found at
/// `offset` in the file.
fn decrypt_odrm(data: &[u8], offset: u64, key: &[u8; 16]) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(data);
    let odrm = BoxHeader::read(&mut cursor, data.len() as u64)?
        .ok_or_else(|| DecryptError::InvalidFormat("empty odrm box".to_owned()))?;

    let children_start = odrm.header_size + 4;

    if odrm.size < children_start {
        return Err(DecryptError::InvalidFormat("truncated odrm box".to_owned()));
    }

    let version_and_flags = &data[odrm.header_size as usize..children_start as usize];
    let mut children = Vec::new();
    let mut ohdr = None;
    let mut odda = None;

    cursor.set_position(children_start);

    while let Some(child) = BoxHeader::read(&mut cursor, data.len() as u64)? {
        let bytes = &data[child.offset as usize..child.end() as usize];

        match &child.box_type.to_be_bytes() {
            b"odhe" => {
                let ohdr_box = read_ohdr(bytes, offset + child.offset)?;
                ohdr = Some((children.len(), child.offset, ohdr_box));
            }
            b"odda" => odda = Some((children.len(), read_odda(bytes)?)),
            _ => (),
        }

        children.push(bytes.to_vec());
        cursor.set_position(child.end());
    }

    let (Some((odhe_index, odhe_offset, ohdr)), Some((odda_index, ciphertext))) = (ohdr, odda)
    else {
        return Err(DecryptError::InvalidFormat(
            "odrm box without odhe/ohdr and odda".to_owned(),
        ));
    };

    let plaintext = decrypt_payload(
        ohdr.encryption_method,
        ohdr.padding_scheme,
        key,
        16,
        &ciphertext,
    )?;

    if plaintext.len() as u64 != ohdr.plaintext_length {
        return Err(DecryptError::PlaintextLengthMismatch {
            expected: ohdr.plaintext_length,
            actual: plaintext.len() as u64,
        });
    }

    // The encryption method and padding scheme become NULL and none.
    let method = (ohdr.method_offset - offset - odhe_offset) as usize;
    children[odhe_index][method] = OhdrBox::ENCRYPTION_NULL;
    children[odhe_index][method + 1] = OhdrBox::PADDING_NONE;

    let mut odda_payload = vec![0; 4];
    odda_payload.extend_from_slice(&(plaintext.len() as u64).to_be_bytes());
    odda_payload.extend_from_slice(&plaintext);
    children[odda_index] = make_box(b"odda", &odda_payload);

    let mut odrm_payload = version_and_flags.to_vec();

    for child in children {
        odrm_payload.extend_from_slice(&child);
    }

    debug!(
        "decrypted odrm box at offset {offset} ({} plaintext bytes)",
        plaintext.len()
    );

    Ok(make_box(b"odrm", &odrm_payload))
}

fn read_ohdr(odhe: &[u8], offset: u64) -> Result<OhdrBox> {
    let ohdr = mp4unlock_boxes::data!();

    Mp4Parser::new()
        .full_box("odhe", |mut box_| {
            let content_type_length = box_.reader.read_u8()?;
            box_.reader.skip(content_type_length as u64)?;
            parser::children(box_)
        })
        .full_box("ohdr", {
            let ohdr = ohdr.clone();
            move |mut box_| {
                *ohdr.borrow_mut() = Some(OhdrBox::new(&mut box_)?);
                Ok(())
            }
        })
        .parse_at(odhe, offset, false, false)?;

    ohdr.take()
        .ok_or_else(|| DecryptError::InvalidFormat("odhe box without ohdr".to_owned()))
}

/// Encrypted payload of an `odda` box.
fn read_odda(odda: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new_big_endian(odda);
    let size = reader.read_u32()?;
    reader.skip(if size == 1 { 12 } else { 4 })?;
    reader.skip(4)?;

    let length = reader.read_u64()?;

    if length > reader.remaining() {
        return Err(DecryptError::InvalidFormat(format!(
            "odda box declares {length} bytes but holds {}",
            reader.remaining()
        )));
    }

    Ok(reader.read_bytes_u8(length as usize)?)
}

fn make_box(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(payload.len() + 16);

    match u32::try_from(payload.len() + 8) {
        Ok(size) => {
            data.extend_from_slice(&size.to_be_bytes());
            data.extend_from_slice(name);
        }
        Err(_) => {
            data.extend_from_slice(&1_u32.to_be_bytes());
            data.extend_from_slice(name);
            data.extend_from_slice(&(payload.len() as u64 + 16).to_be_bytes());
        }
    }

    data.extend_from_slice(payload);
    data
}

/// Decrypt `payload`, an IV of `iv_length` bytes followed by the ciphertext,
/// with an OMA encryption method and padding scheme.
fn decrypt_payload(
    method: u8,
    padding: u8,
    key: &[u8; 16],
    iv_length: usize,
    payload: &[u8],
) -> Result<Vec<u8>> {
    if method == OhdrBox::ENCRYPTION_NULL {
        return Ok(payload.to_vec());
    }

    if method != OhdrBox::ENCRYPTION_AES_128_CBC && method != OhdrBox::ENCRYPTION_AES_128_CTR {
        return Err(DecryptError::Unsupported(format!(
            "oma encryption method {method}"
        )));
    }

    if payload.len() < iv_length {
        return Err(DecryptError::InvalidFormat(format!(
            "{} byte payload is shorter than its IV",
            payload.len()
        )));
    }

    let (iv, ciphertext) = payload.split_at(iv_length);
    let iv = expand_iv(iv)?;
    let mut data = ciphertext.to_vec();

    if method == OhdrBox::ENCRYPTION_AES_128_CTR {
        ctr_apply(key, &iv, &mut data);
        return Ok(data);
    }

    match padding {
        OhdrBox::PADDING_RFC_2630 => cbc_decrypt_padded(key, &iv, data),
        OhdrBox::PADDING_NONE if data.len() % 16 == 0 => {
            cbc_decrypt_blocks(key, &iv, &mut data);
            Ok(data)
        }
        OhdrBox::PADDING_NONE => Err(DecryptError::Padding),
        x => Err(DecryptError::Unsupported(format!("oma padding scheme {x}"))),
    }
}

/// Samples of a track protected with the `odkm` scheme.
pub(super) struct OdkmDecrypter {
    key: [u8; 16],
    method: u8,
    padding: u8,
    selective_encryption: bool,
    iv_length: usize,
}

impl TrackDecrypter for OdkmDecrypter {
    fn decrypt_sample(&mut self, data: Vec<u8>) -> Result<Vec<u8>> {
        let mut payload = data.as_slice();

        if self.selective_encryption {
            let Some((&indicator, rest)) = payload.split_first() else {
                return Err(DecryptError::InvalidFormat(
                    "empty selectively encrypted sample".to_owned(),
                ));
            };

            if indicator & 0x80 == 0 {
                return Ok(rest.to_vec());
            }

            payload = rest;
        }

        decrypt_payload(
            self.method,
            self.padding,
            &self.key,
            self.iv_length,
            payload,
        )
    }
}

/// Decrypters of every `odkm` track that has a track key.
pub(super) fn odkm_decrypters(keys: &KeyMap, movie: &Movie) -> Result<Decrypters> {
    let mut decrypters = Decrypters::new();

    for track in &movie.tracks {
        let Some(protection) = track
            .entries
            .iter()
            .filter(|x| x.is_protected() && x.scheme_type() == Some(SchmBox::ODKM))
            .find_map(|x| x.protection.as_ref())
        else {
            continue;
        };

        let Some(ohdr) = &protection.ohdr else {
            warn!("track {} has no ohdr box, copying it as is", track.id);
            continue;
        };

        let Some(key) = keys.get_track(track.id) else {
            warn!("no key for track {}, copying it as is", track.id);
            continue;
        };

        let odaf = protection.odaf.unwrap_or_default();

        debug!(
            "track {} uses oma method {} (selective encryption: {})",
            track.id, ohdr.encryption_method, odaf.selective_encryption
        );

        decrypters.insert(
            track.id,
            Box::new(OdkmDecrypter {
                key: *key,
                method: ohdr.encryption_method,
                padding: ohdr.padding_scheme,
                selective_encryption: odaf.selective_encryption,
                iv_length: if odaf.iv_length == 0 {
                    16
                } else {
                    odaf.iv_length as usize
                },
            }),
        );
    }

    Ok(decrypters)
}
