//! Track rewriter for files that are not fragmented.
//!
//! Every top-level box except `mdat` is written in order, followed by a single
//! `mdat` holding every chunk of every track. Decrypted samples may be shorter
//! than their ciphertext, so `stsz` and `stco`/`co64` of the written `moov`
//! are patched once the new layout is known.

use super::{
    Result, StepTicker, TrackDecrypter, copy_range, patch, read_at, strip_protection,
};
use crate::{error::DecryptError, movie::Movie, progress::ProgressListener};
use log::debug;
use mp4unlock_boxes::{BoxHeader, fourcc};
use std::{
    collections::HashMap,
    io::{Read, Seek, SeekFrom, Write},
};

pub(super) type Decrypters = HashMap<u32, Box<dyn TrackDecrypter>>;

/// Rewrite `input` into `output`. `prepare` picks the decrypter of every
/// track that should be decrypted, other tracks are copied.
pub(super) fn rewrite<R, W, F>(
    input: &mut R,
    output: &mut W,
    listener: &mut dyn ProgressListener,
    prepare: F,
) -> Result<()>
where
    R: Read + Seek,
    W: Write + Seek,
    F: FnOnce(&Movie) -> Result<Decrypters>,
{
    let headers = BoxHeader::read_all(input)?;

    if headers.iter().any(|x| x.box_type == fourcc(b"moof")) {
        return Err(DecryptError::Unsupported(
            "fragmented files with this protection scheme".to_owned(),
        ));
    }

    let Some(moov) = headers.iter().find(|x| x.box_type == fourcc(b"moov")) else {
        return Err(DecryptError::InvalidFormat("no movie box".to_owned()));
    };

    let mut moov_data = moov.read_box(input)?;
    let movie = Movie::parse(&moov_data, moov.offset)?;
    let mut decrypters = prepare(&movie)?;

    strip_protection(&movie, &mut moov_data, moov.offset, |track, _| {
        decrypters.contains_key(&track.id)
    })?;

    let mut chunks = Vec::new();

    for (index, track) in movie.tracks.iter().enumerate() {
        chunks.extend(track.chunks(index)?);
    }

    chunks.sort_by_key(|x| x.offset);

    // Everything but the media data keeps its order and size.
    let mut position = output.stream_position()?;
    let mut moov_position = position;

    for header in headers.iter().filter(|x| x.box_type != fourcc(b"mdat")) {
        if header.offset == moov.offset {
            moov_position = position;
            output.write_all(&moov_data)?;
        } else {
            copy_range(input, output, header.offset, header.size)?;
        }

        position += header.size;
    }

    let mdat_position = position;
    output.write_all(&[0, 0, 0, 1])?;
    output.write_all(b"mdat")?;
    output.write_all(&[0; 8])?;
    position += 16;

    // New chunk offsets and sample sizes, by track index.
    let mut chunk_offsets = movie
        .tracks
        .iter()
        .map(|x| x.chunk_offsets.as_ref().map_or(Vec::new(), |x| x.offsets.clone()))
        .collect::<Vec<_>>();
    let mut sample_sizes = movie
        .tracks
        .iter()
        .map(|x| {
            let count = x.stsz.as_ref().map_or(0, |x| x.sample_count as usize);
            (0..count)
                .map(|i| x.stsz.as_ref().and_then(|x| x.size_of(i)).unwrap_or(0))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let mut ticker = StepTicker::new(listener, chunks.len());

    for chunk in &chunks {
        let track = &movie.tracks[chunk.track];
        let mut decrypter = decrypters.get_mut(&track.id);
        let mut sample_offset = chunk.offset;

        chunk_offsets[chunk.track][chunk.index] = position;

        for (i, &size) in chunk.sample_sizes.iter().enumerate() {
            let mut data = read_at(input, sample_offset, size as u64)?;
            sample_offset += size as u64;

            if let Some(decrypter) = decrypter.as_mut() {
                data = decrypter.decrypt_sample(data)?;
            }

            sample_sizes[chunk.track][chunk.first_sample + i] = u32::try_from(data.len())
                .map_err(|_| {
                    DecryptError::Unsupported(format!("{} byte sample", data.len()))
                })?;

            output.write_all(&data)?;
            position += data.len() as u64;
        }

        ticker.tick();
    }

    debug!(
        "wrote {} chunks into a {} byte mdat",
        chunks.len(),
        position - mdat_position
    );

    output.seek(SeekFrom::Start(mdat_position + 8))?;
    output.write_all(&(position - mdat_position).to_be_bytes())?;

    for (index, track) in movie.tracks.iter().enumerate() {
        if let Some(table) = &track.chunk_offsets {
            for (i, &offset) in chunk_offsets[index].iter().enumerate() {
                if table.is_64_bit {
                    let field = table.entries_offset + 8 * i as u64;
                    patch(&mut moov_data, moov.offset, field, &offset.to_be_bytes())?;
                } else {
                    let offset32 =
                        u32::try_from(offset).map_err(|_| DecryptError::OffsetOverflow(offset))?;
                    let field = table.entries_offset + 4 * i as u64;
                    patch(&mut moov_data, moov.offset, field, &offset32.to_be_bytes())?;
                }
            }
        }

        let Some(stsz) = &track.stsz else {
            continue;
        };

        let sizes = &sample_sizes[index];

        if stsz.sample_size != 0 {
            if sizes.iter().any(|x| *x != stsz.sample_size) {
                return Err(DecryptError::Unsupported(format!(
                    "track {} has a constant sample size that decryption changes",
                    track.id
                )));
            }

            continue;
        }

        for (i, size) in sizes.iter().enumerate() {
            let field = stsz.entries_offset + 4 * i as u64;
            patch(&mut moov_data, moov.offset, field, &size.to_be_bytes())?;
        }
    }

    output.seek(SeekFrom::Start(moov_position))?;
    output.write_all(&moov_data)?;
    output.seek(SeekFrom::End(0))?;

    ticker.finish();
    Ok(())
}
