//! Common encryption (`cenc`, `cens`, `cbc1`, `cbcs`) and PIFF.
//!
//! The output keeps the exact layout of the input. Protection boxes are
//! renamed to `free` and samples are decrypted where they are.

use super::{
    FREE, Result, StepTicker,
    cipher::{SampleDecrypter, expand_iv},
    copy_range, read_at, rename, strip_protection,
};
use crate::{
    KeyMap,
    error::DecryptError,
    keys::Kid,
    movie::{Movie, PIFF_PSSH, SampleEntry, Track},
    progress::ProgressListener,
    scheme::CencScheme,
};
use log::{debug, warn};
use mp4unlock_boxes::{
    BoxHeader, Mp4Parser, ParsedBox, Reader,
    boxes::{
        PIFF_SAMPLE_ENCRYPTION, SaioBox, SaizBox, SencBox, SencSample, Subsample, TencBox,
        TfhdBox, TrunBox,
    },
    parser,
};
use std::{
    cell::RefCell,
    io::{Read, Seek, SeekFrom, Write},
    rc::Rc,
};

/// Largest `mdat` that is decrypted in memory, others are patched in place.
const IN_MEMORY_MDAT_LIMIT: u64 = 64 * 1024 * 1024;

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
    let mut ticker = StepTicker::new(listener, headers.len());
    let mut movie = None;
    let mut pending = Vec::new();

    for header in &headers {
        match &header.box_type.to_be_bytes() {
            b"moov" => {
                let mut data = header.read_box(input)?;
                let parsed = Movie::parse(&data, header.offset)?;

                strip_protection(&parsed, &mut data, header.offset, |track, entry| {
                    matches!(TrackEncryption::of(track, entry), Ok(Some(_)))
                })?;

                for (index, track) in parsed.tracks.iter().enumerate() {
                    let samples = track_samples(keys, input, track, index)?;

                    if !samples.is_empty() {
                        for &offset in &track.aux_info {
                            rename(&mut data, header.offset, offset, FREE)?;
                        }
                    }

                    pending.extend(samples);
                }

                output.write_all(&data)?;
                movie = Some(parsed);
            }
            b"moof" => {
                let Some(movie) = &movie else {
                    return Err(DecryptError::InvalidFormat(
                        "movie fragment before the movie box".to_owned(),
                    ));
                };

                let mut data = header.read_box(input)?;
                let fragment = Fragment::parse(&data, header.offset)?;

                for &offset in &fragment.free {
                    rename(&mut data, header.offset, offset, FREE)?;
                }

                pending.extend(fragment.samples(keys, input, movie, header.offset)?);
                output.write_all(&data)?;
            }
            b"mdat" if header.size <= IN_MEMORY_MDAT_LIMIT => {
                let mut data = header.read_box(input)?;
                decrypt_buffer(&mut pending, &mut data, header.offset)?;
                output.write_all(&data)?;
            }
            b"pssh" => {
                let mut data = header.read_box(input)?;
                rename(&mut data, header.offset, header.offset + 4, FREE)?;
                output.write_all(&data)?;
            }
            _ => copy_range(input, output, header.offset, header.size)?,
        }

        ticker.tick();
    }

    if !pending.is_empty() {
        debug!("decrypting {} samples in place", pending.len());
        pending.sort_by_key(|x| x.offset);

        for sample in &pending {
            let mut data = read_at(input, sample.offset, sample.size)?;
            sample.decrypt(&mut data)?;
            output.seek(SeekFrom::Start(sample.offset))?;
            output.write_all(&data)?;
        }

        output.seek(SeekFrom::End(0))?;
    }

    ticker.finish();
    Ok(())
}

/// A protected sample waiting for the bytes it covers.
struct PendingSample {
    offset: u64,
    size: u64,
    iv: [u8; 16],
    subsamples: Vec<Subsample>,
    decrypter: SampleDecrypter,
}

impl PendingSample {
    fn decrypt(&self, data: &mut [u8]) -> Result<()> {
        self.decrypter.decrypt(data, &self.iv, &self.subsamples)
    }
}

/// Decrypt the pending samples that lie inside `data`, which starts at `base`.
fn decrypt_buffer(pending: &mut Vec<PendingSample>, data: &mut [u8], base: u64) -> Result<()> {
    let end = base + data.len() as u64;
    let (inside, outside): (Vec<_>, Vec<_>) = pending
        .drain(..)
        .partition(|x| {
            x.offset >= base && x.offset.checked_add(x.size).is_some_and(|x| x <= end)
        });

    for sample in inside {
        let start = (sample.offset - base) as usize;
        sample.decrypt(&mut data[start..start + sample.size as usize])?;
    }

    *pending = outside;
    Ok(())
}

/// Encryption parameters of one protected sample entry.
struct TrackEncryption<'a> {
    track_id: u32,
    scheme: CencScheme,
    tenc: &'a TencBox,
}

impl<'a> TrackEncryption<'a> {
    fn of(track: &Track, entry: &'a SampleEntry) -> Result<Option<Self>> {
        if !entry.is_protected() {
            return Ok(None);
        }

        let Some(protection) = &entry.protection else {
            return Ok(None);
        };

        let Some(tenc) = protection.tenc.as_ref().filter(|x| x.default_is_protected) else {
            return Ok(None);
        };

        let scheme = match entry.scheme_type().and_then(CencScheme::from_scheme_type) {
            Some(scheme) => scheme,
            None => match tenc.algorithm_id.map(piff_scheme).transpose()?.flatten() {
                Some(scheme) => scheme,
                None => return Ok(None),
            },
        };

        Ok(Some(Self {
            track_id: track.id,
            scheme,
            tenc,
        }))
    }

    /// Decrypter for the samples described by `senc`, `None` when a PIFF
    /// override marks them as clear.
    fn decrypter(&self, keys: &KeyMap, senc: Option<&SencBox>) -> Result<Option<SampleDecrypter>> {
        let scheme = match senc.and_then(|x| x.algorithm_id) {
            Some(algorithm_id) => match piff_scheme(algorithm_id)? {
                Some(scheme) => scheme,
                None => return Ok(None),
            },
            None => self.scheme,
        };

        let kid = Kid(senc.and_then(|x| x.kid).unwrap_or(self.tenc.default_kid));
        let key = keys
            .get(&kid)
            .or_else(|| keys.get_track(self.track_id))
            .ok_or(DecryptError::KeyNotFound(kid))?;

        let (crypt_byte_block, skip_byte_block) = match scheme {
            CencScheme::Cens | CencScheme::Cbcs => (
                self.tenc.default_crypt_byte_block,
                self.tenc.default_skip_byte_block,
            ),
            CencScheme::Cenc | CencScheme::Cbc1 => (0, 0),
        };

        Ok(Some(SampleDecrypter::new(
            scheme,
            *key,
            crypt_byte_block,
            skip_byte_block,
        )))
    }

    fn iv_size(&self) -> u8 {
        self.tenc.default_per_sample_iv_size
    }

    /// Auxiliary information of the `index`th sample.
    fn aux_sample(&self, aux: &[SencSample], index: usize) -> Result<SencSample> {
        match aux.get(index) {
            Some(sample) => Ok(sample.clone()),
            None if self.tenc.default_constant_iv.is_some() => Ok(SencSample::default()),
            None => Err(DecryptError::InvalidFormat(format!(
                "track {} has no encryption information for sample {}",
                self.track_id,
                index + 1
            ))),
        }
    }

    fn pending(
        &self,
        decrypter: SampleDecrypter,
        offset: u64,
        size: u64,
        aux: SencSample,
    ) -> Result<PendingSample> {
        let iv = match (&aux.iv, &self.tenc.default_constant_iv) {
            (iv, _) if !iv.is_empty() => expand_iv(iv)?,
            (_, Some(iv)) => expand_iv(iv)?,
            _ => {
                return Err(DecryptError::InvalidFormat(format!(
                    "track {} has a protected sample without an IV",
                    self.track_id
                )));
            }
        };

        Ok(PendingSample {
            offset,
            size,
            iv,
            subsamples: aux.subsamples,
            decrypter,
        })
    }
}

fn piff_scheme(algorithm_id: u32) -> Result<Option<CencScheme>> {
    match algorithm_id {
        0 => Ok(None),
        1 => Ok(Some(CencScheme::Cenc)),
        2 => Ok(Some(CencScheme::Cbc1)),
        x => Err(DecryptError::Unsupported(format!("PIFF algorithm id {x}"))),
    }
}

/// Protected samples of a track that is not fragmented, located through its
/// sample tables.
fn track_samples<R: Read + Seek>(
    keys: &KeyMap,
    input: &mut R,
    track: &Track,
    index: usize,
) -> Result<Vec<PendingSample>> {
    let Some(first) = track
        .entries
        .iter()
        .map(|x| TrackEncryption::of(track, x))
        .find_map(|x| x.transpose())
        .transpose()?
    else {
        return Ok(Vec::new());
    };

    let chunks = track.chunks(index)?;

    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let aux = match (&track.senc, &track.saiz, &track.saio) {
        (Some(senc), _, _) => senc.samples(first.iv_size())?,
        (None, Some(saiz), Some(saio)) => {
            let runs = if saio.offsets.len() == 1 {
                vec![(saio.offsets[0], saiz.sample_count as usize)]
            } else if saio.offsets.len() == chunks.len() {
                saio.offsets
                    .iter()
                    .zip(&chunks)
                    .map(|(offset, chunk)| (*offset, chunk.sample_sizes.len()))
                    .collect()
            } else {
                return Err(DecryptError::InvalidFormat(format!(
                    "track {} has {} saio offsets for {} chunks",
                    track.id,
                    saio.offsets.len(),
                    chunks.len()
                )));
            };

            read_aux_info(input, saiz, &runs, first.iv_size())?
        }
        _ => Vec::new(),
    };

    let senc = track.senc.as_ref();
    let mut samples = Vec::new();

    for chunk in chunks {
        let Some(entry) = track.entry(chunk.description_index) else {
            return Err(DecryptError::InvalidFormat(format!(
                "track {} refers to missing sample description {}",
                track.id, chunk.description_index
            )));
        };

        let Some(encryption) = TrackEncryption::of(track, entry)? else {
            continue;
        };

        let Some(decrypter) = encryption.decrypter(keys, senc)? else {
            continue;
        };

        let mut offset = chunk.offset;

        for (i, &size) in chunk.sample_sizes.iter().enumerate() {
            let aux = encryption.aux_sample(&aux, chunk.first_sample + i)?;
            samples.push(encryption.pending(decrypter, offset, size as u64, aux)?);
            offset = offset.checked_add(size as u64).ok_or_else(|| {
                DecryptError::InvalidFormat(format!(
                    "track {} has samples past the end of the file",
                    track.id
                ))
            })?;
        }
    }

    debug!(
        "track {} has {} protected samples (non fragmented)",
        track.id,
        samples.len()
    );

    Ok(samples)
}

/// Read sample auxiliary information stored in runs of `(offset, sample count)`.
fn read_aux_info<R: Read + Seek>(
    input: &mut R,
    saiz: &SaizBox,
    runs: &[(u64, usize)],
    iv_size: u8,
) -> Result<Vec<SencSample>> {
    let mut samples = Vec::with_capacity(saiz.sample_count.min(65536) as usize);

    for &(offset, count) in runs {
        let first = samples.len();
        let last = (first + count).min(saiz.sample_count as usize);
        let sizes = (first..last)
            .map(|x| saiz.size_of(x) as u64)
            .collect::<Vec<_>>();

        let mut reader = Reader::new_big_endian(read_at(input, offset, sizes.iter().sum())?);

        for size in sizes {
            let start = reader.get_position();
            samples.push(SencSample::read(
                &mut reader,
                iv_size,
                size > iv_size as u64,
            )?);
            reader.seek(start + size)?;
        }
    }

    Ok(samples)
}

/// Boxes of a `moof` that locate and describe its samples.
#[derive(Default)]
struct Fragment {
    trafs: Vec<Traf>,
    /// Type field offsets of the boxes that become `free`.
    free: Vec<u64>,
}

#[derive(Default)]
struct Traf {
    tfhd: Option<TfhdBox>,
    truns: Vec<TrunBox>,
    senc: Option<SencBox>,
    saiz: Option<SaizBox>,
    saio: Option<SaioBox>,
}

impl Fragment {
    fn parse(data: &[u8], offset: u64) -> Result<Self> {
        let fragment = Rc::new(RefCell::new(Fragment::default()));

        Mp4Parser::new()
            .base_box("moof", parser::children)
            .base_box("traf", {
                let fragment = fragment.clone();
                move |box_| {
                    fragment.borrow_mut().trafs.push(Traf::default());
                    parser::children(box_)
                }
            })
            .full_box(
                "tfhd",
                on_traf(&fragment, |traf, box_| {
                    traf.tfhd = Some(TfhdBox::new(box_)?);
                    Ok(None)
                }),
            )
            .full_box(
                "trun",
                on_traf(&fragment, |traf, box_| {
                    traf.truns.push(TrunBox::new(box_)?);
                    Ok(None)
                }),
            )
            .full_box(
                "senc",
                on_traf(&fragment, |traf, box_| {
                    traf.senc = Some(SencBox::new(box_)?);
                    Ok(Some(box_.type_offset()))
                }),
            )
            .full_box(
                "saiz",
                on_traf(&fragment, |traf, box_| {
                    traf.saiz = Some(SaizBox::new(box_)?);
                    Ok(Some(box_.type_offset()))
                }),
            )
            .full_box(
                "saio",
                on_traf(&fragment, |traf, box_| {
                    traf.saio = Some(SaioBox::new(box_)?);
                    Ok(Some(box_.type_offset()))
                }),
            )
            .base_box("uuid", {
                let fragment = fragment.clone();
                move |mut box_| {
                    let extended_type = box_.reader.read_array::<16>()?;
                    let mut fragment = fragment.borrow_mut();

                    if extended_type == PIFF_SAMPLE_ENCRYPTION {
                        let senc = SencBox::from_piff(&mut box_)?;
                        if let Some(traf) = fragment.trafs.last_mut() {
                            traf.senc = Some(senc);
                        }
                        fragment.free.push(box_.type_offset());
                    } else if extended_type == PIFF_PSSH {
                        fragment.free.push(box_.type_offset());
                    }

                    Ok(())
                }
            })
            .full_box("pssh", {
                let fragment = fragment.clone();
                move |box_| {
                    fragment.borrow_mut().free.push(box_.type_offset());
                    Ok(())
                }
            })
            .parse_at(data, offset, false, false)?;

        Ok(fragment.take())
    }

    /// Protected samples of every track fragment. `moof_offset` is the
    /// absolute offset of the `moof` box.
    fn samples<R: Read + Seek>(
        &self,
        keys: &KeyMap,
        input: &mut R,
        movie: &Movie,
        moof_offset: u64,
    ) -> Result<Vec<PendingSample>> {
        let mut samples = Vec::new();
        let mut previous_end = moof_offset;

        for (i, traf) in self.trafs.iter().enumerate() {
            let Some(tfhd) = &traf.tfhd else {
                return Err(DecryptError::InvalidFormat(
                    "track fragment without a tfhd box".to_owned(),
                ));
            };

            let trex = movie.trex.get(&tfhd.track_id);
            let base = match tfhd.base_data_offset {
                Some(offset) => offset,
                None if tfhd.default_base_is_moof || i == 0 => moof_offset,
                None => previous_end,
            };

            let description_index = tfhd
                .sample_description_index
                .or(trex.map(|x| x.default_sample_description_index))
                .unwrap_or(1);

            // Absolute (offset, size) of every sample of the fragment.
            let mut locations = Vec::new();
            let mut offset = base;

            for trun in &traf.truns {
                if let Some(data_offset) = trun.data_offset {
                    offset = base.checked_add_signed(data_offset as i64).ok_or_else(|| {
                        DecryptError::InvalidFormat(format!(
                            "trun data offset {data_offset} points before the file"
                        ))
                    })?;
                }

                for sample in &trun.samples {
                    let size = sample
                        .sample_size
                        .or(tfhd.default_sample_size)
                        .or(trex.map(|x| x.default_sample_size))
                        .ok_or_else(|| {
                            DecryptError::InvalidFormat(format!(
                                "track {} has a sample without a size",
                                tfhd.track_id
                            ))
                        })? as u64;

                    locations.push((offset, size));
                    offset = offset.checked_add(size).ok_or_else(|| {
                        DecryptError::InvalidFormat(format!(
                            "track {} has samples past the end of the file",
                            tfhd.track_id
                        ))
                    })?;
                }
            }

            previous_end = offset;

            let Some(track) = movie.track(tfhd.track_id) else {
                warn!("skipping fragment of unknown track {}", tfhd.track_id);
                continue;
            };

            let Some(entry) = track.entry(description_index) else {
                return Err(DecryptError::InvalidFormat(format!(
                    "track {} refers to missing sample description {description_index}",
                    track.id
                )));
            };

            let Some(encryption) = TrackEncryption::of(track, entry)? else {
                continue;
            };

            let Some(decrypter) = encryption.decrypter(keys, traf.senc.as_ref())? else {
                continue;
            };

            let aux = match (&traf.senc, &traf.saiz, &traf.saio) {
                (Some(senc), _, _) => senc.samples(encryption.iv_size())?,
                (None, Some(saiz), Some(saio)) if !saio.offsets.is_empty() => {
                    let offset = base.checked_add(saio.offsets[0]).ok_or_else(|| {
                        DecryptError::InvalidFormat(format!(
                            "saio offset {} points past the end of the file",
                            saio.offsets[0]
                        ))
                    })?;
                    let runs = [(offset, saiz.sample_count as usize)];
                    read_aux_info(input, saiz, &runs, encryption.iv_size())?
                }
                _ => Vec::new(),
            };

            for (index, (offset, size)) in locations.into_iter().enumerate() {
                let aux = encryption.aux_sample(&aux, index)?;
                samples.push(encryption.pending(decrypter, offset, size, aux)?);
            }
        }

        Ok(samples)
    }
}

/// Callback on the innermost `traf`. `f` returns the type offset of a box
/// that becomes `free`.
fn on_traf<F>(
    fragment: &Rc<RefCell<Fragment>>,
    f: F,
) -> impl Fn(ParsedBox) -> parser::HandlerResult + 'static
where
    F: Fn(&mut Traf, &mut ParsedBox) -> mp4unlock_boxes::Result<Option<u64>> + 'static,
{
    let fragment = fragment.clone();
    move |mut box_| {
        let mut fragment = fragment.borrow_mut();

        let Some(traf) = fragment.trafs.last_mut() else {
            return Ok(());
        };

        if let Some(offset) = f(traf, &mut box_)? {
            fragment.free.push(offset);
        }

        Ok(())
    }
}
