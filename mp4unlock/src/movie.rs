//! Track level view of a `moov` box.

use crate::error::DecryptError;
use mp4unlock_boxes::{
    Mp4Parser, ParsedBox, fourcc,
    boxes::{
        ChunkOffsetBox, FrmaBox, HdlrBox, OdafBox, OhdrBox, PIFF_TRACK_ENCRYPTION, SaioBox,
        SaizBox, SchmBox, SencBox, StscBox, StszBox, TencBox, TkhdBox, TrexBox,
    },
    parser::{self, HandlerResult},
};
use std::{cell::RefCell, collections::HashMap, rc::Rc};

type Shared = Rc<RefCell<Movie>>;

/// Sample entry formats that wrap a protected original format.
pub(crate) const PROTECTED_FORMATS: [u32; 7] = [
    fourcc(b"encv"),
    fourcc(b"enca"),
    fourcc(b"enct"),
    fourcc(b"encs"),
    fourcc(b"encm"),
    fourcc(b"encf"),
    fourcc(b"encp"),
];

/// Extended type of the PIFF protection system specific header box.
pub(crate) const PIFF_PSSH: [u8; 16] = [
    0xd0, 0x8a, 0x4f, 0x18, 0x10, 0xf3, 0x4a, 0x82, 0xb6, 0xc8, 0x32, 0xd8, 0xab, 0xa1, 0x83, 0xd3,
];

#[derive(Default)]
pub(crate) struct Movie {
    pub(crate) tracks: Vec<Track>,
    pub(crate) trex: HashMap<u32, TrexBox>,
    /// Type field offsets of `pssh` boxes.
    pub(crate) pssh: Vec<u64>,
}

#[derive(Default)]
pub(crate) struct Track {
    pub(crate) id: u32,
    pub(crate) handler_type: u32,
    pub(crate) entries: Vec<SampleEntry>,
    pub(crate) stsz: Option<StszBox>,
    pub(crate) stsc: Option<StscBox>,
    pub(crate) chunk_offsets: Option<ChunkOffsetBox>,
    pub(crate) senc: Option<SencBox>,
    pub(crate) saiz: Option<SaizBox>,
    pub(crate) saio: Option<SaioBox>,
    /// Type field offsets of the `senc`, `saiz` and `saio` boxes of the track.
    pub(crate) aux_info: Vec<u64>,
}

pub(crate) struct SampleEntry {
    pub(crate) format: u32,
    pub(crate) type_offset: u64,
    pub(crate) protection: Option<Protection>,
}

#[derive(Default)]
pub(crate) struct Protection {
    pub(crate) original_format: Option<u32>,
    pub(crate) schm: Option<SchmBox>,
    pub(crate) tenc: Option<TencBox>,
    pub(crate) ohdr: Option<OhdrBox>,
    pub(crate) odaf: Option<OdafBox>,
    /// Type field offsets of every `sinf` of the entry.
    pub(crate) sinf: Vec<u64>,
}

/// Samples of one chunk, read from the sample tables.
pub(crate) struct Chunk {
    pub(crate) track: usize,
    pub(crate) index: usize,
    pub(crate) offset: u64,
    pub(crate) description_index: u32,
    pub(crate) first_sample: usize,
    pub(crate) sample_sizes: Vec<u32>,
}

impl Movie {
    /// Parse the `moov` box in `data`, which starts at `offset` in the file.
    pub(crate) fn parse(data: &[u8], offset: u64) -> Result<Self, DecryptError> {
        let movie = Rc::new(RefCell::new(Movie::default()));

        Mp4Parser::new()
            .base_box("moov", parser::children)
            .base_box("trak", {
                let movie = movie.clone();
                move |box_| {
                    movie.borrow_mut().tracks.push(Track::default());
                    parser::children(box_)
                }
            })
            .full_box(
                "tkhd",
                on_track(&movie, |track, box_| {
                    track.id = TkhdBox::new(box_)?.track_id;
                    Ok(())
                }),
            )
            .base_box("mdia", parser::children)
            .full_box(
                "hdlr",
                on_track(&movie, |track, box_| {
                    track.handler_type = HdlrBox::new(box_)?.handler_type;
                    Ok(())
                }),
            )
            .base_box("minf", parser::children)
            .base_box("stbl", parser::children)
            .full_box("stsd", {
                let movie = movie.clone();
                move |mut box_| {
                    let payload_offset = box_.payload_offset();
                    let count = box_.reader.read_u32()?;

                    for _ in 0..count {
                        if box_.reader.remaining() < 8 {
                            break;
                        }

                        let type_offset = box_.position() + 4;
                        let position = box_.reader.get_position();
                        box_.reader.skip(4)?;
                        let format = box_.reader.read_u32()?;
                        box_.reader.seek(position)?;

                        if let Some(track) = movie.borrow_mut().tracks.last_mut() {
                            track.entries.push(SampleEntry {
                                format,
                                type_offset,
                                protection: None,
                            });
                        }

                        box_.parser.parse_next(
                            payload_offset,
                            &mut box_.reader,
                            box_.partial_okay,
                            box_.stop_on_partial,
                        )?;
                    }

                    Ok(())
                }
            })
            .base_box("encv", parser::visual_sample_entry)
            .base_box("enca", parser::audio_sample_entry)
            .base_box("enct", parser::generic_sample_entry)
            .base_box("encs", parser::generic_sample_entry)
            .base_box("encm", parser::generic_sample_entry)
            .base_box("encf", parser::generic_sample_entry)
            .base_box("encp", parser::generic_sample_entry)
            .base_box("sinf", {
                let movie = movie.clone();
                move |box_| {
                    if let Some(protection) = movie.borrow_mut().protection() {
                        protection.sinf.push(box_.type_offset());
                    }
                    parser::children(box_)
                }
            })
            .base_box(
                "frma",
                on_protection(&movie, |protection, box_| {
                    protection.original_format = Some(FrmaBox::new(box_)?.original_format);
                    Ok(())
                }),
            )
            .full_box(
                "schm",
                on_protection(&movie, |protection, box_| {
                    protection.schm = Some(SchmBox::new(box_)?);
                    Ok(())
                }),
            )
            .base_box("schi", parser::children)
            .full_box(
                "tenc",
                on_protection(&movie, |protection, box_| {
                    protection.tenc = Some(TencBox::new(box_)?);
                    Ok(())
                }),
            )
            .full_box("odkm", parser::children)
            .full_box(
                "ohdr",
                on_protection(&movie, |protection, box_| {
                    protection.ohdr = Some(OhdrBox::new(box_)?);
                    Ok(())
                }),
            )
            .full_box(
                "odaf",
                on_protection(&movie, |protection, box_| {
                    protection.odaf = Some(OdafBox::new(box_)?);
                    Ok(())
                }),
            )
            .base_box("uuid", {
                let movie = movie.clone();
                move |mut box_| {
                    let type_offset = box_.type_offset();
                    let extended_type = box_.reader.read_array::<16>()?;
                    let mut movie = movie.borrow_mut();

                    if extended_type == PIFF_TRACK_ENCRYPTION {
                        if let Some(protection) = movie.protection() {
                            protection.tenc = Some(TencBox::from_piff(&mut box_)?);
                        }
                    } else if extended_type == PIFF_PSSH {
                        movie.pssh.push(type_offset);
                    }

                    Ok(())
                }
            })
            .full_box(
                "stsz",
                on_track(&movie, |track, box_| {
                    track.stsz = Some(StszBox::new(box_)?);
                    Ok(())
                }),
            )
            .full_box(
                "stsc",
                on_track(&movie, |track, box_| {
                    track.stsc = Some(StscBox::new(box_)?);
                    Ok(())
                }),
            )
            .full_box(
                "stco",
                on_track(&movie, |track, box_| {
                    track.chunk_offsets = Some(ChunkOffsetBox::new(box_)?);
                    Ok(())
                }),
            )
            .full_box(
                "co64",
                on_track(&movie, |track, box_| {
                    track.chunk_offsets = Some(ChunkOffsetBox::new(box_)?);
                    Ok(())
                }),
            )
            .full_box(
                "senc",
                on_track(&movie, |track, box_| {
                    track.senc = Some(SencBox::new(box_)?);
                    track.aux_info.push(box_.type_offset());
                    Ok(())
                }),
            )
            .full_box(
                "saiz",
                on_track(&movie, |track, box_| {
                    track.saiz = Some(SaizBox::new(box_)?);
                    track.aux_info.push(box_.type_offset());
                    Ok(())
                }),
            )
            .full_box(
                "saio",
                on_track(&movie, |track, box_| {
                    track.saio = Some(SaioBox::new(box_)?);
                    track.aux_info.push(box_.type_offset());
                    Ok(())
                }),
            )
            .base_box("mvex", parser::children)
            .full_box("trex", {
                let movie = movie.clone();
                move |mut box_| {
                    let trex = TrexBox::new(&mut box_)?;
                    movie.borrow_mut().trex.insert(trex.track_id, trex);
                    Ok(())
                }
            })
            .full_box("pssh", {
                let movie = movie.clone();
                move |box_| {
                    movie.borrow_mut().pssh.push(box_.type_offset());
                    Ok(())
                }
            })
            .parse_at(data, offset, false, false)?;

        Ok(movie.take())
    }

    /// Protection of the sample entry being parsed.
    fn protection(&mut self) -> Option<&mut Protection> {
        let entry = self.tracks.last_mut()?.entries.last_mut()?;
        Some(entry.protection.get_or_insert_with(Protection::default))
    }

    pub(crate) fn track(&self, track_id: u32) -> Option<&Track> {
        self.tracks.iter().find(|x| x.id == track_id)
    }
}

fn on_track<F>(movie: &Shared, f: F) -> impl Fn(ParsedBox) -> HandlerResult + 'static
where
    F: Fn(&mut Track, &mut ParsedBox) -> HandlerResult + 'static,
{
    let movie = movie.clone();
    move |mut box_| match movie.borrow_mut().tracks.last_mut() {
        Some(track) => f(track, &mut box_),
        None => Ok(()),
    }
}

fn on_protection<F>(movie: &Shared, f: F) -> impl Fn(ParsedBox) -> HandlerResult + 'static
where
    F: Fn(&mut Protection, &mut ParsedBox) -> HandlerResult + 'static,
{
    let movie = movie.clone();
    move |mut box_| match movie.borrow_mut().protection() {
        Some(protection) => f(protection, &mut box_),
        None => Ok(()),
    }
}

impl Track {
    /// Entry for a 1-based sample description index.
    pub(crate) fn entry(&self, description_index: u32) -> Option<&SampleEntry> {
        self.entries
            .get((description_index as usize).checked_sub(1)?)
    }

    /// Every chunk of the track, in table order.
    pub(crate) fn chunks(&self, track: usize) -> Result<Vec<Chunk>, DecryptError> {
        let (Some(stsz), Some(stsc), Some(chunk_offsets)) =
            (&self.stsz, &self.stsc, &self.chunk_offsets)
        else {
            return Ok(Vec::new());
        };

        let mut chunks = Vec::with_capacity(chunk_offsets.offsets.len());
        let mut sample = 0;

        for entry in stsc.chunks(chunk_offsets.offsets.len())? {
            let index = entry.first_chunk as usize - 1;
            let first_sample = sample;
            let mut sample_sizes = Vec::with_capacity(entry.samples_per_chunk as usize);

            for _ in 0..entry.samples_per_chunk {
                let size = stsz.size_of(sample).ok_or_else(|| {
                    DecryptError::InvalidFormat(format!(
                        "track {} has fewer sample sizes than its chunks describe",
                        self.id
                    ))
                })?;
                sample_sizes.push(size);
                sample += 1;
            }

            chunks.push(Chunk {
                track,
                index,
                offset: chunk_offsets.offsets[index],
                description_index: entry.sample_description_index,
                first_sample,
                sample_sizes,
            });
        }

        Ok(chunks)
    }
}

impl SampleEntry {
    pub(crate) fn is_protected(&self) -> bool {
        PROTECTED_FORMATS.contains(&self.format)
    }

    pub(crate) fn scheme_type(&self) -> Option<u32> {
        Some(self.protection.as_ref()?.schm.as_ref()?.scheme_type)
    }
}
