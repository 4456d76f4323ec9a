//! Files without a recognized brand or common encryption.

use super::{Result, StepTicker, copy_range, oma, rewrite};
use crate::{KeyMap, movie::Movie, progress::ProgressListener};
use log::{debug, warn};
use mp4unlock_boxes::{BoxHeader, boxes::SchmBox, fourcc};
use std::io::{Read, Seek, SeekFrom, Write};

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
    let movie = match headers.iter().find(|x| x.box_type == fourcc(b"moov")) {
        Some(moov) => Some(Movie::parse(&moov.read_box(input)?, moov.offset)?),
        None => None,
    };

    let mut has_odkm = false;

    for track in movie.iter().flat_map(|x| &x.tracks) {
        for entry in track.entries.iter().filter(|x| x.is_protected()) {
            match entry.scheme_type() {
                Some(SchmBox::ODKM) => has_odkm = true,
                scheme_type => warn!(
                    "track {} uses unsupported protection {}, copying it as is",
                    track.id,
                    scheme_type.map_or("(none)".to_owned(), mp4unlock_boxes::type_to_string)
                ),
            }
        }
    }

    if has_odkm {
        if headers.iter().all(|x| x.box_type != fourcc(b"moof")) {
            return rewrite::rewrite(input, output, listener, |movie| {
                oma::odkm_decrypters(keys, movie)
            });
        }

        warn!("odkm tracks of fragmented files are not decrypted");
    }

    debug!("nothing to decrypt, copying the file");

    let length = input.seek(SeekFrom::End(0))?;
    copy_range(input, output, 0, length)?;
    StepTicker::new(listener, 1).finish();
    Ok(())
}
