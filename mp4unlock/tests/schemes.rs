mod common;

use common::*;
use mp4unlock::{CencScheme, DecryptError, Error, ProtectionScheme, detect};
use mp4unlock_boxes::BoxHeader;
use std::io::Cursor;

fn mdat_payload(output: &[u8]) -> Vec<u8> {
    let headers = BoxHeader::read_all(&mut Cursor::new(output)).unwrap();
    let mdat = headers.iter().find(|x| x.name() == "mdat").unwrap();
    output[mdat.payload_offset() as usize..mdat.end() as usize].to_vec()
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap())
}

#[test]
fn marlin_tracks() -> TestResult {
    let key = hex16(VIDEO_KEY);
    let samples = vec![plaintext(70, 1), plaintext(16, 2), plaintext(3, 3)];

    let encrypted = samples
        .iter()
        .enumerate()
        .map(|(i, sample)| {
            let iv = [i as u8 + 1; 16];
            [iv.to_vec(), cbc_padded(&key, &iv, sample)].concat()
        })
        .collect::<Vec<_>>();

    let sizes = encrypted.iter().map(|x| x.len() as u32).collect();
    let track = TrackFixture::video(1, Protection::Clear, sizes);
    let file = movie_file(ftyp(b"mp42", &[b"MGSV"]), &[track], &[encrypted]);

    let dir = tempfile::tempdir()?;
    let (output, ticks) = decrypt(dir.path(), &file, &[("1", VIDEO_KEY)])?;

    assert_eq!(mdat_payload(&output), samples.concat());

    // The only chunk starts right after the 16 byte mdat header.
    let stco = find(&output, b"stco").unwrap();
    let mdat = find(&output, b"mdat").unwrap();
    assert_eq!(read_u32(&output, stco + 12) as usize, mdat + 12);

    let stsz = find(&output, b"stsz").unwrap();
    assert_eq!(read_u32(&output, stsz + 16), 70);
    assert_eq!(read_u32(&output, stsz + 20), 16);
    assert_eq!(read_u32(&output, stsz + 24), 3);

    assert_eq!(ticks, vec![(1, 1)]);
    Ok(())
}

#[test]
fn marlin_without_track_key_copies_samples() -> TestResult {
    let samples = vec![plaintext(40, 9)];
    let track = TrackFixture::video(1, Protection::Clear, vec![40]);
    let file = movie_file(ftyp(b"mp42", &[b"MGSV"]), &[track], &[samples.clone()]);

    let dir = tempfile::tempdir()?;
    let (output, _) = decrypt(dir.path(), &file, &[])?;

    assert_eq!(mdat_payload(&output), samples.concat());
    Ok(())
}

fn odrm(key: &[u8; 16], content: &[u8]) -> Vec<u8> {
    let iv = [6; 16];
    let odda_data = [iv.to_vec(), cbc_padded(key, &iv, content)].concat();

    let ohdr = full_box(
        b"ohdr",
        0,
        0,
        &[
            vec![1, 1],
            (content.len() as u64).to_be_bytes().to_vec(),
            vec![0; 6],
        ]
        .concat(),
    );
    let odhe = full_box(b"odhe", 0, 0, &[vec![9], b"video/mp4".to_vec(), ohdr].concat());
    let odda = full_box(
        b"odda",
        0,
        0,
        &[(odda_data.len() as u64).to_be_bytes().to_vec(), odda_data].concat(),
    );

    full_box(b"odrm", 0, 0, &[odhe, odda].concat())
}

#[test]
fn oma_atomic_dcf() -> TestResult {
    let key = hex16(VIDEO_KEY);
    let content = plaintext(50, 4);
    let file = [ftyp(b"odcf", &[b"odcf"]), odrm(&key, &content)].concat();

    let dir = tempfile::tempdir()?;
    let (output, ticks) = decrypt(dir.path(), &file, &[("1", VIDEO_KEY)])?;

    let odda = find(&output, b"odda").unwrap();
    let length = u64::from_be_bytes(output[odda + 8..odda + 16].try_into()?);
    assert_eq!(length, 50);
    assert_eq!(&output[odda + 16..], content.as_slice());

    let ohdr = find(&output, b"ohdr").unwrap();
    assert_eq!(&output[ohdr + 8..ohdr + 10], &[0, 0]);

    let headers = BoxHeader::read_all(&mut Cursor::new(&output))?;
    assert_eq!(headers.last().map(|x| x.end()), Some(output.len() as u64));

    assert_eq!(ticks, vec![(1, 2), (2, 2)]);
    Ok(())
}

#[test]
fn oma_atomic_dcf_needs_track_key() -> TestResult {
    let file = [ftyp(b"odcf", &[]), odrm(&[0; 16], b"content")].concat();
    let dir = tempfile::tempdir()?;
    let error = decrypt(dir.path(), &file, &[(VIDEO_KID, VIDEO_KEY)]).unwrap_err();

    assert!(matches!(
        error,
        Error::Transform(DecryptError::TrackKeyNotFound(1))
    ));
    Ok(())
}

#[test]
fn oma_pdcf_selective_encryption() -> TestResult {
    let key = hex16(VIDEO_KEY);
    let samples = vec![plaintext(33, 1), plaintext(12, 2)];

    let iv = [2; 16];
    let mut first = samples[0].clone();
    ctr(&key, &iv, &mut first);

    let encrypted = vec![
        [vec![0x80], iv.to_vec(), first].concat(),
        [vec![0x00], samples[1].clone()].concat(),
    ];

    let sizes = encrypted.iter().map(|x| x.len() as u32).collect();
    let track = TrackFixture::video(
        1,
        Protection::Odkm {
            method: 2,
            selective: true,
        },
        sizes,
    );
    let file = movie_file(ftyp(b"odcf", &[]), &[track], &[encrypted]);

    let dir = tempfile::tempdir()?;
    let (output, _) = decrypt(dir.path(), &file, &[("1", VIDEO_KEY)])?;

    assert_eq!(mdat_payload(&output), samples.concat());
    assert!(find(&output, b"encv").is_none());
    Ok(())
}

#[test]
fn odkm_tracks_without_brand() -> TestResult {
    let key = hex16(VIDEO_KEY);
    let sample = plaintext(45, 8);
    let iv = [5; 16];
    let encrypted = [iv.to_vec(), cbc_padded(&key, &iv, &sample)].concat();

    let track = TrackFixture::video(
        1,
        Protection::Odkm {
            method: 1,
            selective: false,
        },
        vec![encrypted.len() as u32],
    );
    let file = movie_file(ftyp(b"isom", &[]), &[track], &[vec![encrypted]]);

    let dir = tempfile::tempdir()?;
    let (output, _) = decrypt(dir.path(), &file, &[("1", VIDEO_KEY)])?;

    assert_eq!(mdat_payload(&output), sample);
    Ok(())
}

#[test]
fn plain_files_are_copied() -> TestResult {
    let samples = vec![plaintext(25, 1), plaintext(31, 2)];
    let track = TrackFixture::video(1, Protection::Clear, vec![25, 31]);
    let file = movie_file(ftyp(b"isom", &[b"mp41"]), &[track], &[samples]);

    let dir = tempfile::tempdir()?;
    let (output, ticks) = decrypt(dir.path(), &file, &[(VIDEO_KID, VIDEO_KEY)])?;

    assert_eq!(output, file);
    assert_eq!(ticks, vec![(1, 1)]);
    Ok(())
}

fn cenc_track(scheme: &[u8; 4]) -> TrackFixture {
    TrackFixture::video(1, Protection::Cenc(Tenc::new(scheme, VIDEO_KID)), vec![16])
}

#[test]
fn brands_take_priority_over_tracks() {
    let file = movie_file(ftyp(b"isom", &[b"odcf"]), &[cenc_track(b"cenc")], &[vec![vec![0; 16]]]);
    assert_eq!(detect(&mut Cursor::new(&file)), ProtectionScheme::OmaDcf);

    let file = movie_file(ftyp(b"MGSV", &[]), &[cenc_track(b"cenc")], &[vec![vec![0; 16]]]);
    assert_eq!(detect(&mut Cursor::new(&file)), ProtectionScheme::MarlinIpmp);

    let file = movie_file(ftyp(b"piff", &[]), &[], &[]);
    assert_eq!(
        detect(&mut Cursor::new(&file)),
        ProtectionScheme::Cenc(CencScheme::Cenc)
    );
}

#[test]
fn first_protected_track_decides() {
    let tracks = [
        TrackFixture::video(1, Protection::Clear, vec![16]),
        TrackFixture::video(2, Protection::Cenc(Tenc::new(b"cbcs", VIDEO_KID)), vec![16]),
        TrackFixture::video(3, Protection::Cenc(Tenc::new(b"cens", AUDIO_KID)), vec![16]),
    ];
    let samples = vec![vec![vec![0; 16]]; 3];
    let file = movie_file(ftyp(b"isom", &[]), &tracks, &samples);

    let first = detect(&mut Cursor::new(&file));
    assert_eq!(first, ProtectionScheme::Cenc(CencScheme::Cbcs));
    assert_eq!(detect(&mut Cursor::new(&file)), first);
}

#[test]
fn unknown_files_are_standard() {
    let clear = TrackFixture::video(1, Protection::Clear, vec![16]);
    let file = movie_file(Vec::new(), &[clear], &[vec![vec![0; 16]]]);
    assert_eq!(detect(&mut Cursor::new(&file)), ProtectionScheme::Standard);

    let garbage = plaintext(37, 0);
    assert_eq!(detect(&mut Cursor::new(&garbage)), ProtectionScheme::Standard);
    assert_eq!(detect(&mut Cursor::new(Vec::new())), ProtectionScheme::Standard);
}
