mod common;

use common::*;
use mp4unlock::{DecryptError, Error, JobState};

fn senc_entry(iv: &[u8], subsamples: &[(u16, u32)]) -> Vec<u8> {
    let mut data = iv.to_vec();

    if !subsamples.is_empty() {
        data.extend_from_slice(&(subsamples.len() as u16).to_be_bytes());

        for (clear, encrypted) in subsamples {
            data.extend_from_slice(&clear.to_be_bytes());
            data.extend_from_slice(&encrypted.to_be_bytes());
        }
    }

    data
}

fn sizes(samples: &[Vec<u8>]) -> Vec<u32> {
    samples.iter().map(|x| x.len() as u32).collect()
}

/// Samples of a single track file, they always sit at the end of the `mdat`.
fn tail(output: &[u8], samples: &[Vec<u8>]) -> Vec<u8> {
    let length = samples.iter().map(|x| x.len()).sum::<usize>();
    output[output.len() - length..].to_vec()
}

#[test]
fn cenc_full_samples() -> TestResult {
    let key = hex16(VIDEO_KEY);
    let samples = vec![plaintext(100, 1), plaintext(37, 2)];
    let ivs = [[1; 8], [2; 8]];

    let encrypted = samples
        .iter()
        .zip(ivs)
        .map(|(sample, iv)| {
            let mut sample = sample.clone();
            ctr(&key, &iv8(iv), &mut sample);
            sample
        })
        .collect::<Vec<_>>();

    let mut track = TrackFixture::video(
        1,
        Protection::Cenc(Tenc::new(b"cenc", VIDEO_KID)),
        sizes(&samples),
    );
    track.senc = Some((0, ivs.concat()));

    let file = movie_file(ftyp(b"isom", &[b"iso6"]), &[track], &[encrypted]);
    let dir = tempfile::tempdir()?;
    let (output, ticks) = decrypt(dir.path(), &file, &[(VIDEO_KID, VIDEO_KEY)])?;

    assert_eq!(output.len(), file.len());
    assert_eq!(tail(&output, &samples), samples.concat());
    assert!(find(&output, b"encv").is_none());
    assert!(find(&output, b"sinf").is_none());
    assert!(find(&output, b"senc").is_none());
    assert_eq!(ticks, vec![(1, 3), (2, 3), (3, 3)]);
    Ok(())
}

#[test]
fn cenc_subsamples() -> TestResult {
    let key = hex16(VIDEO_KEY);
    let sample = plaintext(64, 3);
    let iv = [7; 8];

    let mut protected = [&sample[5..25], &sample[32..64]].concat();
    ctr(&key, &iv8(iv), &mut protected);

    let mut encrypted = sample.clone();
    encrypted[5..25].copy_from_slice(&protected[..20]);
    encrypted[32..64].copy_from_slice(&protected[20..]);

    let mut track = TrackFixture::video(
        1,
        Protection::Cenc(Tenc::new(b"cenc", VIDEO_KID)),
        vec![64],
    );
    track.senc = Some((2, senc_entry(&iv, &[(5, 20), (7, 32)])));

    let file = movie_file(ftyp(b"isom", &[]), &[track], &[vec![encrypted]]);
    let dir = tempfile::tempdir()?;
    let (output, _) = decrypt(dir.path(), &file, &[(VIDEO_KID, VIDEO_KEY)])?;

    assert_eq!(tail(&output, &[sample.clone()]), sample);
    Ok(())
}

#[test]
fn cbc1_keeps_trailing_partial_block() -> TestResult {
    let key = hex16(VIDEO_KEY);
    let sample = plaintext(40, 4);
    let iv = [8; 16];

    let mut encrypted = sample.clone();
    cbc_blocks(&key, &iv, &mut encrypted[..32]);

    let mut tenc = Tenc::new(b"cbc1", VIDEO_KID);
    tenc.iv_size = 16;

    let mut track = TrackFixture::video(1, Protection::Cenc(tenc), vec![40]);
    track.senc = Some((0, iv.to_vec()));

    let file = movie_file(ftyp(b"isom", &[]), &[track], &[vec![encrypted]]);
    let dir = tempfile::tempdir()?;
    let (output, _) = decrypt(dir.path(), &file, &[(VIDEO_KID, VIDEO_KEY)])?;

    assert_eq!(tail(&output, &[sample.clone()]), sample);
    Ok(())
}

#[test]
fn cbcs_pattern_with_constant_iv() -> TestResult {
    let key = hex16(VIDEO_KEY);
    let iv = [4; 16];
    let samples = vec![plaintext(200, 5), plaintext(90, 6)];

    let encrypted = samples
        .iter()
        .map(|sample| {
            let mut sample = sample.clone();
            cbcs(&key, &iv, &mut sample, 1, 9);
            sample
        })
        .collect::<Vec<_>>();

    let mut tenc = Tenc::new(b"cbcs", VIDEO_KID);
    tenc.iv_size = 0;
    tenc.crypt_byte_block = 1;
    tenc.skip_byte_block = 9;
    tenc.constant_iv = Some(iv);

    let track = TrackFixture::video(1, Protection::Cenc(tenc), sizes(&samples));
    let file = movie_file(ftyp(b"isom", &[]), &[track], &[encrypted]);
    let dir = tempfile::tempdir()?;
    let (output, _) = decrypt(dir.path(), &file, &[(VIDEO_KID, VIDEO_KEY)])?;

    assert_eq!(tail(&output, &samples), samples.concat());
    Ok(())
}

#[test]
fn fragmented_cenc() -> TestResult {
    let key = hex16(VIDEO_KEY);
    let fragments = (0..2_u8)
        .map(|i| {
            let ivs = vec![[i * 2 + 1; 8], [i * 2 + 2; 8]];
            let samples = vec![plaintext(48, i), plaintext(21, i + 10)];
            (ivs, samples)
        })
        .collect::<Vec<_>>();

    let encrypted = fragments
        .iter()
        .map(|(ivs, samples)| {
            let samples = samples
                .iter()
                .zip(ivs)
                .map(|(sample, iv)| {
                    let mut sample = sample.clone();
                    ctr(&key, &iv8(*iv), &mut sample);
                    sample
                })
                .collect();
            (ivs.clone(), samples)
        })
        .collect::<Vec<_>>();

    let file = fragmented_file(Tenc::new(b"cenc", VIDEO_KID), &encrypted);
    let dir = tempfile::tempdir()?;
    let (output, ticks) = decrypt(dir.path(), &file, &[(VIDEO_KID, VIDEO_KEY)])?;

    assert_eq!(output.len(), file.len());
    assert!(find(&output, b"senc").is_none());

    for (_, samples) in &fragments {
        assert!(find(&output, &samples.concat()).is_some());
    }

    assert_eq!(ticks.len(), 6);
    assert!(ticks.windows(2).all(|x| x[0].0 <= x[1].0));
    assert_eq!(ticks.last(), Some(&(6, 6)));
    Ok(())
}

#[test]
fn fragmented_cens_pattern() -> TestResult {
    let key = hex16(VIDEO_KEY);
    let ivs = vec![[5; 8], [6; 8]];
    let samples = vec![plaintext(160, 8), plaintext(48, 9)];

    let encrypted = samples
        .iter()
        .zip(&ivs)
        .map(|(sample, iv)| {
            let mut sample = sample.clone();
            cens(&key, &iv8(*iv), &mut sample, 1, 2);
            sample
        })
        .collect::<Vec<_>>();

    let mut tenc = Tenc::new(b"cens", VIDEO_KID);
    tenc.crypt_byte_block = 1;
    tenc.skip_byte_block = 2;

    let file = fragmented_file(tenc, &[(ivs, encrypted.clone())]);
    let dir = tempfile::tempdir()?;
    let (output, _) = decrypt(dir.path(), &file, &[(VIDEO_KID, VIDEO_KEY)])?;

    assert_eq!(output.len(), file.len());
    assert!(find(&output, &encrypted.concat()).is_none());
    assert!(find(&output, &samples.concat()).is_some());
    Ok(())
}

#[test]
fn wrong_key_changes_samples() -> TestResult {
    let key = hex16(VIDEO_KEY);
    let sample = plaintext(80, 7);
    let iv = [3; 8];

    let mut encrypted = sample.clone();
    ctr(&key, &iv8(iv), &mut encrypted);

    let mut track = TrackFixture::video(
        1,
        Protection::Cenc(Tenc::new(b"cenc", VIDEO_KID)),
        vec![80],
    );
    track.senc = Some((0, iv.to_vec()));

    let file = movie_file(ftyp(b"isom", &[]), &[track], &[vec![encrypted]]);
    let dir = tempfile::tempdir()?;
    let (output, _) = decrypt(dir.path(), &file, &[(VIDEO_KID, AUDIO_KEY)])?;

    assert_ne!(tail(&output, &[sample.clone()]), sample);
    Ok(())
}

#[test]
fn missing_kid_fails() -> TestResult {
    let mut track = TrackFixture::video(
        1,
        Protection::Cenc(Tenc::new(b"cenc", VIDEO_KID)),
        vec![16],
    );
    track.senc = Some((0, vec![0; 8]));

    let file = movie_file(ftyp(b"isom", &[]), &[track], &[vec![vec![0; 16]]]);
    let dir = tempfile::tempdir()?;
    let error = decrypt(dir.path(), &file, &[(AUDIO_KID, AUDIO_KEY)]).unwrap_err();

    assert!(matches!(
        &error,
        Error::Transform(DecryptError::KeyNotFound(kid)) if kid.to_string() == VIDEO_KID
    ));
    assert_eq!(error.stage(), JobState::Transforming);
    assert_eq!(error.code(), Some(-11));
    Ok(())
}
