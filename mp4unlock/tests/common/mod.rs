#![allow(dead_code)]

//! In memory mp4 fixtures, encrypted with the same primitives the decrypter
//! uses.

use aes::{
    Aes128,
    cipher::{
        BlockEncryptMut, KeyIvInit, StreamCipher, block_padding::Pkcs7,
        generic_array::GenericArray,
    },
};
use mp4unlock::{DecryptJob, ProgressBridge, progress};
use std::{error::Error, fs, path::Path};

pub const VIDEO_KID: &str = "eb676abbcb345e96bbcf616630f1a3da";
pub const VIDEO_KEY: &str = "100b6c20940f779a4589152b57d2dacb";
pub const AUDIO_KID: &str = "63cb5f7184dd4b689a5c5ff11ee6a328";
pub const AUDIO_KEY: &str = "3bda3329158a4789880816a70e7e436d";

pub type TestResult<T = ()> = Result<T, Box<dyn Error>>;

pub fn hex16(input: &str) -> [u8; 16] {
    hex::decode(input).unwrap().try_into().unwrap()
}

// BOXES

pub fn mp4_box(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut data = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    data.extend_from_slice(name);
    data.extend_from_slice(payload);
    data
}

pub fn full_box(name: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut data = flags.to_be_bytes().to_vec();
    data[0] = version;
    data.extend_from_slice(payload);
    mp4_box(name, &data)
}

pub fn ftyp(major_brand: &[u8; 4], compatible_brands: &[&[u8; 4]]) -> Vec<u8> {
    let mut payload = major_brand.to_vec();
    payload.extend_from_slice(&[0; 4]);

    for brand in compatible_brands {
        payload.extend_from_slice(*brand);
    }

    mp4_box(b"ftyp", &payload)
}

fn u32s(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|x| x.to_be_bytes()).collect()
}

/// Common encryption parameters of a track.
#[derive(Clone)]
pub struct Tenc {
    pub scheme: [u8; 4],
    pub kid: [u8; 16],
    pub iv_size: u8,
    pub crypt_byte_block: u8,
    pub skip_byte_block: u8,
    pub constant_iv: Option<[u8; 16]>,
}

impl Tenc {
    pub fn new(scheme: &[u8; 4], kid: &str) -> Self {
        Self {
            scheme: *scheme,
            kid: hex16(kid),
            iv_size: 8,
            crypt_byte_block: 0,
            skip_byte_block: 0,
            constant_iv: None,
        }
    }

    fn to_box(&self) -> Vec<u8> {
        let version = u8::from(self.crypt_byte_block != 0 || self.skip_byte_block != 0);
        let mut payload = vec![
            0,
            (self.crypt_byte_block << 4) | self.skip_byte_block,
            1,
            self.iv_size,
        ];
        payload.extend_from_slice(&self.kid);

        if let Some(iv) = self.constant_iv {
            payload.push(16);
            payload.extend_from_slice(&iv);
        }

        full_box(b"tenc", version, 0, &payload)
    }
}

/// Sample entry protection.
#[derive(Clone)]
pub enum Protection {
    Clear,
    Cenc(Tenc),
    /// OMA `odkm` with the encryption method and the odaf flags.
    Odkm { method: u8, selective: bool },
}

/// A track that is not fragmented, with every sample in one chunk.
pub struct TrackFixture {
    pub id: u32,
    pub handler: [u8; 4],
    pub protection: Protection,
    pub sample_sizes: Vec<u32>,
    /// `senc` payload stored in `stbl`, flags and sample entries.
    pub senc: Option<(u32, Vec<u8>)>,
}

impl TrackFixture {
    pub fn video(id: u32, protection: Protection, sample_sizes: Vec<u32>) -> Self {
        Self {
            id,
            handler: *b"vide",
            protection,
            sample_sizes,
            senc: None,
        }
    }

    fn to_box(&self, chunk_offset: u32) -> Vec<u8> {
        let tkhd = full_box(b"tkhd", 0, 7, &[u32s(&[0, 0, self.id]), vec![0; 72]].concat());
        let hdlr = full_box(b"hdlr", 0, 0, &[&[0; 4][..], &self.handler, &[0; 13]].concat());

        let entry = match &self.protection {
            Protection::Clear => mp4_box(b"avc1", &[0; 78]),
            Protection::Cenc(tenc) => {
                let sinf = mp4_box(
                    b"sinf",
                    &[
                        mp4_box(b"frma", b"avc1"),
                        full_box(b"schm", 0, 0, &[&tenc.scheme[..], &[0, 1, 0, 0]].concat()),
                        mp4_box(b"schi", &tenc.to_box()),
                    ]
                    .concat(),
                );
                mp4_box(b"encv", &[vec![0; 78], sinf].concat())
            }
            Protection::Odkm { method, selective } => {
                let ohdr = full_box(
                    b"ohdr",
                    0,
                    0,
                    &[vec![*method, 1], vec![0; 8], vec![0; 6]].concat(),
                );
                let odaf = full_box(
                    b"odaf",
                    0,
                    0,
                    &[if *selective { 0x80 } else { 0 }, 0, 16],
                );
                let sinf = mp4_box(
                    b"sinf",
                    &[
                        mp4_box(b"frma", b"avc1"),
                        full_box(b"schm", 0, 0, b"odkm\x00\x00\x02\x00"),
                        mp4_box(b"schi", &full_box(b"odkm", 0, 0, &[odaf, ohdr].concat())),
                    ]
                    .concat(),
                );
                mp4_box(b"encv", &[vec![0; 78], sinf].concat())
            }
        };

        let count = self.sample_sizes.len() as u32;
        let mut stbl = [
            full_box(b"stsd", 0, 0, &[u32s(&[1]), entry].concat()),
            full_box(b"stsz", 0, 0, &u32s(&[&[0, count][..], &self.sample_sizes].concat())),
            full_box(b"stsc", 0, 0, &u32s(&[1, 1, count, 1])),
            full_box(b"stco", 0, 0, &u32s(&[1, chunk_offset])),
        ]
        .concat();

        if let Some((flags, entries)) = &self.senc {
            stbl.extend(full_box(
                b"senc",
                0,
                *flags,
                &[&count.to_be_bytes()[..], entries].concat(),
            ));
        }

        let minf = mp4_box(b"minf", &mp4_box(b"stbl", &stbl));
        let mdia = mp4_box(b"mdia", &[hdlr, minf].concat());
        mp4_box(b"trak", &[tkhd, mdia].concat())
    }
}

/// `ftyp`, `moov` and one `mdat` holding the samples of every track, track
/// after track.
pub fn movie_file(ftyp: Vec<u8>, tracks: &[TrackFixture], samples: &[Vec<Vec<u8>>]) -> Vec<u8> {
    let build = |offsets: &[u32]| {
        let traks = tracks
            .iter()
            .zip(offsets)
            .flat_map(|(track, offset)| track.to_box(*offset))
            .collect::<Vec<_>>();
        mp4_box(b"moov", &traks)
    };

    let moov_size = build(&vec![0; tracks.len()]).len();
    let mut offset = (ftyp.len() + moov_size + 8) as u32;
    let mut offsets = Vec::new();

    for track in samples {
        offsets.push(offset);
        offset += track.iter().map(|x| x.len() as u32).sum::<u32>();
    }

    let mdat = mp4_box(b"mdat", &samples.concat().concat());
    [ftyp, build(&offsets), mdat].concat()
}

/// `ftyp`, `moov` with empty sample tables and one `moof`/`mdat` pair per
/// fragment. Every fragment carries a `senc` with 8 byte IVs.
pub fn fragmented_file(tenc: Tenc, fragments: &[(Vec<[u8; 8]>, Vec<Vec<u8>>)]) -> Vec<u8> {
    let track = TrackFixture::video(1, Protection::Cenc(tenc), Vec::new());
    let trex = full_box(b"trex", 0, 0, &u32s(&[1, 1, 0, 0, 0]));
    let moov = mp4_box(
        b"moov",
        &[track.to_box(0), mp4_box(b"mvex", &trex)].concat(),
    );

    let mut data = [ftyp(b"iso6", &[b"dash"]), moov].concat();

    for (sequence, (ivs, samples)) in fragments.iter().enumerate() {
        let count = samples.len() as u32;
        let senc_entries = ivs.concat();
        let build = |data_offset: u32| {
            let tfhd = full_box(b"tfhd", 0, 0x020000, &u32s(&[1]));
            let sizes = samples.iter().map(|x| x.len() as u32).collect::<Vec<_>>();
            let trun = full_box(
                b"trun",
                0,
                0x000201,
                &u32s(&[&[count, data_offset][..], &sizes].concat()),
            );
            let senc = full_box(
                b"senc",
                0,
                0,
                &[&count.to_be_bytes()[..], &senc_entries].concat(),
            );
            let mfhd = full_box(b"mfhd", 0, 0, &u32s(&[sequence as u32 + 1]));
            mp4_box(b"moof", &[mfhd, mp4_box(b"traf", &[tfhd, trun, senc].concat())].concat())
        };

        let moof_size = build(0).len() as u32;
        data.extend(build(moof_size + 8));
        data.extend(mp4_box(b"mdat", &samples.concat()));
    }

    data
}

// ENCRYPTION

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;

pub fn iv8(iv: [u8; 8]) -> [u8; 16] {
    let mut block = [0; 16];
    block[..8].copy_from_slice(&iv);
    block
}

pub fn ctr(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    Aes128Ctr::new(key.into(), iv.into()).apply_keystream(data);
}

/// AES-128-CBC over the whole blocks of `data`.
pub fn cbc_blocks(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    let mut encryptor = Aes128CbcEnc::new(key.into(), iv.into());

    for block in data.chunks_exact_mut(16) {
        encryptor.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

pub fn cbc_padded(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut buffer = data.to_vec();
    buffer.resize(data.len() + 16 - data.len() % 16, 0);

    Aes128CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_mut::<Pkcs7>(&mut buffer, data.len())
        .unwrap()
        .to_vec()
}

/// `cbcs` over one range: the pattern starts with `crypt` encrypted blocks and
/// the CBC chain runs across the skipped blocks.
pub fn cbcs(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8], crypt: usize, skip: usize) {
    let mut encryptor = Aes128CbcEnc::new(key.into(), iv.into());
    let mut offset = 0;

    while offset < data.len() {
        let end = data.len().min(offset + crypt * 16);

        for block in data[offset..end].chunks_exact_mut(16) {
            encryptor.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }

        offset = end + skip * 16;
    }
}

/// `cens` over one range: only the `crypt` blocks of every pattern take
/// keystream.
pub fn cens(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8], crypt: usize, skip: usize) {
    let mut cipher = Aes128Ctr::new(key.into(), iv.into());
    let mut offset = 0;

    while offset < data.len() {
        let end = data.len().min(offset + crypt * 16);
        cipher.apply_keystream(&mut data[offset..end]);
        offset = end + skip * 16;
    }
}

pub fn plaintext(length: usize, seed: u8) -> Vec<u8> {
    (0..length)
        .map(|x| (x as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

// JOBS

/// Decrypt `data` through a job and return the output with every tick.
pub fn decrypt(
    dir: &Path,
    data: &[u8],
    keys: &[(&str, &str)],
) -> Result<(Vec<u8>, Vec<(u32, u32)>), mp4unlock::Error> {
    let input = dir.join("input.mp4");
    let output = dir.join("output.mp4");
    fs::write(&input, data).unwrap();

    let (sender, events) = progress::channel();
    let mut builder = DecryptJob::builder()
        .input(&input)
        .output(&output)
        .progress(ProgressBridge::Channel(sender));

    for (id, key) in keys {
        builder = builder.key_for(id, key)?;
    }

    builder.build().run()?;

    let ticks = events.iter().map(|x| (x.step, x.total)).collect();
    Ok((fs::read(&output).unwrap(), ticks))
}

/// Offset of the first occurrence of `needle`.
pub fn find(data: &[u8], needle: &[u8]) -> Option<usize> {
    data.windows(needle.len()).position(|x| x == needle)
}
