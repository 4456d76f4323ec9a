use crate::{Error, Result};
use std::{collections::HashMap, fmt, str::FromStr};

/// 128-bit key identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Kid(pub [u8; 16]);

impl fmt::Display for Kid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Kid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kid({})", self)
    }
}

impl FromStr for Kid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_hex_16(s).map(Self)
    }
}

impl From<[u8; 16]> for Kid {
    fn from(value: [u8; 16]) -> Self {
        Self(value)
    }
}

/// Builder for creating [`KeyMap`] instances.
///
/// # Example
///
/// ```
/// use mp4unlock::KeyMap;
///
/// let keys = KeyMap::builder()
///     .key("eb676abbcb345e96bbcf616630f1a3da", "100b6c20940f779a4589152b57d2dacb")?
///     .track_key(1, "3bda3329158a4789880816a70e7e436d")?
///     .build();
///
/// assert_eq!(keys.len(), 2);
/// # Ok::<(), mp4unlock::Error>(())
/// ```
#[derive(Default)]
pub struct KeyMapBuilder {
    keys: HashMap<Kid, [u8; 16]>,
    track_keys: HashMap<u32, [u8; 16]>,
}

impl KeyMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a KID/key pair.
    ///
    /// # Arguments
    ///
    /// * `kid` - The Key ID as a 32-character hexadecimal string (16 bytes)
    /// * `key` - The decryption key as a 32-character hexadecimal string (16 bytes)
    pub fn key(mut self, kid: &str, key: &str) -> Result<Self> {
        self.keys.insert(kid.parse()?, parse_hex_16(key)?);
        Ok(self)
    }

    /// Add a KID/key pair from raw bytes.
    pub fn key_bytes(mut self, kid: [u8; 16], key: [u8; 16]) -> Self {
        self.keys.insert(Kid(kid), key);
        self
    }

    /// Add multiple KID/key pairs from a HashMap.
    pub fn keys(mut self, keys: &HashMap<String, String>) -> Result<Self> {
        for (kid, key) in keys {
            self = self.key(kid, key)?;
        }

        Ok(self)
    }

    /// Add a key addressed by track ID, used by schemes without KIDs.
    pub fn track_key(mut self, track_id: u32, key: &str) -> Result<Self> {
        self.track_keys.insert(track_id, parse_hex_16(key)?);
        Ok(self)
    }

    /// Add a key whose `id` is either a 32 character KID or a decimal track ID.
    pub fn key_for(self, id: &str, key: &str) -> Result<Self> {
        if id.len() == 32 {
            self.key(id, key)
        } else {
            let track_id = id
                .parse()
                .map_err(|_| Error::malformed_key(id, "expected a 32 character KID or a track ID"))?;
            self.track_key(track_id, key)
        }
    }

    pub fn build(self) -> KeyMap {
        KeyMap {
            keys: self.keys,
            track_keys: self.track_keys,
        }
    }
}

/// Key identifier to key table of one job.
#[derive(Clone, Default)]
pub struct KeyMap {
    keys: HashMap<Kid, [u8; 16]>,
    track_keys: HashMap<u32, [u8; 16]>,
}

impl KeyMap {
    pub fn builder() -> KeyMapBuilder {
        KeyMapBuilder::new()
    }

    /// Build a map from `(kid_hex, key_hex)` pairs. Later duplicates win.
    pub fn from_hex_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut builder = Self::builder();

        for (kid, key) in pairs {
            builder = builder.key(kid.as_ref(), key.as_ref())?;
        }

        Ok(builder.build())
    }

    pub fn get(&self, kid: &Kid) -> Option<&[u8; 16]> {
        self.keys.get(kid)
    }

    pub fn get_track(&self, track_id: u32) -> Option<&[u8; 16]> {
        self.track_keys.get(&track_id)
    }

    /// Number of KID and track keys.
    pub fn len(&self) -> usize {
        self.keys.len() + self.track_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for KeyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys are secrets, only identifiers are printed.
        f.debug_struct("KeyMap")
            .field("kids", &self.keys.keys().collect::<Vec<_>>())
            .field("tracks", &self.track_keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn parse_hex_16(input: &str) -> Result<[u8; 16]> {
    let bytes = hex::decode(input).map_err(|e| Error::malformed_key(input, e))?;

    bytes.try_into().map_err(|bytes: Vec<u8>| {
        Error::malformed_key(
            input,
            format!("expected 16 bytes (32 hex chars), got {} bytes", bytes.len()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KID: &str = "eb676abbcb345e96bbcf616630f1a3da";
    const KEY: &str = "100b6c20940f779a4589152b57d2dacb";
    const OTHER_KEY: &str = "3bda3329158a4789880816a70e7e436d";

    #[test]
    fn later_duplicates_win() {
        let keys = KeyMap::from_hex_pairs([(KID, KEY), (KID, OTHER_KEY)]).unwrap();
        let kid = KID.parse::<Kid>().unwrap();

        assert_eq!(keys.len(), 1);
        assert_eq!(keys.get(&kid).map(hex::encode).as_deref(), Some(OTHER_KEY));
    }

    #[test]
    fn uppercase_hex_is_accepted() {
        let keys = KeyMap::from_hex_pairs([(KID.to_uppercase(), KEY.to_owned())]).unwrap();
        assert!(keys.get(&KID.parse().unwrap()).is_some());
    }

    #[test]
    fn malformed_pairs_build_nothing() {
        for (kid, key) in [
            (KID, "100b6c20940f779a4589152b57d2dac"),
            (KID, "100b6c20940f779a4589152b57d2dacb00"),
            ("zz676abbcb345e96bbcf616630f1a3da", KEY),
            ("eb676abb-cb34-5e96-bbcf-616630f1a3da", KEY),
            ("", KEY),
        ] {
            let error = KeyMap::from_hex_pairs([(KID, KEY), (kid, key)]).unwrap_err();
            assert!(matches!(error, Error::MalformedKey { .. }), "{kid}:{key}");
        }
    }

    #[test]
    fn ids_select_kid_or_track() {
        let keys = KeyMap::builder()
            .key_for(KID, KEY)
            .unwrap()
            .key_for("2", OTHER_KEY)
            .unwrap()
            .build();

        assert!(keys.get(&KID.parse().unwrap()).is_some());
        assert_eq!(keys.get_track(2).map(hex::encode).as_deref(), Some(OTHER_KEY));
        assert!(KeyMap::builder().key_for("video", KEY).is_err());
    }

    #[test]
    fn kid_prints_as_lowercase_hex() {
        let kid = KID.to_uppercase().parse::<Kid>().unwrap();
        assert_eq!(kid.to_string(), KID);
    }
}
