//! Key candidates, built-in defaults, and dictionary loading

/// A MIFARE Classic sector key.
pub type Key = [u8; 6];

/// Where a candidate key came from. Ordering in a sweep follows this:
/// builtins first, then keys already seen working this session, then the
/// dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyProvenance {
    BuiltinDefault,
    SessionFound,
    Dictionary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCandidate {
    pub key: Key,
    pub provenance: KeyProvenance,
}

/// Transport keys, MAD keys, and the vendor defaults that open a surprising
/// number of deployed cards.
pub fn builtin_defaults() -> Vec<KeyCandidate> {
    const DEFAULTS: [Key; 8] = [
        [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
        [0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5],
        [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5],
        [0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7],
        [0x4D, 0x3A, 0x99, 0xC3, 0x51, 0xDD],
        [0x1A, 0x98, 0x2C, 0x7E, 0x45, 0x9A],
        [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
    ];
    DEFAULTS
        .iter()
        .map(|key| KeyCandidate {
            key: *key,
            provenance: KeyProvenance::BuiltinDefault,
        })
        .collect()
}

/// An ordered list of candidate keys loaded from `.dic`-style text.
#[derive(Debug, Clone, Default)]
pub struct KeyDictionary {
    keys: Vec<Key>,
}

impl KeyDictionary {
    pub fn new(keys: Vec<Key>) -> Self {
        Self { keys }
    }

    /// Parse dictionary text: one key per line as twelve hex digits, `#`
    /// comments and blank lines skipped, duplicates dropped while the first
    /// occurrence keeps its position.
    pub fn parse(text: &str) -> KeyDictionary {
        let mut keys: Vec<Key> = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let token: String = line
                .chars()
                .take_while(|c| c.is_ascii_hexdigit())
                .collect();
            if token.len() != 12 {
                continue;
            }
            let Ok(bytes) = hex::decode(&token) else {
                continue;
            };
            let mut key = [0u8; 6];
            key.copy_from_slice(&bytes);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        KeyDictionary { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }
}
