//! Packed short-string identifiers.
//!
//! An [`Identifier`] is an opaque, `Copy`, comparable/hashable 64-bit token
//! with a recoverable string name. Up to 10 characters from a 64-symbol
//! alphabet are packed 6 bits each into a `u64`; the alphabet's first symbol
//! (space) doubles as padding, so trailing unused slots decode to nothing.

use serde::{Deserialize, Serialize};
use std::fmt;

const ALPHABET: &[u8; 64] =
    b" 0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";
const MAX_CHARS: usize = 10;
const BITS_PER_CHAR: u32 = 6;

fn code_of(c: u8) -> Option<u8> {
    ALPHABET.iter().position(|&a| a == c).map(|p| p as u8)
}

/// A packed short-string identifier, equality/hash over the raw 64-bit value.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Identifier(u64);

impl Identifier {
    pub const EMPTY: Identifier = Identifier(0);

    /// Pack `s` into an identifier. Characters beyond the 10th, or any
    /// character outside the alphabet, are dropped silently (the source
    /// format guarantees short, restricted-alphabet tokens; this is not a
    /// boundary the core needs to reject hard).
    pub fn new(s: &str) -> Self {
        let mut value: u64 = 0;
        let mut n = 0;
        for &b in s.as_bytes().iter().take(MAX_CHARS) {
            let Some(code) = code_of(b) else { continue };
            value = (value << BITS_PER_CHAR) | code as u64;
            n += 1;
        }
        // left-align: pad remaining slots with the zero (space) code
        value <<= BITS_PER_CHAR * (MAX_CHARS - n) as u32;
        Identifier(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn from_value(v: u64) -> Self {
        Identifier(v)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Recover the string name.
    ///
    /// Characters are packed most-significant-chunk first, left-aligned
    /// within the 60 usable bits; the first zero (space) chunk ends the
    /// name.
    pub fn as_str(&self) -> String {
        let mut out = String::with_capacity(MAX_CHARS);
        for k in 0..MAX_CHARS as u32 {
            let shift = (MAX_CHARS as u32 - 1 - k) * BITS_PER_CHAR;
            let code = ((self.0 >> shift) & 0x3f) as u8;
            if code == 0 {
                break;
            }
            out.push(ALPHABET[code as usize] as char);
        }
        out
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Identifier::EMPTY
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier::new(s)
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Identifier::new(&s)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({:?})", self.as_str())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_short_names() {
        for s in ["app", "hello", "T", "CP_1", "a1b2c3d4e5"] {
            let id = Identifier::new(s);
            assert_eq!(id.as_str(), s, "round trip failed for {s:?}");
        }
    }

    #[test]
    fn empty_is_empty() {
        assert!(Identifier::EMPTY.is_empty());
        assert_eq!(Identifier::EMPTY.as_str(), "");
        assert_eq!(Identifier::new("").as_str(), "");
    }

    #[test]
    fn truncates_beyond_ten_chars() {
        let id = Identifier::new("abcdefghijklmnop");
        assert_eq!(id.as_str(), "abcdefghij");
    }

    #[test]
    fn equality_and_hash_are_over_the_raw_value() {
        let a = Identifier::new("hello");
        let b = Identifier::new("hello");
        assert_eq!(a, b);
        assert_eq!(a.value(), b.value());
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn drops_out_of_alphabet_characters() {
        let id = Identifier::new("he-llo");
        assert_eq!(id.as_str(), "hello");
    }
}
