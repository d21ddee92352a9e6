//! Common serde extensions and custom types shared across the descriptor and loader
//! JSON schemas.

use std::fmt::Write as _;
use std::ops::{Deref, DerefMut};

use regex::Regex;


/// A regular expression serialized and deserialized to/from its string representation.
/// Used for the rarely-populated `os.version` rule field.
#[derive(Debug, Clone)]
pub struct RegexString(pub Regex);

impl Deref for RegexString {
    type Target = Regex;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for RegexString {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl serde::Serialize for RegexString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for RegexString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor;
        impl serde::de::Visitor<'_> for Visitor {
            type Value = RegexString;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, "a string regex")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Regex::new(v).map(RegexString).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

/// A hexadecimal, lower case, fixed-length bytes string, e.g. a SHA-1 hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexString<const N: usize>(pub [u8; N]);

impl<const N: usize> Deref for HexString<N> {
    type Target = [u8; N];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<const N: usize> DerefMut for HexString<N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<const N: usize> HexString<N> {
    pub fn to_hex(&self) -> String {
        let mut buf = String::with_capacity(N * 2);
        for b in self.0 {
            write!(buf, "{b:02x}").unwrap();
        }
        buf
    }
}

impl<const N: usize> serde::Serialize for HexString<N> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de, const N: usize> serde::Deserialize<'de> for HexString<N> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor<const N: usize>;
        impl<'de, const N: usize> serde::de::Visitor<'de> for Visitor<N> {
            type Value = HexString<N>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, "a bytes string ({} hex characters)", N * 2)
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                parse_hex_bytes::<N>(v)
                    .map(HexString)
                    .ok_or_else(|| E::custom(format_args!("invalid bytes string ({} hex characters)", N * 2)))
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

/// Parse a hex bytes string into a fixed-size array, returning `None` if malformed,
/// too short or too long.
pub fn parse_hex_bytes<const LEN: usize>(mut string: &str) -> Option<[u8; LEN]> {
    let mut dst = [0u8; LEN];
    for dst in &mut dst {
        if string.is_char_boundary(2) && string.len() >= 2 {
            let (num, rem) = string.split_at(2);
            string = rem;
            *dst = u8::from_str_radix(num, 16).ok()?;
        } else {
            return None;
        }
    }
    string.is_empty().then_some(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_string_round_trips() {
        let hex = "a9993e364706816aba3e25717850c26c9cd0d89";
        let parsed: [u8; 20] = parse_hex_bytes(hex).unwrap();
        let s = HexString(parsed);
        assert_eq!(s.to_hex(), hex);
    }
}
