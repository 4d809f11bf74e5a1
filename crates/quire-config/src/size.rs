use std::fmt;

use serde::{Deserialize, Serialize};

/// A byte size which supports both raw byte counts and human-friendly suffixes.
///
/// Accepted forms: `1048576`, `"512KiB"`, `"250 MiB"`, `"1.5GiB"`, `"10MB"`.
/// Binary suffixes (`KiB`, `MiB`, `GiB`, and the bare `K`/`M`/`G`) are powers of
/// 1024; `kB`/`MB`/`GB` are powers of 1000.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const fn kib(n: u64) -> Self {
        Self(n * 1024)
    }

    pub const fn mib(n: u64) -> Self {
        Self(n * 1024 * 1024)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(&str, u64); 3] = [
            ("GiB", 1024 * 1024 * 1024),
            ("MiB", 1024 * 1024),
            ("KiB", 1024),
        ];
        for (suffix, scale) in UNITS {
            if self.0 >= scale && self.0 % scale == 0 {
                return write!(f, "{}{suffix}", self.0 / scale);
            }
        }
        write!(f, "{}B", self.0)
    }
}

impl Serialize for ByteSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bytes(u64),
            Human(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bytes(value) => Ok(ByteSize(value)),
            Repr::Human(value) => parse_byte_size(&value)
                .map(ByteSize)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Parse a human-friendly size such as `250MiB` into bytes.
pub fn parse_byte_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);
    if number.is_empty() {
        return Err("byte size must start with a number".to_string());
    }

    let scale: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kib" => 1 << 10,
        "m" | "mib" => 1 << 20,
        "g" | "gib" => 1 << 30,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        _ => return Err("unknown byte size suffix (expected B, KiB, MiB, GiB, kB, MB or GB)".to_string()),
    };

    if let Ok(whole) = number.parse::<u64>() {
        return whole
            .checked_mul(scale)
            .ok_or_else(|| "byte size is too large".to_string());
    }

    let value: f64 = number
        .parse()
        .map_err(|_| "invalid number in byte size".to_string())?;
    let bytes = (value * scale as f64).round();
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return Err("byte size is too large".to_string());
    }
    Ok(bytes as u64)
}
