//! Typed resource quantities.
//!
//! The config file accepts the loose human forms (`"512m"` memory,
//! `"2.0"` or `"1500m"` cpu, or bare integers), but quantities are
//! parsed exactly once, here, and carried as explicit byte / millicore
//! values from then on. Serialization always emits the explicit form.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A quantity that could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid quantity {input:?}: {reason}")]
pub struct QuantityError {
    pub input: String,
    pub reason: &'static str,
}

impl QuantityError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

// ── Memory ────────────────────────────────────────────────────────

/// A memory quantity in bytes.
///
/// Parses `"512m"`, `"2g"`, `"64k"`, `"1t"` (binary multiples, with an
/// optional trailing `b`) and bare byte counts. Serializes as bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MemoryBytes(pub u64);

impl MemoryBytes {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn from_mib(mib: u64) -> Self {
        Self(mib * 1024 * 1024)
    }

    pub fn as_bytes(&self) -> u64 {
        self.0
    }
}

impl FromStr for MemoryBytes {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_ascii_lowercase();
        if raw.is_empty() {
            return Err(QuantityError::new(s, "empty"));
        }
        // Strip an optional trailing "b" ("512mb" == "512m").
        let raw = raw.strip_suffix('b').unwrap_or(&raw);
        let (digits, multiplier) = match raw.chars().last() {
            Some('k') => (&raw[..raw.len() - 1], 1024u64),
            Some('m') => (&raw[..raw.len() - 1], 1024 * 1024),
            Some('g') => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
            Some('t') => (&raw[..raw.len() - 1], 1024u64 * 1024 * 1024 * 1024),
            Some(c) if c.is_ascii_digit() => (raw, 1),
            _ => return Err(QuantityError::new(s, "unknown unit suffix")),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| QuantityError::new(s, "not a whole number"))?;
        value
            .checked_mul(multiplier)
            .map(MemoryBytes)
            .ok_or_else(|| QuantityError::new(s, "overflows u64 bytes"))
    }
}

impl fmt::Display for MemoryBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const GIB: u64 = 1024 * 1024 * 1024;
        const MIB: u64 = 1024 * 1024;
        const KIB: u64 = 1024;
        let n = self.0;
        if n > 0 && n % GIB == 0 {
            write!(f, "{}g", n / GIB)
        } else if n > 0 && n % MIB == 0 {
            write!(f, "{}m", n / MIB)
        } else if n > 0 && n % KIB == 0 {
            write!(f, "{}k", n / KIB)
        } else {
            write!(f, "{n}")
        }
    }
}

impl Serialize for MemoryBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for MemoryBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawQuantity::deserialize(deserializer)? {
            RawQuantity::Int(n) => Ok(MemoryBytes(n)),
            RawQuantity::Float(_) => Err(de::Error::custom(
                "fractional byte counts are not accepted; use a unit suffix",
            )),
            RawQuantity::Str(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

// ── CPU ───────────────────────────────────────────────────────────

/// A CPU quantity in millicores.
///
/// Parses `"500m"` (millicores), `"2.0"` / `"0.5"` (cores) and bare
/// integers (cores). Serializes as millicores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Millicores(pub u32);

impl Millicores {
    pub const fn from_millis(millis: u32) -> Self {
        Self(millis)
    }

    pub const fn from_cores(cores: u32) -> Self {
        Self(cores * 1000)
    }

    pub fn as_millis(&self) -> u32 {
        self.0
    }
}

impl FromStr for Millicores {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(QuantityError::new(s, "empty"));
        }
        if let Some(millis) = raw.strip_suffix('m') {
            let value: u32 = millis
                .parse()
                .map_err(|_| QuantityError::new(s, "not a whole millicore count"))?;
            return Ok(Millicores(value));
        }
        let cores: f64 = raw
            .parse()
            .map_err(|_| QuantityError::new(s, "not a core count"))?;
        if !cores.is_finite() || cores < 0.0 {
            return Err(QuantityError::new(s, "negative or non-finite"));
        }
        let millis = (cores * 1000.0).round();
        if millis > u32::MAX as f64 {
            return Err(QuantityError::new(s, "overflows u32 millicores"));
        }
        Ok(Millicores(millis as u32))
    }
}

impl fmt::Display for Millicores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{}", self.0 / 1000)
        } else {
            write!(f, "{}m", self.0)
        }
    }
}

impl Serialize for Millicores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> Deserialize<'de> for Millicores {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawQuantity::deserialize(deserializer)? {
            // Bare integers are whole cores, matching "2.0" style input.
            RawQuantity::Int(n) => {
                let millis = n
                    .checked_mul(1000)
                    .filter(|m| *m <= u32::MAX as u64)
                    .ok_or_else(|| de::Error::custom("core count overflows u32 millicores"))?;
                Ok(Millicores(millis as u32))
            }
            RawQuantity::Float(f) => format!("{f}").parse().map_err(de::Error::custom),
            RawQuantity::Str(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

/// Accepts the three shapes quantities take in TOML / JSON input.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawQuantity {
    Int(u64),
    Float(f64),
    Str(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_parses_suffixes() {
        assert_eq!("512m".parse::<MemoryBytes>().unwrap().as_bytes(), 512 * 1024 * 1024);
        assert_eq!("2g".parse::<MemoryBytes>().unwrap().as_bytes(), 2u64 * 1024 * 1024 * 1024);
        assert_eq!("64k".parse::<MemoryBytes>().unwrap().as_bytes(), 64 * 1024);
        assert_eq!("1t".parse::<MemoryBytes>().unwrap().as_bytes(), 1024u64 * 1024 * 1024 * 1024);
    }

    #[test]
    fn memory_parses_trailing_b_and_case() {
        assert_eq!("512MB".parse::<MemoryBytes>().unwrap(), MemoryBytes::from_mib(512));
        assert_eq!("512Mb".parse::<MemoryBytes>().unwrap(), MemoryBytes::from_mib(512));
    }

    #[test]
    fn memory_parses_bare_bytes() {
        assert_eq!("1048576".parse::<MemoryBytes>().unwrap(), MemoryBytes::from_mib(1));
    }

    #[test]
    fn memory_rejects_garbage() {
        assert!("".parse::<MemoryBytes>().is_err());
        assert!("12x".parse::<MemoryBytes>().is_err());
        assert!("m".parse::<MemoryBytes>().is_err());
        assert!("1.5g".parse::<MemoryBytes>().is_err());
    }

    #[test]
    fn memory_display_round_trips() {
        for s in ["512m", "2g", "64k", "123"] {
            let q: MemoryBytes = s.parse().unwrap();
            assert_eq!(q.to_string(), s);
            assert_eq!(q.to_string().parse::<MemoryBytes>().unwrap(), q);
        }
    }

    #[test]
    fn cpu_parses_cores_and_millis() {
        assert_eq!("2.0".parse::<Millicores>().unwrap().as_millis(), 2000);
        assert_eq!("0.5".parse::<Millicores>().unwrap().as_millis(), 500);
        assert_eq!("1500m".parse::<Millicores>().unwrap().as_millis(), 1500);
        assert_eq!("3".parse::<Millicores>().unwrap().as_millis(), 3000);
    }

    #[test]
    fn cpu_rejects_garbage() {
        assert!("".parse::<Millicores>().is_err());
        assert!("-1".parse::<Millicores>().is_err());
        assert!("fast".parse::<Millicores>().is_err());
    }

    #[test]
    fn cpu_display() {
        assert_eq!(Millicores::from_millis(2000).to_string(), "2");
        assert_eq!(Millicores::from_millis(1500).to_string(), "1500m");
    }

    #[test]
    fn deserialize_from_toml_forms() {
        #[derive(Deserialize)]
        struct Row {
            mem: MemoryBytes,
            cpu: Millicores,
        }

        let row: Row = toml::from_str("mem = \"512m\"\ncpu = \"2.0\"").unwrap();
        assert_eq!(row.mem, MemoryBytes::from_mib(512));
        assert_eq!(row.cpu, Millicores::from_cores(2));

        let row: Row = toml::from_str("mem = 1048576\ncpu = 1.5").unwrap();
        assert_eq!(row.mem, MemoryBytes::from_mib(1));
        assert_eq!(row.cpu, Millicores::from_millis(1500));

        let row: Row = toml::from_str("mem = \"1g\"\ncpu = 2").unwrap();
        assert_eq!(row.mem.as_bytes(), 1024 * 1024 * 1024);
        assert_eq!(row.cpu.as_millis(), 2000);
    }

    #[test]
    fn serialize_is_explicit() {
        let json = serde_json::to_string(&MemoryBytes::from_mib(1)).unwrap();
        assert_eq!(json, "1048576");
        let json = serde_json::to_string(&Millicores::from_millis(1500)).unwrap();
        assert_eq!(json, "1500");
    }

    #[test]
    fn fractional_bytes_rejected() {
        #[derive(Debug, Deserialize)]
        struct Row {
            #[allow(dead_code)]
            mem: MemoryBytes,
        }

        let err = toml::from_str::<Row>("mem = 1.5").unwrap_err();
        assert!(err.to_string().contains("unit suffix"), "{err}");
    }
}
