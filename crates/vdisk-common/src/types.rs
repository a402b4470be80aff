//! Domain primitive types used across the vdisk workspace.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Result, VdiskError};

const MIB: u64 = 1 << 20;

/// A size in bytes parsed from a human string such as `8G` or `512M`.
///
/// Lowercase suffixes `t g m k` are decimal, uppercase `T G M K` are binary,
/// `b` means bytes, and a bare number is a byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "RawSize")]
pub struct ByteSize(u64);

impl ByteSize {
    /// Creates a size from a raw byte count.
    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Parses a size string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is empty, not a number, or overflows.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = || VdiskError::Config {
            message: format!("invalid size: {input:?}"),
        };

        let last = input.chars().last().ok_or_else(invalid)?;
        let (digits, multiplier) = match unit_multiplier(last) {
            Some(multiplier) => (&input[..input.len() - last.len_utf8()], multiplier),
            None => (input, 1),
        };

        let value: u64 = digits.parse().map_err(|_| invalid())?;
        value.checked_mul(multiplier).map(Self).ok_or_else(invalid)
    }

    /// Returns the size in bytes.
    #[must_use]
    pub const fn bytes(self) -> u64 {
        self.0
    }

    /// Formats the size for `lvcreate -L`, in whole mebibytes.
    #[must_use]
    pub fn as_lvm_size(self) -> String {
        format!("{}m", self.0 / MIB)
    }
}

fn unit_multiplier(unit: char) -> Option<u64> {
    match unit {
        't' => Some(10_u64.pow(12)),
        'g' => Some(10_u64.pow(9)),
        'm' => Some(10_u64.pow(6)),
        'k' => Some(10_u64.pow(3)),
        'T' => Some(1 << 40),
        'G' => Some(1 << 30),
        'M' => Some(1 << 20),
        'K' => Some(1 << 10),
        'b' | 'B' => Some(1),
        _ => None,
    }
}

impl FromStr for ByteSize {
    type Err = VdiskError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSize {
    Bytes(u64),
    Text(String),
}

impl TryFrom<RawSize> for ByteSize {
    type Error = VdiskError;

    fn try_from(raw: RawSize) -> Result<Self> {
        match raw {
            RawSize::Bytes(bytes) => Ok(Self(bytes)),
            RawSize::Text(text) => Self::parse(&text),
        }
    }
}

/// Disk layout strategy selected for an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetKind {
    /// GPT table with a BIOS-boot stub and everything, `/boot` included, on LVM.
    #[default]
    Generic,
    /// MBR table with a raw `/boot` partition, as pv-grub expects.
    Ec2,
}

impl FromStr for PresetKind {
    type Err = VdiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "ec2" => Ok(Self::Ec2),
            other => Err(VdiskError::Config {
                message: format!("unknown preset: {other} (expected generic or ec2)"),
            }),
        }
    }
}

impl fmt::Display for PresetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::Ec2 => write!(f, "ec2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_binary_units() {
        assert_eq!(ByteSize::parse("8G").unwrap().bytes(), 8 << 30);
        assert_eq!(ByteSize::parse("512M").unwrap().bytes(), 512 << 20);
        assert_eq!(ByteSize::parse("4K").unwrap().bytes(), 4096);
    }

    #[test]
    fn parse_decimal_units() {
        assert_eq!(ByteSize::parse("2g").unwrap().bytes(), 2_000_000_000);
        assert_eq!(ByteSize::parse("3k").unwrap().bytes(), 3000);
    }

    #[test]
    fn parse_plain_number_is_bytes() {
        assert_eq!(ByteSize::parse("1024").unwrap().bytes(), 1024);
        assert_eq!(ByteSize::parse("17b").unwrap().bytes(), 17);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ByteSize::parse("").is_err());
        assert!(ByteSize::parse("G").is_err());
        assert!(ByteSize::parse("eightG").is_err());
        assert!(ByteSize::parse("99999999999T").is_err());
    }

    #[test]
    fn lvm_size_is_whole_mebibytes() {
        assert_eq!(ByteSize::parse("4G").unwrap().as_lvm_size(), "4096m");
    }

    #[test]
    fn preset_kind_parses_case_insensitively() {
        assert_eq!("EC2".parse::<PresetKind>().unwrap(), PresetKind::Ec2);
        assert_eq!("generic".parse::<PresetKind>().unwrap(), PresetKind::Generic);
        assert!("xen".parse::<PresetKind>().is_err());
    }
}
