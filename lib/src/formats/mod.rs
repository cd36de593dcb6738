//! The three oiXX container codecs (§4.D-§4.F, §6).

pub mod oica;
pub mod oidl;
pub mod oisb;

use crate::error::{OxcError, Result};

/// Selector for the smallest integer width that can hold a length or count,
/// shared by all three formats ("size-class" in the GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSizeType {
    U8,
    U16,
    U32,
    U64,
}

impl DataSizeType {
    pub fn smallest_fitting(value: u64) -> Self {
        if value <= u8::MAX as u64 {
            DataSizeType::U8
        } else if value <= u16::MAX as u64 {
            DataSizeType::U16
        } else if value <= u32::MAX as u64 {
            DataSizeType::U32
        } else {
            DataSizeType::U64
        }
    }

    pub fn byte_width(self) -> usize {
        match self {
            DataSizeType::U8 => 1,
            DataSizeType::U16 => 2,
            DataSizeType::U32 => 4,
            DataSizeType::U64 => 8,
        }
    }

    pub fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0 => Ok(DataSizeType::U8),
            1 => Ok(DataSizeType::U16),
            2 => Ok(DataSizeType::U32),
            3 => Ok(DataSizeType::U64),
            _ => Err(OxcError::InvalidParameter(
                "invalid data size type bits".to_string(),
            )),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            DataSizeType::U8 => 0,
            DataSizeType::U16 => 1,
            DataSizeType::U32 => 2,
            DataSizeType::U64 => 3,
        }
    }

    /// Writes `value` little-endian in this size class, appending to `out`.
    pub fn write(self, value: u64, out: &mut Vec<u8>) -> Result<()> {
        match self {
            DataSizeType::U8 => {
                let v: u8 = value.try_into().map_err(|_| {
                    OxcError::out_of_bounds("DataSizeType::write (u8)", value, u8::MAX as u64)
                })?;
                out.push(v);
            }
            DataSizeType::U16 => {
                let v: u16 = value.try_into().map_err(|_| {
                    OxcError::out_of_bounds("DataSizeType::write (u16)", value, u16::MAX as u64)
                })?;
                out.extend_from_slice(&v.to_le_bytes());
            }
            DataSizeType::U32 => {
                let v: u32 = value.try_into().map_err(|_| {
                    OxcError::out_of_bounds("DataSizeType::write (u32)", value, u32::MAX as u64)
                })?;
                out.extend_from_slice(&v.to_le_bytes());
            }
            DataSizeType::U64 => out.extend_from_slice(&value.to_le_bytes()),
        }
        Ok(())
    }

    /// Reads a little-endian value of this size class from the front of
    /// `buf`, returning it along with the remaining bytes.
    pub fn read<'a>(self, buf: &'a [u8]) -> Result<(u64, &'a [u8])> {
        let width = self.byte_width();
        if buf.len() < width {
            return Err(OxcError::out_of_bounds(
                "DataSizeType::read",
                width as u64,
                buf.len() as u64,
            ));
        }
        let (head, tail) = buf.split_at(width);
        let value = match self {
            DataSizeType::U8 => head[0] as u64,
            DataSizeType::U16 => u16::from_le_bytes(head.try_into().unwrap()) as u64,
            DataSizeType::U32 => u32::from_le_bytes(head.try_into().unwrap()) as u64,
            DataSizeType::U64 => u64::from_le_bytes(head.try_into().unwrap()),
        };
        Ok((value, tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_fitting_picks_minimal_width() {
        assert_eq!(DataSizeType::smallest_fitting(0), DataSizeType::U8);
        assert_eq!(DataSizeType::smallest_fitting(255), DataSizeType::U8);
        assert_eq!(DataSizeType::smallest_fitting(256), DataSizeType::U16);
        assert_eq!(DataSizeType::smallest_fitting(70_000), DataSizeType::U32);
        assert_eq!(
            DataSizeType::smallest_fitting(u32::MAX as u64 + 1),
            DataSizeType::U64
        );
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut out = Vec::new();
        DataSizeType::U32.write(12345, &mut out).unwrap();
        let (value, rest) = DataSizeType::U32.read(&out).unwrap();
        assert_eq!(value, 12345);
        assert!(rest.is_empty());
    }
}
