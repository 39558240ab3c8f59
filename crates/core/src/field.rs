//! Field types and the on-disk measurement schema record.
//!
//! A measurement's `schema` file is an array of 128-byte records:
//!
//! ```text
//! ┌──────────┬─────────────┬───────────┬────────────┬─────────────────────┐
//! │ type (1) │ version (1) │ index (1) │ offset (1) │ name (124, NUL-term)│
//! └──────────┴─────────────┴───────────┴────────────┴─────────────────────┘
//! ```
//!
//! `index` is the field's position in the schema; `offset` is the u64-slot
//! offset of the field inside a packed WAL row (`2 + index`: one slot each
//! for the timestamp and the bitmap, then one per field).  The name
//! occupies at most 123 bytes and byte 123 of the name region is always
//! NUL.

use crate::error::{Error, Result};
use crate::limits::{MAX_FIELDS, SCHEMA_ENTRY_SIZE, SCHEMA_VERSION};
use smallvec::SmallVec;

/// Per-field vector sized for the 64-field format limit.
pub type FieldVec<T> = SmallVec<[T; 8]>;

/// Enumerated primitive types a field can hold.
///
/// The discriminants are the on-disk type tags; 0 is reserved so a zeroed
/// record never parses as valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    /// 1-byte boolean.
    Bool = 1,
    /// 32-bit unsigned integer.
    U32 = 2,
    /// 64-bit unsigned integer.
    U64 = 3,
    /// 32-bit float.
    F32 = 4,
    /// 64-bit float.
    F64 = 5,
    /// 32-bit signed integer.
    I32 = 6,
    /// 64-bit signed integer.
    I64 = 7,
}

impl FieldType {
    /// Width in bytes of one stored value.
    pub const fn width(self) -> usize {
        match self {
            FieldType::Bool => 1,
            FieldType::U32 | FieldType::F32 | FieldType::I32 => 4,
            FieldType::U64 | FieldType::F64 | FieldType::I64 => 8,
        }
    }

    /// Wire name of the type.
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::U32 => "u32",
            FieldType::U64 => "u64",
            FieldType::F32 => "f32",
            FieldType::F64 => "f64",
            FieldType::I32 => "i32",
            FieldType::I64 => "i64",
        }
    }

    /// Decode an on-disk type tag.
    pub fn from_tag(tag: u8) -> Option<FieldType> {
        match tag {
            1 => Some(FieldType::Bool),
            2 => Some(FieldType::U32),
            3 => Some(FieldType::U64),
            4 => Some(FieldType::F32),
            5 => Some(FieldType::F64),
            6 => Some(FieldType::I32),
            7 => Some(FieldType::I64),
            _ => None,
        }
    }

    /// Parse a wire name, as used by schema declarations.
    pub fn from_name(name: &str) -> Option<FieldType> {
        match name {
            "bool" => Some(FieldType::Bool),
            "u32" => Some(FieldType::U32),
            "u64" => Some(FieldType::U64),
            "f32" => Some(FieldType::F32),
            "f64" => Some(FieldType::F64),
            "i32" => Some(FieldType::I32),
            "i64" => Some(FieldType::I64),
            _ => None,
        }
    }

    /// Load a raw 8-byte WAL slot or field payload as `f64`, for the
    /// aggregate operators.
    pub fn load_f64(self, raw: u64) -> f64 {
        match self {
            FieldType::Bool => (raw as u8) as f64,
            FieldType::U32 => (raw as u32) as f64,
            FieldType::U64 => raw as f64,
            FieldType::F32 => f32::from_bits(raw as u32) as f64,
            FieldType::F64 => f64::from_bits(raw),
            FieldType::I32 => (raw as u32 as i32) as f64,
            FieldType::I64 => (raw as i64) as f64,
        }
    }
}

/// An owned (name, type) pair, the public face of one schema column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name, unique within its measurement.
    pub name: String,
    /// Stored primitive type.
    pub ftype: FieldType,
}

impl Field {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, ftype: FieldType) -> Field {
        Field {
            name: name.into(),
            ftype,
        }
    }
}

/// One decoded 128-byte schema record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
    /// Stored primitive type.
    pub ftype: FieldType,
    /// Schema record format version.
    pub version: u8,
    /// Position of this field in the schema.
    pub index: u8,
    /// u64-slot offset of this field in a packed WAL row.
    pub offset: u8,
    /// Field name.
    pub name: String,
}

impl SchemaEntry {
    /// Build the records for a requested field vector, assigning index and
    /// row offsets, and validate the vector against the format limits.
    pub fn build_schema(fields: &[Field]) -> Result<Vec<SchemaEntry>> {
        if fields.len() > MAX_FIELDS {
            return Err(Error::TooManyFields {
                count: fields.len(),
            });
        }
        let mut entries = Vec::with_capacity(fields.len());
        for (i, f) in fields.iter().enumerate() {
            if f.name.is_empty() || f.name.len() > 123 || !valid_name(&f.name) {
                return Err(Error::CorruptSchemaFile);
            }
            if fields[..i].iter().any(|prev| prev.name == f.name) {
                return Err(Error::DuplicateField {
                    field: f.name.clone(),
                });
            }
            entries.push(SchemaEntry {
                ftype: f.ftype,
                version: SCHEMA_VERSION,
                index: i as u8,
                offset: (2 + i) as u8,
                name: f.name.clone(),
            });
        }
        Ok(entries)
    }

    /// Encode into the fixed 128-byte on-disk form.
    pub fn to_bytes(&self) -> [u8; SCHEMA_ENTRY_SIZE] {
        let mut bytes = [0u8; SCHEMA_ENTRY_SIZE];
        bytes[0] = self.ftype as u8;
        bytes[1] = self.version;
        bytes[2] = self.index;
        bytes[3] = self.offset;
        bytes[4..4 + self.name.len()].copy_from_slice(self.name.as_bytes());
        bytes
    }

    /// Decode and validate one on-disk record.
    ///
    /// Rejects an out-of-range type tag, an empty name, or a name region
    /// without its terminating NUL.
    pub fn from_bytes(bytes: &[u8]) -> Result<SchemaEntry> {
        if bytes.len() != SCHEMA_ENTRY_SIZE {
            return Err(Error::CorruptSchemaFile);
        }
        let ftype = FieldType::from_tag(bytes[0]).ok_or(Error::CorruptSchemaFile)?;
        let name_region = &bytes[4..SCHEMA_ENTRY_SIZE];
        if name_region[0] == 0 || name_region[123] != 0 {
            return Err(Error::CorruptSchemaFile);
        }
        let nul = name_region
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::CorruptSchemaFile)?;
        let name = std::str::from_utf8(&name_region[..nul])
            .map_err(|_| Error::CorruptSchemaFile)?
            .to_string();
        Ok(SchemaEntry {
            ftype,
            version: bytes[1],
            index: bytes[2],
            offset: bytes[3],
            name,
        })
    }

    /// The owned (name, type) view of this record.
    pub fn field(&self) -> Field {
        Field::new(self.name.clone(), self.ftype)
    }
}

/// Name restrictions shared by databases, measurements, series and fields:
/// no `/`, no whitespace, no backslash, no NUL.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths() {
        assert_eq!(FieldType::Bool.width(), 1);
        assert_eq!(FieldType::U32.width(), 4);
        assert_eq!(FieldType::U64.width(), 8);
        assert_eq!(FieldType::F32.width(), 4);
        assert_eq!(FieldType::F64.width(), 8);
        assert_eq!(FieldType::I32.width(), 4);
        assert_eq!(FieldType::I64.width(), 8);
    }

    #[test]
    fn test_tag_roundtrip() {
        for tag in 1..=7u8 {
            let ft = FieldType::from_tag(tag).unwrap();
            assert_eq!(ft as u8, tag);
            assert_eq!(FieldType::from_name(ft.name()), Some(ft));
        }
        assert!(FieldType::from_tag(0).is_none());
        assert!(FieldType::from_tag(8).is_none());
    }

    #[test]
    fn test_schema_entry_roundtrip() {
        let entries = SchemaEntry::build_schema(&[
            Field::new("pressure_psi", FieldType::F64),
            Field::new("temp_c", FieldType::F32),
            Field::new("flags", FieldType::U32),
        ])
        .unwrap();
        assert_eq!(entries[1].index, 1);
        assert_eq!(entries[1].offset, 3);
        for e in &entries {
            let decoded = SchemaEntry::from_bytes(&e.to_bytes()).unwrap();
            assert_eq!(&decoded, e);
        }
    }

    #[test]
    fn test_schema_rejects_bad_records() {
        let good = SchemaEntry {
            ftype: FieldType::U64,
            version: SCHEMA_VERSION,
            index: 0,
            offset: 2,
            name: "x".into(),
        };
        let mut bytes = good.to_bytes();
        bytes[0] = 0;
        assert!(SchemaEntry::from_bytes(&bytes).is_err());
        bytes = good.to_bytes();
        bytes[4] = 0;
        assert!(SchemaEntry::from_bytes(&bytes).is_err());
        bytes = good.to_bytes();
        bytes[127] = b'y';
        assert!(SchemaEntry::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_build_schema_rejects_duplicates_and_overflow() {
        let dup = vec![
            Field::new("a", FieldType::U32),
            Field::new("a", FieldType::U32),
        ];
        assert!(matches!(
            SchemaEntry::build_schema(&dup),
            Err(Error::DuplicateField { .. })
        ));

        let many: Vec<Field> = (0..65)
            .map(|i| Field::new(format!("f{i}"), FieldType::U32))
            .collect();
        assert!(matches!(
            SchemaEntry::build_schema(&many),
            Err(Error::TooManyFields { .. })
        ));
    }

    #[test]
    fn test_valid_name() {
        assert!(valid_name("pressure_psi"));
        assert!(valid_name("sensor-07"));
        assert!(!valid_name(""));
        assert!(!valid_name("a/b"));
        assert!(!valid_name("a b"));
        assert!(!valid_name("a\\b"));
        assert!(!valid_name("a\tb"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_schema_entry_roundtrip(
                tag in 1u8..=7,
                name in "[a-z_][a-z0-9_]{0,100}",
                index in 0u8..64,
            ) {
                let entry = SchemaEntry {
                    ftype: FieldType::from_tag(tag).unwrap(),
                    version: SCHEMA_VERSION,
                    index,
                    offset: 2 + index,
                    name,
                };
                let decoded = SchemaEntry::from_bytes(&entry.to_bytes()).unwrap();
                prop_assert_eq!(decoded, entry);
            }
        }
    }

    #[test]
    fn test_load_f64() {
        assert_eq!(FieldType::U32.load_f64(7), 7.0);
        assert_eq!(FieldType::I32.load_f64((-3i32 as u32) as u64), -3.0);
        assert_eq!(FieldType::I64.load_f64((-9i64) as u64), -9.0);
        assert_eq!(FieldType::F64.load_f64(2.5f64.to_bits()), 2.5);
        assert_eq!(FieldType::F32.load_f64(1.5f32.to_bits() as u64), 1.5);
        assert_eq!(FieldType::Bool.load_f64(1), 1.0);
    }
}
