//! Measurements: the schema-bearing namespace level.
//!
//! A measurement directory holds exactly one `schema` file (an array of
//! 128-byte records), an empty `create_series_lock` file and one
//! subdirectory per series.  The schema is immutable after creation.

use crate::database::Database;
use std::io;
use tidestore_core::{
    field::valid_name, Error, Field, Result, SchemaEntry, MAX_FIELDS, SCHEMA_ENTRY_SIZE,
};
use tidestore_fs::{map_ro, Dir, OpenMode, TmpDir};
use tracing::debug;

/// An open measurement.
#[derive(Debug)]
pub struct Measurement<'r> {
    /// The database this measurement belongs to.
    pub db: &'r Database<'r>,
    /// Open descriptor of the measurement directory.
    pub dir: Dir,
    /// Decoded schema, in field order.
    pub fields: Vec<SchemaEntry>,
    /// Measurement name.
    pub name: String,
}

impl<'r> Measurement<'r> {
    /// Open an existing measurement and decode its schema.
    pub fn open(db: &'r Database<'r>, name: &str) -> Result<Measurement<'r>> {
        let dir = db.dir.open_dir(name).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NoSuchMeasurement
            } else {
                Error::Io(e)
            }
        })?;
        let schema_fd = dir.open_file("schema", OpenMode::Read).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NoSuchMeasurement
            } else {
                Error::Io(e)
            }
        })?;

        let len = schema_fd.len()? as usize;
        if len == 0 || len % SCHEMA_ENTRY_SIZE != 0 || len / SCHEMA_ENTRY_SIZE > MAX_FIELDS {
            return Err(Error::CorruptSchemaFile);
        }
        let map = map_ro(&schema_fd)?;
        let mut fields = Vec::with_capacity(len / SCHEMA_ENTRY_SIZE);
        for (i, rec) in map.chunks_exact(SCHEMA_ENTRY_SIZE).enumerate() {
            let entry = SchemaEntry::from_bytes(rec)?;
            if entry.index as usize != i {
                return Err(Error::CorruptSchemaFile);
            }
            if fields.iter().any(|f: &SchemaEntry| f.name == entry.name) {
                return Err(Error::CorruptSchemaFile);
            }
            fields.push(entry);
        }

        Ok(Measurement {
            db,
            dir,
            fields,
            name: name.to_string(),
        })
    }

    /// Names of all series in this measurement, sorted.
    pub fn list_series(&self) -> Result<Vec<String>> {
        let mut names = self.dir.list_dirs()?;
        names.sort();
        Ok(names)
    }

    /// Byte length of a caller write buffer holding `npoints` points whose
    /// bitmaps start `bitmap_offset` bits in: the timestamps, then for each
    /// field a word-padded bitmap and a word-padded value array.
    pub fn compute_write_chunk_len(&self, npoints: usize, bitmap_offset: usize) -> usize {
        write_buffer_len(&self.fields, npoints, bitmap_offset)
    }

    /// Largest 64-aligned point count whose write buffer fits in `len`
    /// bytes.  Multiples of 64 keep the bitmap words exact, so clients that
    /// size buffers to a budget stream cleanly with `bitmap_offset`.
    pub fn max_points_for_data_len(&self, len: usize) -> usize {
        let mut n = 0usize;
        while self.compute_write_chunk_len(n + 64, 0) <= len {
            n += 64;
        }
        n
    }

    /// Resolve a query's field-name list to schema entries, in caller
    /// order.  An empty list means every field in schema order.
    pub fn gen_entries(&self, names: &[String]) -> Result<Vec<SchemaEntry>> {
        if names.is_empty() {
            return Ok(self.fields.clone());
        }
        let mut entries = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(Error::DuplicateField {
                    field: name.clone(),
                });
            }
            let entry = self
                .fields
                .iter()
                .find(|f| &f.name == name)
                .ok_or(Error::NoSuchField)?;
            entries.push(entry.clone());
        }
        Ok(entries)
    }
}

/// Byte length of the flat write-buffer format for a schema: `npoints`
/// timestamps, then per field a bitmap and a value array, each padded to an
/// 8-byte boundary.
pub fn write_buffer_len(schema: &[SchemaEntry], npoints: usize, bitmap_offset: usize) -> usize {
    let mut len = npoints * 8;
    for f in schema {
        len += (npoints + bitmap_offset + 63) / 64 * 8;
        len += (npoints * f.ftype.width() + 7) / 8 * 8;
    }
    len
}

/// Create a measurement, atomically.
///
/// Creating the same measurement with the same schema is idempotent;
/// creating it with a different schema fails with
/// [`Error::MeasurementExists`].  Losing the rename race just loops back to
/// the open path.
pub fn create_measurement<'r>(
    db: &'r Database<'r>,
    name: &str,
    fields: &[Field],
) -> Result<Measurement<'r>> {
    if !valid_name(name) {
        return Err(Error::InvalidMeasurement);
    }
    let entries = SchemaEntry::build_schema(fields)?;

    loop {
        match Measurement::open(db, name) {
            Ok(m) => {
                if m.fields.len() != entries.len()
                    || m.fields
                        .iter()
                        .zip(entries.iter())
                        .any(|(a, b)| a.ftype != b.ftype || a.name != b.name)
                {
                    return Err(Error::MeasurementExists);
                }
                return Ok(m);
            }
            Err(Error::NoSuchMeasurement) => {}
            Err(e) => return Err(e),
        }

        // Build the measurement in tmp/ and try to move it into place.
        let staged = TmpDir::create_prefixed(&db.root.tmp_dir, "measurement")
            .map_err(Error::CreateMeasurementIo)?;
        build_measurement_dir(&staged.dir, &entries).map_err(Error::CreateMeasurementIo)?;

        if staged
            .rename_into_if_not_exists(&db.dir, name)
            .map_err(Error::CreateMeasurementIo)?
        {
            db.dir.fsync_and_flush().map_err(Error::CreateMeasurementIo)?;
            debug!(measurement = name, nfields = fields.len(), "created measurement");
            return Measurement::open(db, name);
        }
        // Someone else moved a measurement in first; loop back and compare
        // against theirs.
    }
}

fn build_measurement_dir(dir: &Dir, entries: &[SchemaEntry]) -> io::Result<()> {
    let csl = dir.create_file("create_series_lock", OpenMode::CreateNew)?;
    let schema = dir.create_file("schema", OpenMode::CreateNew)?;
    let mut bytes = Vec::with_capacity(entries.len() * SCHEMA_ENTRY_SIZE);
    for e in entries {
        bytes.extend_from_slice(&e.to_bytes());
    }
    schema.write_all_at(&bytes, 0)?;
    schema.fsync()?;
    csl.fsync()?;
    dir.fsync()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::root::{create_root, StorageRoot};
    use tempfile::tempdir;
    use tidestore_core::FieldType;

    fn test_fields() -> Vec<Field> {
        vec![
            Field::new("pressure_psi", FieldType::F64),
            Field::new("temp_c", FieldType::F32),
            Field::new("flags", FieldType::U32),
        ]
    }

    #[test]
    fn test_create_then_open() {
        let td = tempdir().unwrap();
        create_root(td.path(), &Configuration::default()).unwrap();
        let root = StorageRoot::open(td.path()).unwrap();
        root.create_database("db1").unwrap();
        let db = Database::open(&root, "db1").unwrap();

        let m = create_measurement(&db, "m1", &test_fields()).unwrap();
        assert_eq!(m.fields.len(), 3);
        assert_eq!(m.fields[0].name, "pressure_psi");
        assert_eq!(m.fields[1].offset, 3);

        let m2 = Measurement::open(&db, "m1").unwrap();
        assert_eq!(m2.fields, m.fields);
        assert_eq!(db.list_measurements().unwrap(), vec!["m1"]);
    }

    #[test]
    fn test_create_idempotent_same_schema() {
        let td = tempdir().unwrap();
        create_root(td.path(), &Configuration::default()).unwrap();
        let root = StorageRoot::open(td.path()).unwrap();
        root.create_database("db1").unwrap();
        let db = Database::open(&root, "db1").unwrap();

        create_measurement(&db, "m1", &test_fields()).unwrap();
        create_measurement(&db, "m1", &test_fields()).unwrap();
    }

    #[test]
    fn test_create_conflicting_schema_fails() {
        let td = tempdir().unwrap();
        create_root(td.path(), &Configuration::default()).unwrap();
        let root = StorageRoot::open(td.path()).unwrap();
        root.create_database("db1").unwrap();
        let db = Database::open(&root, "db1").unwrap();

        create_measurement(&db, "m1", &test_fields()).unwrap();
        let other = vec![Field::new("pressure_psi", FieldType::F32)];
        assert!(matches!(
            create_measurement(&db, "m1", &other),
            Err(Error::MeasurementExists)
        ));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let td = tempdir().unwrap();
        create_root(td.path(), &Configuration::default()).unwrap();
        let root = StorageRoot::open(td.path()).unwrap();
        root.create_database("db1").unwrap();
        let db = Database::open(&root, "db1").unwrap();

        for bad in ["a/b", "a b", "a\\b", ""] {
            assert!(matches!(
                create_measurement(&db, bad, &test_fields()),
                Err(Error::InvalidMeasurement)
            ));
        }
    }

    #[test]
    fn test_chunk_len_math() {
        let td = tempdir().unwrap();
        create_root(td.path(), &Configuration::default()).unwrap();
        let root = StorageRoot::open(td.path()).unwrap();
        root.create_database("db1").unwrap();
        let db = Database::open(&root, "db1").unwrap();

        // The four-field example from the write documentation: 9 points of
        // f64 + f32 + f64 + f64 cost 360 bytes.
        let m = create_measurement(
            &db,
            "xtalx_data",
            &[
                Field::new("pressure_psi", FieldType::F64),
                Field::new("temp_c", FieldType::F32),
                Field::new("pressure_hz", FieldType::F64),
                Field::new("temp_hz", FieldType::F64),
            ],
        )
        .unwrap();
        assert_eq!(m.compute_write_chunk_len(9, 0), 360);

        // Bitmap offset can add a word per field.
        assert!(m.compute_write_chunk_len(60, 10) > m.compute_write_chunk_len(60, 0));
    }

    #[test]
    fn test_max_points_is_64_aligned() {
        let td = tempdir().unwrap();
        create_root(td.path(), &Configuration::default()).unwrap();
        let root = StorageRoot::open(td.path()).unwrap();
        root.create_database("db1").unwrap();
        let db = Database::open(&root, "db1").unwrap();
        let m = create_measurement(&db, "m1", &test_fields()).unwrap();

        for budget in [0usize, 100, 4096, 65536, 1 << 20] {
            let n = m.max_points_for_data_len(budget);
            assert_eq!(n % 64, 0);
            if n > 0 {
                assert!(m.compute_write_chunk_len(n, 0) <= budget);
            }
            assert!(m.compute_write_chunk_len(n + 64, 0) > budget);
        }
    }

    mod props {
        use super::super::write_buffer_len;
        use proptest::prelude::*;
        use tidestore_core::{Field, FieldType, SchemaEntry};

        fn arb_schema() -> impl Strategy<Value = Vec<SchemaEntry>> {
            prop::collection::vec(1u8..=7, 1..16).prop_map(|tags| {
                let fields: Vec<Field> = tags
                    .iter()
                    .enumerate()
                    .map(|(i, tag)| {
                        Field::new(format!("f{i}"), FieldType::from_tag(*tag).unwrap())
                    })
                    .collect();
                SchemaEntry::build_schema(&fields).unwrap()
            })
        }

        proptest! {
            #[test]
            fn prop_buffer_len_monotone_in_npoints(
                schema in arb_schema(),
                npoints in 0usize..4096,
                offset in 0usize..256,
            ) {
                prop_assert!(
                    write_buffer_len(&schema, npoints, offset)
                        <= write_buffer_len(&schema, npoints + 1, offset)
                );
            }

            #[test]
            fn prop_buffer_len_monotone_in_offset(
                schema in arb_schema(),
                npoints in 0usize..4096,
                offset in 0usize..256,
            ) {
                prop_assert!(
                    write_buffer_len(&schema, npoints, offset)
                        <= write_buffer_len(&schema, npoints, offset + 1)
                );
            }

            #[test]
            fn prop_buffer_len_word_aligned(
                schema in arb_schema(),
                npoints in 0usize..4096,
                offset in 0usize..256,
            ) {
                prop_assert_eq!(write_buffer_len(&schema, npoints, offset) % 8, 0);
            }
        }
    }

    #[test]
    fn test_gen_entries() {
        let td = tempdir().unwrap();
        create_root(td.path(), &Configuration::default()).unwrap();
        let root = StorageRoot::open(td.path()).unwrap();
        root.create_database("db1").unwrap();
        let db = Database::open(&root, "db1").unwrap();
        let m = create_measurement(&db, "m1", &test_fields()).unwrap();

        let all = m.gen_entries(&[]).unwrap();
        assert_eq!(all.len(), 3);

        let picked = m
            .gen_entries(&["temp_c".to_string(), "pressure_psi".to_string()])
            .unwrap();
        assert_eq!(picked[0].name, "temp_c");
        assert_eq!(picked[1].name, "pressure_psi");

        assert!(matches!(
            m.gen_entries(&["nope".to_string()]),
            Err(Error::NoSuchField)
        ));
        assert!(matches!(
            m.gen_entries(&["temp_c".to_string(), "temp_c".to_string()]),
            Err(Error::DuplicateField { .. })
        ));
    }
}
