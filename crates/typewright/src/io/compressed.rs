//! # Compressed JSON Files
//!
//! All persisted artifacts are gzip-compressed JSON.
//!
//! Record files come in two layouts, chosen by suffix:
//! * ``*.jsonl.gz`` - one JSON record per line.
//! * anything else - a single JSON array of records.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use serde::{Serialize, de::DeserializeOwned};

use crate::errors::{TWResult, TypewrightError};

fn io_err(
    path: &Path,
    source: std::io::Error,
) -> TypewrightError {
    TypewrightError::DataFile {
        path: path.to_path_buf(),
        source,
    }
}

fn format_err(
    path: &Path,
    source: serde_json::Error,
) -> TypewrightError {
    TypewrightError::DataFormat {
        path: path.to_path_buf(),
        source,
    }
}

/// Is `path` a line-delimited record file?
pub fn is_jsonl_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(".jsonl.gz"))
        .unwrap_or(false)
}

fn open_reader(path: &Path) -> TWResult<BufReader<GzDecoder<File>>> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    Ok(BufReader::new(GzDecoder::new(file)))
}

/// Read a single gzip-compressed JSON value.
pub fn read_json_gz<T: DeserializeOwned>(path: &Path) -> TWResult<T> {
    let reader = open_reader(path)?;
    serde_json::from_reader(reader).map_err(|e| format_err(path, e))
}

/// Create `path`, and its parent directories, for gzip-compressed writing.
fn create_encoder(path: &Path) -> TWResult<GzEncoder<BufWriter<File>>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let file = File::create(path).map_err(|e| io_err(path, e))?;
    Ok(GzEncoder::new(BufWriter::new(file), Compression::default()))
}

/// Write a single value as gzip-compressed JSON, replacing any existing file.
pub fn write_json_gz<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> TWResult<()> {
    let mut encoder = create_encoder(path)?;
    serde_json::to_writer(&mut encoder, value).map_err(|e| format_err(path, e))?;
    let mut writer = encoder.finish().map_err(|e| io_err(path, e))?;
    writer.flush().map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Read every record of a record file.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> TWResult<Vec<T>> {
    if !is_jsonl_path(path) {
        return read_json_gz(path);
    }

    let reader = open_reader(path)?;
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| io_err(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line).map_err(|e| format_err(path, e))?);
    }
    Ok(records)
}

/// Write records in the layout selected by the suffix of `path`.
pub fn write_records<T: Serialize>(
    path: &Path,
    records: &[T],
) -> TWResult<()> {
    if !is_jsonl_path(path) {
        return write_json_gz(path, records);
    }

    let mut encoder = create_encoder(path)?;
    for record in records {
        serde_json::to_writer(&mut encoder, record).map_err(|e| format_err(path, e))?;
        encoder.write_all(b"\n").map_err(|e| io_err(path, e))?;
    }
    let mut writer = encoder.finish().map_err(|e| io_err(path, e))?;
    writer.flush().map_err(|e| io_err(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempdir::TempDir;

    use super::*;

    #[test]
    fn test_jsonl_detection() {
        assert!(is_jsonl_path(Path::new("a/b/file.jsonl.gz")));
        assert!(!is_jsonl_path(Path::new("a/b/file.json.gz")));
        assert!(!is_jsonl_path(Path::new("chunk_0000.json.gz")));
    }

    #[test]
    fn test_records_in_both_layouts() -> TWResult<()> {
        let tmpdir = TempDir::new("typewright-io-test")?;

        let records: Vec<BTreeMap<String, u32>> = (0..3)
            .map(|i| BTreeMap::from([("value".to_string(), i)]))
            .collect();

        for name in ["records.json.gz", "records.jsonl.gz"] {
            let path = tmpdir.path().join(name);
            write_records(&path, &records)?;
            let back: Vec<BTreeMap<String, u32>> = read_records(&path)?;
            assert_eq!(back, records);
        }

        Ok(())
    }

    #[test]
    fn test_missing_file_names_the_path() {
        let err = read_json_gz::<u32>(Path::new("/definitely/not/here.json.gz")).unwrap_err();
        match err {
            TypewrightError::DataFile { path, .. } => {
                assert_eq!(path, Path::new("/definitely/not/here.json.gz"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_file_is_a_format_error() -> TWResult<()> {
        let tmpdir = TempDir::new("typewright-io-test")?;
        let path = tmpdir.path().join("bad.json.gz");
        write_json_gz(&path, "not a list")?;

        let err = read_records::<u32>(&path).unwrap_err();
        assert!(matches!(err, TypewrightError::DataFormat { .. }));
        Ok(())
    }
}
