//! # Data File Discovery and Partitioning

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::errors::{TWResult, TypewrightError};

/// The suffix shared by every raw data file.
pub const RAW_FILE_SUFFIX: &str = ".gz";

/// The file name of the metadata summary written beside chunk files.
pub const METADATA_FILE_NAME: &str = "metadata.json.gz";

/// The 0-pad width of chunk indices.
pub const CHUNK_INDEX_PAD_WIDTH: usize = 4;

/// Construct the file name of the chunk at `index`.
///
/// ```
/// assert_eq!(typewright::io::chunk_file_name(7), "chunk_0007.json.gz");
/// ```
pub fn chunk_file_name(index: usize) -> String {
    format!("chunk_{index:0width$}.json.gz", width = CHUNK_INDEX_PAD_WIDTH)
}

/// List the raw data files of `data_dir`, sorted by path.
///
/// ## Arguments
/// * `data_dir` - the directory to scan (not recursive).
/// * `max_num_files` - keep only the first `n` files.
pub fn get_data_files_from_directory(
    data_dir: &Path,
    max_num_files: Option<usize>,
) -> TWResult<Vec<PathBuf>> {
    let io_err = |source| TypewrightError::DataFile {
        path: data_dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(data_dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        let is_raw = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(RAW_FILE_SUFFIX) && n != METADATA_FILE_NAME)
            .unwrap_or(false);
        if entry.file_type().map_err(io_err)?.is_file() && is_raw {
            paths.push(path);
        }
    }

    paths.sort();
    if let Some(n) = max_num_files {
        paths.truncate(n);
    }
    Ok(paths)
}

/// Group files, in order, into partitions of roughly `max_bytes` each.
///
/// A partition is closed as soon as its cumulative size exceeds `max_bytes`,
/// so every partition holds at least one file and only the last may be small.
pub fn partition_files_by_size(
    paths: &[PathBuf],
    max_bytes: u64,
) -> TWResult<Vec<Vec<PathBuf>>> {
    let mut partitions = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0u64;

    for path in paths {
        let size = fs::metadata(path)
            .map_err(|source| TypewrightError::DataFile {
                path: path.clone(),
                source,
            })?
            .len();

        current.push(path.clone());
        current_size += size;
        if current_size > max_bytes {
            partitions.push(std::mem::take(&mut current));
            current_size = 0;
        }
    }

    if !current.is_empty() {
        partitions.push(current);
    }
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use tempdir::TempDir;

    use super::*;

    fn write_bytes(
        path: &Path,
        n: usize,
    ) {
        let mut f = File::create(path).unwrap();
        f.write_all(&vec![b'x'; n]).unwrap();
    }

    #[test]
    fn test_chunk_file_name() {
        assert_eq!(chunk_file_name(0), "chunk_0000.json.gz");
        assert_eq!(chunk_file_name(312), "chunk_0312.json.gz");
        assert_eq!(chunk_file_name(12345), "chunk_12345.json.gz");
    }

    #[test]
    fn test_get_data_files_from_directory() -> TWResult<()> {
        let tmpdir = TempDir::new("typewright-files-test")?;
        let dir = tmpdir.path();

        for name in ["b.jsonl.gz", "a.jsonl.gz", "c.json.gz", "notes.txt", METADATA_FILE_NAME] {
            write_bytes(&dir.join(name), 4);
        }
        fs::create_dir(dir.join("sub.gz"))?;

        let all = get_data_files_from_directory(dir, None)?;
        assert_eq!(
            all,
            vec![dir.join("a.jsonl.gz"), dir.join("b.jsonl.gz"), dir.join("c.json.gz")]
        );

        let two = get_data_files_from_directory(dir, Some(2))?;
        assert_eq!(two, vec![dir.join("a.jsonl.gz"), dir.join("b.jsonl.gz")]);
        Ok(())
    }

    #[test]
    fn test_partition_files_by_size() -> TWResult<()> {
        let tmpdir = TempDir::new("typewright-files-test")?;
        let dir = tmpdir.path();

        let sizes = [30, 30, 50, 10, 5];
        let paths: Vec<PathBuf> = sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let p = dir.join(format!("f{i}.gz"));
                write_bytes(&p, n);
                p
            })
            .collect();

        let partitions = partition_files_by_size(&paths, 50)?;
        assert_eq!(
            partitions,
            vec![
                vec![paths[0].clone(), paths[1].clone()],
                vec![paths[2].clone(), paths[3].clone()],
                vec![paths[4].clone()],
            ]
        );

        assert!(partition_files_by_size(&[], 50)?.is_empty());
        Ok(())
    }
}
