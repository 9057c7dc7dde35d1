//! # File I/O
//!
//! Compressed record files, raw data discovery, and size-balanced partitioning.

mod compressed;
mod data_files;

#[doc(inline)]
pub use compressed::{
    is_jsonl_path,
    read_json_gz,
    read_records,
    write_json_gz,
    write_records,
};
#[doc(inline)]
pub use data_files::{
    CHUNK_INDEX_PAD_WIDTH,
    METADATA_FILE_NAME,
    RAW_FILE_SUFFIX,
    chunk_file_name,
    get_data_files_from_directory,
    partition_files_by_size,
};
