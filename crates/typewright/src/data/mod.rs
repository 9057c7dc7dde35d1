//! # Raw Data
//!
//! The raw sample format, annotation filtering, and vocabulary building.

mod raw_sample;
mod vocabulary;

#[doc(inline)]
pub use raw_sample::{
    IGNORED_TYPE_ANNOTATIONS,
    RawSample,
    Supernode,
    ignore_type_annotation,
    read_raw_samples,
    strip_type_parameters,
};
#[doc(inline)]
pub use vocabulary::{Counter, UNK_TOKEN, Vocabulary};
