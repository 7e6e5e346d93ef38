//! CSV decoding and document assembly

mod assembler;
mod decoder;

pub use assembler::{AssemblyError, DocumentAssembler};
pub use decoder::{CsvDecoder, CsvRows};
