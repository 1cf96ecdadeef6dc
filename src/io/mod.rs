//! File I/O for the indexing path.
//!
//! Documents are read fully into memory before chunking; files above a
//! size threshold go through a read-only memory map.

mod reader;

pub use reader::{FileReader, read_file};
