//! Bounds-checked cursors over caller-owned byte buffers.

mod reader;
mod writer;

pub use reader::Reader;
pub use writer::Writer;
