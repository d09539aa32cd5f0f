mod clean;
mod encoding;
mod hwpx;
mod row;
mod table;

pub use clean::clean_text;
pub use encoding::{decode_text_bytes, DecodedText};
pub use hwpx::{read_hwpx, HwpxDocument, HwpxError, HwpxTableStub};
pub use row::{normalize_cell, row_sentence, NormalizedCell};
pub use table::{normalize_table, NormalizedTable, TableShape};
