//! Source adapters: CSV decoding, sheet-backed table sources, student roster
//! mapping, and PDF roster reconstruction.

pub mod csv;
pub mod pdf;
pub mod roster;
pub mod source;

pub use self::csv::decode;
pub use pdf::{reconstruct, reconstruct_pdf, PdfError, PositionedToken, ReconstructConfig};
pub use roster::{students_from_rows, StudentColumns};
pub use source::{CsvSheetSource, TableSource};

pub const CRATE_NAME: &str = "acad-adapters";
