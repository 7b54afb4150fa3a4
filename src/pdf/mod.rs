//! Minimal PDF plumbing for signature embedding.
//!
//! Just enough structure awareness to append an incremental update carrying a
//! signature field: locate the trailer, the document catalog and the target
//! page, then write new objects after the original bytes so the input file's
//! content is never rewritten. Full object-graph parsing is deliberately out
//! of scope; signing only needs byte-accurate placement.

mod document;
mod writer;

pub use document::{ObjRef, PdfDocument};
pub use writer::{prepare_signature_update, PreparedPdf, SignatureFieldSpec};
