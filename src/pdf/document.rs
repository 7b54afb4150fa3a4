//! Lightweight PDF reader: object spans, trailer references, page lookup.

use std::collections::HashMap;
use std::path::Path;

use lazy_static::lazy_static;
use log::debug;
use regex::bytes::Regex;

use crate::error::{Error, Result};

lazy_static! {
    static ref OBJ_HEADER: Regex =
        Regex::new(r"(?m)^[ \t]*(\d{1,10})[ \t]+(\d{1,5})[ \t]+obj\b").unwrap();
    static ref ROOT_REF: Regex = Regex::new(r"/Root[ \t\r\n]+(\d+)[ \t\r\n]+(\d+)[ \t\r\n]+R").unwrap();
    static ref ENCRYPT_REF: Regex = Regex::new(r"/Encrypt[ \t\r\n]+\d+[ \t\r\n]+\d+[ \t\r\n]+R").unwrap();
    static ref PAGE_TYPE: Regex = Regex::new(r"/Type[ \t\r\n]*/Page([^s]|$)").unwrap();
}

/// An indirect object reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjRef {
    pub number: u32,
    pub generation: u16,
}

#[derive(Debug, Clone, Copy)]
struct ObjSpan {
    start: usize,
    end: usize,
    generation: u16,
}

/// A loaded PDF with the structure needed to append a signature update.
#[derive(Debug)]
pub struct PdfDocument {
    bytes: Vec<u8>,
    root: ObjRef,
    last_startxref: usize,
    max_object: u32,
    pages: Vec<u32>,
    objects: HashMap<u32, ObjSpan>,
}

impl PdfDocument {
    /// Load a PDF from disk.
    ///
    /// Rejects non-PDF bytes and encrypted documents; both are
    /// [`Error::InvalidPdf`]. A missing path is [`Error::NotFound`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::NotFound(path.display().to_string()));
        }
        Self::from_bytes(std::fs::read(path)?)
    }

    /// Parse a PDF from raw bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if !bytes.starts_with(b"%PDF-") {
            return Err(Error::InvalidPdf("missing %PDF- header".to_string()));
        }

        // Coarse scan; good enough to refuse documents we cannot sign
        if ENCRYPT_REF.is_match(&bytes) {
            return Err(Error::InvalidPdf(
                "encrypted documents are not supported".to_string(),
            ));
        }

        let last_startxref = find_last_startxref(&bytes)?;
        let root = find_root_ref(&bytes)?;

        let mut objects = HashMap::new();
        let mut pages = Vec::new();
        let mut max_object = 0u32;

        // Stream bodies can contain anything, including text shaped like an
        // object header; matches inside them are not real objects
        let streams = stream_interiors(&bytes);

        for caps in OBJ_HEADER.captures_iter(&bytes) {
            let Some(whole) = caps.get(0) else { continue };
            if streams
                .iter()
                .any(|&(start, end)| whole.start() >= start && whole.start() < end)
            {
                continue;
            }
            let number: u32 = parse_ascii_num(&caps[1]);
            let generation: u16 = parse_ascii_num(&caps[2]) as u16;

            let body_start = whole.end();
            let end = find_sub(&bytes, b"endobj", body_start)
                .map(|p| p + b"endobj".len())
                .unwrap_or(bytes.len());

            max_object = max_object.max(number);
            // Later definitions of the same number win (incremental updates)
            objects.insert(
                number,
                ObjSpan {
                    start: whole.start(),
                    end,
                    generation,
                },
            );

            if let Some(dict) = dict_slice(&bytes[body_start..end]) {
                if PAGE_TYPE.is_match(dict) && !pages.contains(&number) {
                    pages.push(number);
                }
            }
        }

        if objects.is_empty() {
            return Err(Error::InvalidPdf("no indirect objects found".to_string()));
        }
        if pages.is_empty() {
            return Err(Error::InvalidPdf("no page objects found".to_string()));
        }

        debug!(
            "Loaded PDF: {} object(s), {} page(s), root {} {} R",
            objects.len(),
            pages.len(),
            root.number,
            root.generation
        );

        Ok(Self {
            bytes,
            root,
            last_startxref,
            max_object,
            pages,
            objects,
        })
    }

    /// Raw document bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Catalog reference from the trailer.
    pub fn root(&self) -> ObjRef {
        self.root
    }

    /// Offset of the previous xref section, for the /Prev trailer entry.
    pub fn last_startxref(&self) -> usize {
        self.last_startxref
    }

    /// Highest object number in use.
    pub fn max_object(&self) -> u32 {
        self.max_object
    }

    /// Number of page objects discovered.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Object number of a 1-based page. Pages are ordered by definition
    /// order in the file, which matches page order for linearly written
    /// documents.
    pub fn page_object(&self, page: usize) -> Result<u32> {
        if page == 0 || page > self.pages.len() {
            return Err(Error::InvalidPdf(format!(
                "page {} out of range (document has {} page(s))",
                page,
                self.pages.len()
            )));
        }
        Ok(self.pages[page - 1])
    }

    /// Generation number of an existing object (0 when unknown).
    pub fn object_generation(&self, number: u32) -> u16 {
        self.objects.get(&number).map(|s| s.generation).unwrap_or(0)
    }

    /// Dictionary source (including `<<`/`>>`) of an object, if it has one.
    pub fn object_dict(&self, number: u32) -> Option<&[u8]> {
        let span = self.objects.get(&number)?;
        let body_start = find_sub(&self.bytes[span.start..span.end], b"obj", 0)? + 3;
        dict_slice(&self.bytes[span.start + body_start..span.end])
    }

    /// Full body of an object between its header and `endobj`.
    pub fn object_body(&self, number: u32) -> Option<&[u8]> {
        let span = self.objects.get(&number)?;
        let slice = &self.bytes[span.start..span.end];
        let body_start = find_sub(slice, b"obj", 0)? + 3;
        let body_end = slice.len().saturating_sub(b"endobj".len());
        Some(&slice[body_start..body_end])
    }
}

fn parse_ascii_num(digits: &[u8]) -> u32 {
    // Matched by \d+, so this cannot fail except by overflow
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Byte-wise substring search.
pub(crate) fn find_sub(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Slice of the first balanced `<< ... >>` in `src`.
pub(crate) fn dict_slice(src: &[u8]) -> Option<&[u8]> {
    let start = find_sub(src, b"<<", 0)?;
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < src.len() {
        if &src[i..i + 2] == b"<<" {
            depth += 1;
            i += 2;
        } else if &src[i..i + 2] == b">>" {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return Some(&src[start..i]);
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Interiors of `stream ... endstream` sections. The `stream` keyword inside
/// `endstream` is skipped by checking the preceding bytes.
fn stream_interiors(bytes: &[u8]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut from = 0;
    while let Some(pos) = find_sub(bytes, b"stream", from) {
        if pos >= 3 && &bytes[pos - 3..pos] == b"end" {
            from = pos + b"stream".len();
            continue;
        }
        let body = pos + b"stream".len();
        match find_sub(bytes, b"endstream", body) {
            Some(end) => {
                ranges.push((body, end));
                from = end + b"endstream".len();
            },
            None => break,
        }
    }
    ranges
}

fn find_last_startxref(bytes: &[u8]) -> Result<usize> {
    let pos = rfind_sub(bytes, b"startxref")
        .ok_or_else(|| Error::InvalidPdf("missing startxref".to_string()))?;
    let tail = &bytes[pos + b"startxref".len()..];
    let digits: Vec<u8> = tail
        .iter()
        .copied()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .collect();
    std::str::from_utf8(&digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::InvalidPdf("unreadable startxref offset".to_string()))
}

fn find_root_ref(bytes: &[u8]) -> Result<ObjRef> {
    let caps = ROOT_REF
        .captures_iter(bytes)
        .last()
        .ok_or_else(|| Error::InvalidPdf("missing /Root reference".to_string()))?;
    Ok(ObjRef {
        number: parse_ascii_num(&caps[1]),
        generation: parse_ascii_num(&caps[2]) as u16,
    })
}

fn rfind_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).rev().find(|&i| &haystack[i..i + needle.len()] == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &[u8] = b"%PDF-1.4\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n\
3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>\nendobj\n\
xref\n0 4\n\
trailer\n<< /Size 4 /Root 1 0 R >>\nstartxref\n123\n%%EOF\n";

    #[test]
    fn test_parses_minimal_document() {
        let doc = PdfDocument::from_bytes(MINIMAL.to_vec()).unwrap();
        assert_eq!(doc.root(), ObjRef { number: 1, generation: 0 });
        assert_eq!(doc.max_object(), 3);
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.page_object(1).unwrap(), 3);
        assert_eq!(doc.last_startxref(), 123);
    }

    #[test]
    fn test_pages_node_is_not_a_page() {
        let doc = PdfDocument::from_bytes(MINIMAL.to_vec()).unwrap();
        assert_eq!(doc.page_object(1).unwrap(), 3);
        assert!(doc.page_object(2).is_err());
    }

    #[test]
    fn test_page_out_of_range() {
        let doc = PdfDocument::from_bytes(MINIMAL.to_vec()).unwrap();
        assert!(doc.page_object(0).is_err());
        assert!(doc.page_object(5).is_err());
    }

    #[test]
    fn test_rejects_non_pdf() {
        let err = PdfDocument::from_bytes(b"hello".to_vec()).unwrap_err();
        assert!(matches!(err, Error::InvalidPdf(_)));
    }

    #[test]
    fn test_rejects_encrypted() {
        let mut bytes = MINIMAL.to_vec();
        let insert = b"/Encrypt 9 0 R ".to_vec();
        let pos = find_sub(&bytes, b"/Size", 0).unwrap();
        bytes.splice(pos..pos, insert);
        let err = PdfDocument::from_bytes(bytes).unwrap_err();
        assert!(format!("{}", err).contains("encrypted"));
    }

    #[test]
    fn test_object_header_inside_stream_is_ignored() {
        let bytes = b"%PDF-1.4\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n\
3 0 obj\n<< /Type /Page /Parent 2 0 R >>\nendobj\n\
4 0 obj\n<< /Length 35 >>\nstream\n\
99 0 obj\n<< /Type /Page >>\nendobj\n\
endstream\nendobj\n\
trailer\n<< /Size 5 /Root 1 0 R >>\nstartxref\n9\n%%EOF\n"
            .to_vec();
        let doc = PdfDocument::from_bytes(bytes).unwrap();
        assert_eq!(doc.max_object(), 4);
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.page_object(1).unwrap(), 3);
    }

    #[test]
    fn test_stream_interiors() {
        let src = b"a stream\nDATA\nendstream b stream\nMORE\nendstream c";
        let ranges = stream_interiors(src);
        assert_eq!(ranges.len(), 2);
        assert_eq!(&src[ranges[0].0..ranges[0].1], b"\nDATA\n");
        assert_eq!(&src[ranges[1].0..ranges[1].1], b"\nMORE\n");
    }

    #[test]
    fn test_object_dict_lookup() {
        let doc = PdfDocument::from_bytes(MINIMAL.to_vec()).unwrap();
        let dict = doc.object_dict(3).unwrap();
        assert!(dict.starts_with(b"<<"));
        assert!(dict.ends_with(b">>"));
        assert!(find_sub(dict, b"/MediaBox", 0).is_some());
    }

    #[test]
    fn test_dict_slice_nesting() {
        let src = b"<< /A << /B 1 >> /C 2 >> trailing";
        let dict = dict_slice(src).unwrap();
        assert_eq!(dict, b"<< /A << /B 1 >> /C 2 >>");
    }
}
