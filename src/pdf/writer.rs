//! Incremental-update writer for signature embedding.
//!
//! Appends a signature dictionary, a widget annotation with its appearance
//! stream, and redefinitions of the page and catalog (plus any indirect
//! /Annots or /AcroForm objects touched), followed by a classic xref section
//! whose trailer chains to the original via /Prev. The original bytes are
//! never modified, only extended.

use chrono::{DateTime, Local};
use log::debug;

use super::document::{dict_slice, find_sub, PdfDocument};
use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::signing::byterange::ByteRangeCalculator;

/// Fixed-width /ByteRange placeholder, patched in place once offsets are
/// final.
const BYTE_RANGE_PAD: &str = "[0 0000000000 0000000000 0000000000]";

/// Everything the writer needs to lay out the signature field.
#[derive(Debug, Clone)]
pub struct SignatureFieldSpec {
    /// 1-based page carrying the visible stamp
    pub page: usize,
    /// Stamp rectangle in page space
    pub rect: Rect,
    /// AcroForm field name, e.g. "Signature1"
    pub field_name: String,
    /// /Name entry of the signature dictionary
    pub signer_name: String,
    /// /Reason entry
    pub reason: String,
    /// /Location entry
    pub location: String,
    /// Text lines of the visible stamp
    pub appearance_lines: Vec<String>,
    /// Size of the /Contents placeholder (hex digits plus angle brackets)
    pub placeholder_size: usize,
}

/// A document with the signature field appended and /ByteRange patched,
/// awaiting the actual signature bytes.
pub struct PreparedPdf {
    /// Complete output bytes with a zeroed /Contents placeholder
    pub bytes: Vec<u8>,
    /// Offset of the placeholder's opening `<`
    pub contents_offset: usize,
    /// Placeholder length including both angle brackets
    pub placeholder_len: usize,
    /// The patched ByteRange
    pub byte_range: [i64; 4],
}

/// Append the signature field to `doc` and return the prepared bytes.
pub fn prepare_signature_update(
    doc: &PdfDocument,
    spec: &SignatureFieldSpec,
) -> Result<PreparedPdf> {
    if spec.placeholder_size < 4 {
        return Err(Error::InvalidPdf("signature placeholder too small".to_string()));
    }

    let page_num = doc.page_object(spec.page)?;
    let page_gen = doc.object_generation(page_num);
    let root = doc.root();

    let mut out = doc.bytes().to_vec();
    if out.last() != Some(&b'\n') {
        out.push(b'\n');
    }

    let sig_num = doc.max_object() + 1;
    let annot_num = sig_num + 1;
    let ap_num = sig_num + 2;
    let font_num = sig_num + 3;

    // (number, generation, offset)
    let mut entries: Vec<(u32, u16, usize)> = Vec::new();

    // Signature dictionary
    let sig_body = format!(
        "<< /Type /Sig\n/Filter /Adobe.PPKLite\n/SubFilter /adbe.pkcs7.detached\n\
         /ByteRange {}\n/Contents <{}>\n/Name ({})\n/Reason ({})\n/Location ({})\n/M ({}) >>",
        BYTE_RANGE_PAD,
        "0".repeat(spec.placeholder_size - 2),
        escape_pdf_string(&spec.signer_name),
        escape_pdf_string(&spec.reason),
        escape_pdf_string(&spec.location),
        format_pdf_date(Local::now()),
    );
    let sig_offset = append_object(&mut out, sig_num, 0, sig_body.as_bytes());
    entries.push((sig_num, 0, sig_offset));

    let byte_range_offset = find_sub(&out, BYTE_RANGE_PAD.as_bytes(), sig_offset)
        .ok_or_else(|| Error::InvalidPdf("lost ByteRange placeholder".to_string()))?;
    let contents_offset = find_sub(&out, b"/Contents <", sig_offset)
        .map(|p| p + b"/Contents ".len())
        .ok_or_else(|| Error::InvalidPdf("lost Contents placeholder".to_string()))?;

    // Widget annotation
    let rect_str = format!(
        "[{:.2} {:.2} {:.2} {:.2}]",
        spec.rect.left(),
        spec.rect.bottom(),
        spec.rect.right(),
        spec.rect.top()
    );
    let annot_body = format!(
        "<< /Type /Annot /Subtype /Widget /FT /Sig /T ({}) /F 132 /P {} {} R \
         /Rect {} /V {} 0 R /AP << /N {} 0 R >> /DA (/Helv 0 Tf 0 g) >>",
        escape_pdf_string(&spec.field_name),
        page_num,
        page_gen,
        rect_str,
        sig_num,
        ap_num,
    );
    let offset = append_object(&mut out, annot_num, 0, annot_body.as_bytes());
    entries.push((annot_num, 0, offset));

    // Appearance stream
    let content = appearance_content(&spec.rect, &spec.appearance_lines);
    let ap_body = format!(
        "<< /Type /XObject /Subtype /Form /FormType 1 /BBox [0 0 {:.2} {:.2}] \
         /Resources << /Font << /Helv {} 0 R >> >> /Length {} >>\nstream\n{}\nendstream",
        spec.rect.width,
        spec.rect.height,
        font_num,
        content.len(),
        content,
    );
    let offset = append_object(&mut out, ap_num, 0, ap_body.as_bytes());
    entries.push((ap_num, 0, offset));

    let font_body =
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>";
    let offset = append_object(&mut out, font_num, 0, font_body.as_bytes());
    entries.push((font_num, 0, offset));

    // Hook the annotation into the page
    let annot_ref = format!("{} 0 R", annot_num);
    let page_dict = doc
        .object_dict(page_num)
        .ok_or_else(|| Error::InvalidPdf("page object has no dictionary".to_string()))?;
    match locate_array_key(page_dict, b"/Annots")? {
        ArrayKey::Inline(open) => {
            let new_dict = insert_into_array(page_dict, open, &annot_ref)?;
            let offset = append_object(&mut out, page_num, page_gen, &new_dict);
            entries.push((page_num, page_gen, offset));
        },
        ArrayKey::Indirect(arr_num) => {
            let body = doc
                .object_body(arr_num)
                .ok_or_else(|| Error::InvalidPdf("missing /Annots array object".to_string()))?;
            let open = find_sub(body, b"[", 0)
                .ok_or_else(|| Error::InvalidPdf("/Annots object is not an array".to_string()))?;
            let new_body = insert_into_array(body, open, &annot_ref)?;
            let gen = doc.object_generation(arr_num);
            let offset = append_object(&mut out, arr_num, gen, new_body.trim_ascii());
            entries.push((arr_num, gen, offset));
        },
        ArrayKey::Absent => {
            let insert = format!("/Annots [{}] ", annot_ref);
            let new_dict = insert_before_dict_close(page_dict, &insert)?;
            let offset = append_object(&mut out, page_num, page_gen, &new_dict);
            entries.push((page_num, page_gen, offset));
        },
    }

    // Hook the field into the catalog's AcroForm
    let cat_dict = doc
        .object_dict(root.number)
        .ok_or_else(|| Error::InvalidPdf("catalog has no dictionary".to_string()))?;
    match locate_acroform(cat_dict)? {
        AcroForm::Absent => {
            let insert = format!("/AcroForm << /Fields [{}] /SigFlags 3 >> ", annot_ref);
            let new_dict = insert_before_dict_close(cat_dict, &insert)?;
            let offset = append_object(&mut out, root.number, root.generation, &new_dict);
            entries.push((root.number, root.generation, offset));
        },
        AcroForm::Inline(start) => {
            // The subdict starts with `<<`, so the slice begins at `start`
            let sub = dict_slice(&cat_dict[start..])
                .ok_or_else(|| Error::InvalidPdf("unbalanced /AcroForm dictionary".to_string()))?;
            let new_sub = add_field_to_acroform(sub, &annot_ref)?;
            let mut new_dict = Vec::with_capacity(cat_dict.len() + new_sub.len());
            new_dict.extend_from_slice(&cat_dict[..start]);
            new_dict.extend_from_slice(&new_sub);
            new_dict.extend_from_slice(&cat_dict[start + sub.len()..]);
            let offset = append_object(&mut out, root.number, root.generation, &new_dict);
            entries.push((root.number, root.generation, offset));
        },
        AcroForm::Indirect(form_num) => {
            let form_dict = doc
                .object_dict(form_num)
                .ok_or_else(|| Error::InvalidPdf("missing /AcroForm object".to_string()))?;
            let new_dict = add_field_to_acroform(form_dict, &annot_ref)?;
            let gen = doc.object_generation(form_num);
            let offset = append_object(&mut out, form_num, gen, &new_dict);
            entries.push((form_num, gen, offset));
        },
    }

    // Cross-reference section for the update
    entries.sort_by_key(|e| e.0);
    let xref_offset = out.len();
    out.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \n");
    let mut i = 0;
    while i < entries.len() {
        let mut j = i;
        while j + 1 < entries.len() && entries[j + 1].0 == entries[j].0 + 1 {
            j += 1;
        }
        out.extend_from_slice(format!("{} {}\n", entries[i].0, j - i + 1).as_bytes());
        for entry in &entries[i..=j] {
            out.extend_from_slice(format!("{:010} {:05} n \n", entry.2, entry.1).as_bytes());
        }
        i = j + 1;
    }

    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root {} {} R /Prev {} >>\nstartxref\n{}\n%%EOF\n",
            font_num + 1,
            root.number,
            root.generation,
            doc.last_startxref(),
            xref_offset,
        )
        .as_bytes(),
    );

    // Offsets are final; patch the ByteRange
    let calc = ByteRangeCalculator::with_placeholder_size(spec.placeholder_size);
    let byte_range = calc.calculate_byte_range(out.len(), contents_offset);
    ByteRangeCalculator::patch_byte_range(
        &mut out,
        byte_range_offset,
        BYTE_RANGE_PAD.len(),
        &byte_range,
    )?;

    debug!(
        "Prepared incremental update: {} -> {} bytes, signature object {}",
        doc.bytes().len(),
        out.len(),
        sig_num
    );

    Ok(PreparedPdf {
        bytes: out,
        contents_offset,
        placeholder_len: spec.placeholder_size,
        byte_range,
    })
}

fn append_object(out: &mut Vec<u8>, number: u32, generation: u16, body: &[u8]) -> usize {
    let offset = out.len();
    out.extend_from_slice(format!("{} {} obj\n", number, generation).as_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(b"\nendobj\n");
    offset
}

fn appearance_content(rect: &Rect, lines: &[String]) -> String {
    let mut content = String::from("q 0 g BT /Helv 8 Tf 9.5 TL 4 ");
    content.push_str(&format!("{:.1} Td\n", rect.height - 12.0));
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            content.push_str("T* ");
        }
        content.push_str(&format!("({}) Tj\n", escape_pdf_string(line)));
    }
    content.push_str("ET Q");
    content
}

enum ArrayKey {
    /// Key holds an inline array; position of its `[`
    Inline(usize),
    /// Key holds an indirect reference to an array object
    Indirect(u32),
    Absent,
}

enum AcroForm {
    /// Inline dictionary; position of its `<<` within the catalog dict
    Inline(usize),
    Indirect(u32),
    Absent,
}

fn key_position(dict: &[u8], key: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(pos) = find_sub(dict, key, from) {
        let next = dict.get(pos + key.len());
        // Reject longer names sharing the prefix, e.g. /AnnotsFoo
        let is_delim = match next {
            None => true,
            Some(b) => !b.is_ascii_alphanumeric(),
        };
        if is_delim {
            return Some(pos);
        }
        from = pos + key.len();
    }
    None
}

fn skip_ws(src: &[u8], mut i: usize) -> usize {
    while i < src.len() && src[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn parse_indirect_ref(src: &[u8], mut i: usize) -> Option<u32> {
    let start = i;
    while i < src.len() && src[i].is_ascii_digit() {
        i += 1;
    }
    if i == start {
        return None;
    }
    let number: u32 = std::str::from_utf8(&src[start..i]).ok()?.parse().ok()?;
    i = skip_ws(src, i);
    let gen_start = i;
    while i < src.len() && src[i].is_ascii_digit() {
        i += 1;
    }
    if i == gen_start {
        return None;
    }
    i = skip_ws(src, i);
    if src.get(i) == Some(&b'R') {
        Some(number)
    } else {
        None
    }
}

fn locate_array_key(dict: &[u8], key: &[u8]) -> Result<ArrayKey> {
    let Some(pos) = key_position(dict, key) else {
        return Ok(ArrayKey::Absent);
    };
    let i = skip_ws(dict, pos + key.len());
    if dict.get(i) == Some(&b'[') {
        return Ok(ArrayKey::Inline(i));
    }
    if let Some(number) = parse_indirect_ref(dict, i) {
        return Ok(ArrayKey::Indirect(number));
    }
    Err(Error::InvalidPdf(format!(
        "unsupported {} value",
        String::from_utf8_lossy(key)
    )))
}

fn locate_acroform(dict: &[u8]) -> Result<AcroForm> {
    let Some(pos) = key_position(dict, b"/AcroForm") else {
        return Ok(AcroForm::Absent);
    };
    let i = skip_ws(dict, pos + b"/AcroForm".len());
    if dict.len() > i + 1 && &dict[i..i + 2] == b"<<" {
        return Ok(AcroForm::Inline(i));
    }
    if let Some(number) = parse_indirect_ref(dict, i) {
        return Ok(AcroForm::Indirect(number));
    }
    Err(Error::InvalidPdf("unsupported /AcroForm value".to_string()))
}

/// Insert ` item` before the `]` matching the `[` at `open`.
fn insert_into_array(src: &[u8], open: usize, item: &str) -> Result<Vec<u8>> {
    let mut depth = 0usize;
    for i in open..src.len() {
        match src[i] {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    let mut out = Vec::with_capacity(src.len() + item.len() + 1);
                    out.extend_from_slice(&src[..i]);
                    out.extend_from_slice(b" ");
                    out.extend_from_slice(item.as_bytes());
                    out.extend_from_slice(&src[i..]);
                    return Ok(out);
                }
            },
            _ => {},
        }
    }
    Err(Error::InvalidPdf("unbalanced array".to_string()))
}

/// Insert `text` before the dictionary's closing `>>`.
fn insert_before_dict_close(dict: &[u8], text: &str) -> Result<Vec<u8>> {
    if dict.len() < 4 || !dict.ends_with(b">>") {
        return Err(Error::InvalidPdf("malformed dictionary".to_string()));
    }
    let close = dict.len() - 2;
    let mut out = Vec::with_capacity(dict.len() + text.len());
    out.extend_from_slice(&dict[..close]);
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(&dict[close..]);
    Ok(out)
}

/// Add a field reference to an AcroForm dictionary, creating /Fields and
/// /SigFlags as needed.
fn add_field_to_acroform(dict: &[u8], field_ref: &str) -> Result<Vec<u8>> {
    let mut out = match locate_array_key(dict, b"/Fields")? {
        ArrayKey::Inline(open) => insert_into_array(dict, open, field_ref)?,
        ArrayKey::Absent => {
            insert_before_dict_close(dict, &format!("/Fields [{}] ", field_ref))?
        },
        ArrayKey::Indirect(_) => {
            // Rare layout; redefining a shared fields array from here would
            // need another object append, so refuse loudly instead of
            // corrupting the form.
            return Err(Error::InvalidPdf(
                "indirect /Fields arrays are not supported".to_string(),
            ));
        },
    };
    if key_position(&out, b"/SigFlags").is_none() {
        out = insert_before_dict_close(&out, "/SigFlags 3 ")?;
    }
    Ok(out)
}

/// Escape special characters in a PDF literal string.
fn escape_pdf_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 10);
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '(' => result.push_str("\\("),
            ')' => result.push_str("\\)"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a date as a PDF date string with timezone offset.
fn format_pdf_date(now: DateTime<Local>) -> String {
    let seconds = now.offset().local_minus_utc();
    let sign = if seconds >= 0 { '+' } else { '-' };
    let seconds = seconds.abs();
    format!(
        "D:{}{}{:02}'{:02}'",
        now.format("%Y%m%d%H%M%S"),
        sign,
        seconds / 3600,
        (seconds % 3600) / 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_doc() -> PdfDocument {
        let bytes = b"%PDF-1.4\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n\
3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>\nendobj\n\
xref\n0 4\n\
trailer\n<< /Size 4 /Root 1 0 R >>\nstartxref\n9\n%%EOF\n";
        PdfDocument::from_bytes(bytes.to_vec()).unwrap()
    }

    fn spec() -> SignatureFieldSpec {
        SignatureFieldSpec {
            page: 1,
            rect: Rect::new(100.0, 100.0, 150.0, 50.0),
            field_name: "Signature1".to_string(),
            signer_name: "Jane Doe".to_string(),
            reason: "Approval".to_string(),
            location: "San Jose".to_string(),
            appearance_lines: vec!["Signed by: Jane Doe".to_string()],
            placeholder_size: 100,
        }
    }

    #[test]
    fn test_prepare_keeps_original_prefix() {
        let doc = minimal_doc();
        let original = doc.bytes().to_vec();
        let prepared = prepare_signature_update(&doc, &spec()).unwrap();
        assert!(prepared.bytes.starts_with(&original));
        assert!(prepared.bytes.ends_with(b"%%EOF\n"));
    }

    #[test]
    fn test_byte_range_is_consistent() {
        let doc = minimal_doc();
        let prepared = prepare_signature_update(&doc, &spec()).unwrap();
        let [zero, before, after, rest] = prepared.byte_range;
        assert_eq!(zero, 0);
        assert_eq!(before as usize, prepared.contents_offset);
        assert_eq!(after as usize, prepared.contents_offset + prepared.placeholder_len);
        assert_eq!((after + rest) as usize, prepared.bytes.len());
        assert_eq!(prepared.bytes[prepared.contents_offset], b'<');
        assert_eq!(
            prepared.bytes[prepared.contents_offset + prepared.placeholder_len - 1],
            b'>'
        );
    }

    #[test]
    fn test_update_contains_signature_structure() {
        let doc = minimal_doc();
        let prepared = prepare_signature_update(&doc, &spec()).unwrap();
        let text = String::from_utf8_lossy(&prepared.bytes);
        assert!(text.contains("/Type /Sig"));
        assert!(text.contains("/SubFilter /adbe.pkcs7.detached"));
        assert!(text.contains("/AcroForm << /Fields [5 0 R] /SigFlags 3 >>"));
        assert!(text.contains("/Annots [5 0 R]"));
        assert!(text.contains("/Prev 9"));
    }

    #[test]
    fn test_inline_annots_array_is_extended() {
        let bytes = b"%PDF-1.4\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n\
3 0 obj\n<< /Type /Page /Parent 2 0 R /Annots [7 0 R] /MediaBox [0 0 612 792] >>\nendobj\n\
7 0 obj\n<< /Type /Annot /Subtype /Text >>\nendobj\n\
trailer\n<< /Size 8 /Root 1 0 R >>\nstartxref\n9\n%%EOF\n";
        let doc = PdfDocument::from_bytes(bytes.to_vec()).unwrap();
        let prepared = prepare_signature_update(&doc, &spec()).unwrap();
        let text = String::from_utf8_lossy(&prepared.bytes);
        assert!(text.contains("/Annots [7 0 R 9 0 R]"));
    }

    #[test]
    fn test_escape_pdf_string() {
        assert_eq!(escape_pdf_string("Hello"), "Hello");
        assert_eq!(escape_pdf_string("Hello (World)"), "Hello \\(World\\)");
        assert_eq!(escape_pdf_string("Line1\nLine2"), "Line1\\nLine2");
        assert_eq!(escape_pdf_string("Path\\to\\file"), "Path\\\\to\\\\file");
    }

    #[test]
    fn test_format_pdf_date_shape() {
        let date = format_pdf_date(Local::now());
        assert!(date.starts_with("D:"));
        assert!(date.contains('\''));
        assert_eq!(date.len(), "D:YYYYMMDDHHMMSS+HH'mm'".len());
    }
}
