//! ByteRange handling for PDF signatures.
//!
//! A signed PDF carries a `/ByteRange [offset1 length1 offset2 length2]`
//! array describing the two spans covered by the signature; the hex-encoded
//! signature value between them is excluded. The placeholder for the value
//! is sized up front, so the ranges are known before the signature exists.

use crate::error::{Error, Result};

/// Calculator tying placeholder size, byte ranges and signature insertion
/// together.
#[derive(Debug)]
pub struct ByteRangeCalculator {
    /// Hex digits plus the two angle brackets
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Size the placeholder for a DER signature of `estimated_signature_size`
    /// bytes: each byte becomes two hex characters, plus `<` and `>`.
    pub fn new(estimated_signature_size: usize) -> Self {
        Self {
            placeholder_size: estimated_signature_size * 2 + 2,
        }
    }

    /// Use an exact placeholder size.
    pub fn with_placeholder_size(placeholder_size: usize) -> Self {
        Self { placeholder_size }
    }

    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// ByteRange for a file of `file_size` whose placeholder (including `<`)
    /// starts at `contents_offset`.
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [i64; 4] {
        let before_sig = contents_offset as i64;
        let after_sig_start = (contents_offset + self.placeholder_size) as i64;
        let after_sig_len = file_size as i64 - after_sig_start;
        [0, before_sig, after_sig_start, after_sig_len]
    }

    /// Concatenation of the two covered spans, the exact bytes the CMS
    /// signature is computed over.
    pub fn extract_signed_bytes(pdf_data: &[u8], byte_range: &[i64; 4]) -> Result<Vec<u8>> {
        let offset1 = byte_range[0] as usize;
        let length1 = byte_range[1] as usize;
        let offset2 = byte_range[2] as usize;
        let length2 = byte_range[3] as usize;

        if offset1 + length1 > pdf_data.len() {
            return Err(Error::InvalidPdf(format!(
                "ByteRange first range exceeds file size: {} + {} > {}",
                offset1,
                length1,
                pdf_data.len()
            )));
        }
        if offset2 + length2 > pdf_data.len() {
            return Err(Error::InvalidPdf(format!(
                "ByteRange second range exceeds file size: {} + {} > {}",
                offset2,
                length2,
                pdf_data.len()
            )));
        }

        let mut signed_bytes = Vec::with_capacity(length1 + length2);
        signed_bytes.extend_from_slice(&pdf_data[offset1..offset1 + length1]);
        signed_bytes.extend_from_slice(&pdf_data[offset2..offset2 + length2]);
        Ok(signed_bytes)
    }

    /// Overwrite a fixed-width ByteRange placeholder in place, padding with
    /// trailing spaces so the file length never changes.
    pub fn patch_byte_range(
        pdf_data: &mut [u8],
        offset: usize,
        width: usize,
        byte_range: &[i64; 4],
    ) -> Result<()> {
        let formatted = format!(
            "[0 {} {} {}]",
            byte_range[1], byte_range[2], byte_range[3]
        );
        if formatted.len() > width {
            return Err(Error::InvalidPdf(format!(
                "ByteRange text ({} chars) exceeds its placeholder ({} chars)",
                formatted.len(),
                width
            )));
        }
        if offset + width > pdf_data.len() {
            return Err(Error::InvalidPdf(
                "ByteRange patch would exceed file bounds".to_string(),
            ));
        }
        let mut padded = formatted.into_bytes();
        padded.resize(width, b' ');
        pdf_data[offset..offset + width].copy_from_slice(&padded);
        Ok(())
    }

    /// Write the DER signature into the placeholder, hex-encoded and
    /// zero-padded to the placeholder width.
    pub fn insert_signature(
        &self,
        pdf_data: &mut [u8],
        contents_offset: usize,
        signature: &[u8],
    ) -> Result<()> {
        let signature_hex = bytes_to_hex(signature);
        let sig_len = signature_hex.len() + 2;
        if sig_len > self.placeholder_size {
            return Err(Error::Signing(format!(
                "signature ({} chars) exceeds placeholder size ({} chars)",
                sig_len, self.placeholder_size
            )));
        }
        if contents_offset + self.placeholder_size > pdf_data.len() {
            return Err(Error::InvalidPdf(
                "signature insertion would exceed file bounds".to_string(),
            ));
        }

        let mut sig_value = String::with_capacity(self.placeholder_size);
        sig_value.push('<');
        sig_value.push_str(&signature_hex);
        for _ in 0..(self.placeholder_size - 2 - signature_hex.len()) {
            sig_value.push('0');
        }
        sig_value.push('>');

        pdf_data[contents_offset..contents_offset + self.placeholder_size]
            .copy_from_slice(sig_value.as_bytes());
        Ok(())
    }
}

impl Default for ByteRangeCalculator {
    fn default() -> Self {
        Self::new(crate::config::SigningConfig::default().estimated_signature_size)
    }
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8] = b"0123456789ABCDEF";
    let mut hex = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
        hex.push(HEX_CHARS[(byte & 0x0F) as usize] as char);
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_size() {
        // Hex doubles the byte count; the brackets add two
        assert_eq!(ByteRangeCalculator::new(8192).placeholder_size(), 16386);
        assert_eq!(ByteRangeCalculator::default().placeholder_size(), 16386);
    }

    #[test]
    fn test_calculate_byte_range_covers_whole_file() {
        let calc = ByteRangeCalculator::with_placeholder_size(50);
        let byte_range = calc.calculate_byte_range(2000, 1200);
        assert_eq!(byte_range, [0, 1200, 1250, 750]);
        // Spans plus placeholder account for every byte
        assert_eq!(
            byte_range[1] + 50 + byte_range[3],
            2000
        );
    }

    #[test]
    fn test_extract_signed_bytes_skips_placeholder() {
        let pdf_data = b"%PDF-1.4 /Contents <0000> trailer";
        // Placeholder "<0000>" occupies bytes 19..25
        let byte_range = [0, 19, 25, 8];
        let signed = ByteRangeCalculator::extract_signed_bytes(pdf_data, &byte_range).unwrap();
        assert_eq!(signed, b"%PDF-1.4 /Contents  trailer");
    }

    #[test]
    fn test_extract_rejects_out_of_bounds() {
        let pdf_data = b"short";
        assert!(ByteRangeCalculator::extract_signed_bytes(pdf_data, &[0, 5, 9, 4]).is_err());
        assert!(ByteRangeCalculator::extract_signed_bytes(pdf_data, &[0, 9, 0, 0]).is_err());
    }

    #[test]
    fn test_patch_byte_range_keeps_width() {
        let mut data = b"/ByteRange [0 0000000000 0000000000 0000000000] more".to_vec();
        let before = data.len();
        ByteRangeCalculator::patch_byte_range(&mut data, 11, 36, &[0, 593, 793, 120]).unwrap();
        assert_eq!(data.len(), before);
        let text = String::from_utf8(data).unwrap();
        assert!(text.contains("[0 593 793 120]"));
        // Space padding fills the rest of the placeholder
        assert!(text.ends_with(" more"));
        assert!(!text.contains('\0'));
    }

    #[test]
    fn test_insert_signature_pads_with_zeros() {
        let calc = ByteRangeCalculator::with_placeholder_size(10);
        let mut pdf_data = b"XX<00000000>YY".to_vec();
        calc.insert_signature(&mut pdf_data, 2, &[0xAB, 0xCD]).unwrap();
        assert_eq!(&pdf_data, b"XX<ABCD0000>YY");
    }

    #[test]
    fn test_insert_signature_too_large() {
        let calc = ByteRangeCalculator::with_placeholder_size(10);
        let mut pdf_data = b"XX<00000000>YY".to_vec();
        let result = calc.insert_signature(&mut pdf_data, 2, &[0u8; 5]);
        assert!(matches!(result, Err(Error::Signing(_))));
    }
}
