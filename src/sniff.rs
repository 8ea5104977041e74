// src/sniff.rs

use serde::Serialize;

/// Coarse document kind detected from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Image,
    /// Not an error: callers branch on it and skip the document.
    Unknown,
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKind::Pdf => write!(f, "pdf"),
            FileKind::Image => write!(f, "image"),
            FileKind::Unknown => write!(f, "unknown"),
        }
    }
}

const IMAGE_SIGNATURES: &[&[u8]] = &[
    b"\xFF\xD8\xFF",        // jpeg
    b"\x89PNG\r\n\x1A\n",   // png
    b"GIF87a",
    b"GIF89a",
    b"BM",                  // bmp
];

/// Detect the file kind from the leading bytes of `bytes`.
pub fn detect(bytes: &[u8]) -> FileKind {
    if bytes.starts_with(b"%PDF") {
        return FileKind::Pdf;
    }

    if IMAGE_SIGNATURES.iter().any(|sig| bytes.starts_with(sig)) {
        return FileKind::Image;
    }

    // RIFF....WEBP
    if bytes.starts_with(b"RIFF") && bytes.len() >= 12 && &bytes[8..12] == b"WEBP" {
        return FileKind::Image;
    }

    FileKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_header() {
        assert_eq!(detect(b"%PDF-1.7\n%\xE2\xE3"), FileKind::Pdf);
        assert_eq!(detect(b"%PDF"), FileKind::Pdf);
    }

    #[test]
    fn image_signatures() {
        assert_eq!(detect(b"\xFF\xD8\xFF\xE0\x00\x10JFIF"), FileKind::Image);
        assert_eq!(detect(b"\x89PNG\r\n\x1A\n\x00\x00"), FileKind::Image);
        assert_eq!(detect(b"GIF87a...."), FileKind::Image);
        assert_eq!(detect(b"GIF89a...."), FileKind::Image);
        assert_eq!(detect(b"BM\x36\x00"), FileKind::Image);
        assert_eq!(detect(b"RIFF\x24\x00\x00\x00WEBPVP8 "), FileKind::Image);
    }

    #[test]
    fn riff_without_webp_is_unknown() {
        assert_eq!(detect(b"RIFF\x24\x00\x00\x00WAVEfmt "), FileKind::Unknown);
        assert_eq!(detect(b"RIFF\x24\x00"), FileKind::Unknown);
    }

    #[test]
    fn unrecognised_bytes_are_unknown() {
        assert_eq!(detect(b""), FileKind::Unknown);
        assert_eq!(detect(b"this is not a pdf"), FileKind::Unknown);
        assert_eq!(detect(b"PK\x03\x04"), FileKind::Unknown);
        assert_eq!(detect(b"%PD"), FileKind::Unknown);
        assert_eq!(detect(b"\xFF\xD8"), FileKind::Unknown);
    }

    #[test]
    fn pseudo_random_buffers_without_signature_are_unknown() {
        let mut state: u32 = 0x9E37_79B9;
        for _ in 0..500 {
            let buf: Vec<u8> = (0..16)
                .map(|_| {
                    state ^= state << 13;
                    state ^= state >> 17;
                    state ^= state << 5;
                    (state & 0xFF) as u8
                })
                .collect();
            let signed = buf.starts_with(b"%PDF")
                || buf.starts_with(b"BM")
                || buf.starts_with(b"GIF8")
                || buf.starts_with(b"\xFF\xD8\xFF")
                || buf.starts_with(b"\x89PNG")
                || buf.starts_with(b"RIFF");
            if !signed {
                assert_eq!(detect(&buf), FileKind::Unknown, "{buf:?}");
            }
        }
    }
}
