//! Text vs. binary classification from a file's leading bytes.

use std::io;
use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Number of leading bytes inspected.
pub const SAMPLE_SIZE: usize = 512;

const TEXTUAL_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-www-form-urlencoded",
];

/// Extensions of formats that are never worth tailing. Only consulted when
/// no include pattern was given.
const BINARY_EXTENSIONS: &[&str] = &[
    "7z", "a", "avi", "bin", "bmp", "class", "dll", "dylib", "exe", "flac", "gif", "gz", "ico",
    "iso", "jar", "jpeg", "jpg", "mkv", "mov", "mp3", "mp4", "o", "ogg", "pdf", "png", "pyc",
    "so", "tar", "tgz", "wasm", "wav", "webm", "webp", "xz", "zip", "zst",
];

/// Classifies the file at `path` by sampling up to [`SAMPLE_SIZE`] bytes.
pub async fn is_text_file(path: impl AsRef<Path>) -> io::Result<bool> {
    let file = File::open(path.as_ref()).await?;
    let mut sample = Vec::with_capacity(SAMPLE_SIZE);
    file.take(SAMPLE_SIZE as u64).read_to_end(&mut sample).await?;
    Ok(is_text(&sample))
}

/// Whether `path` carries the extension of a known binary format.
pub fn has_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| {
            BINARY_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Classifies a sample of leading bytes.
///
/// Empty content is text and any NUL byte makes it binary. Otherwise content
/// sniffing decides; samples the sniffer does not recognise as textual are
/// still text if they are valid UTF-8.
pub fn is_text(sample: &[u8]) -> bool {
    if sample.is_empty() {
        return true;
    }
    if sample.contains(&0) {
        return false;
    }

    let content_type = sniff_content_type(sample);
    if content_type.starts_with("text/") || TEXTUAL_TYPES.contains(&content_type) {
        return true;
    }
    std::str::from_utf8(sample).is_ok()
}

enum Signature {
    /// Exact byte prefix.
    Exact(&'static [u8]),
    /// Prefix compared under a mask.
    Masked {
        mask: &'static [u8],
        pattern: &'static [u8],
        skip_whitespace: bool,
    },
    /// Case-insensitive HTML tag, after leading whitespace, followed by a
    /// space or `>`.
    Html(&'static [u8]),
}

impl Signature {
    fn matches(&self, data: &[u8], first_non_ws: usize) -> bool {
        match self {
            Signature::Exact(prefix) => data.starts_with(prefix),
            Signature::Masked {
                mask,
                pattern,
                skip_whitespace,
            } => {
                let data = if *skip_whitespace {
                    &data[first_non_ws..]
                } else {
                    data
                };
                data.len() >= pattern.len()
                    && data
                        .iter()
                        .zip(mask.iter())
                        .zip(pattern.iter())
                        .all(|((d, m), p)| d & m == *p)
            }
            Signature::Html(tag) => {
                let data = &data[first_non_ws..];
                if data.len() < tag.len() + 1 {
                    return false;
                }
                let head_matches = data
                    .iter()
                    .zip(tag.iter())
                    .all(|(d, t)| if t.is_ascii_uppercase() { d & 0xDF == *t } else { d == t });
                head_matches && matches!(data[tag.len()], b' ' | b'>')
            }
        }
    }
}

const HTML_UTF8: &str = "text/html; charset=utf-8";

static SIGNATURES: &[(Signature, &str)] = &[
    (Signature::Html(b"<!DOCTYPE HTML"), HTML_UTF8),
    (Signature::Html(b"<HTML"), HTML_UTF8),
    (Signature::Html(b"<HEAD"), HTML_UTF8),
    (Signature::Html(b"<SCRIPT"), HTML_UTF8),
    (Signature::Html(b"<IFRAME"), HTML_UTF8),
    (Signature::Html(b"<H1"), HTML_UTF8),
    (Signature::Html(b"<DIV"), HTML_UTF8),
    (Signature::Html(b"<FONT"), HTML_UTF8),
    (Signature::Html(b"<TABLE"), HTML_UTF8),
    (Signature::Html(b"<A"), HTML_UTF8),
    (Signature::Html(b"<STYLE"), HTML_UTF8),
    (Signature::Html(b"<TITLE"), HTML_UTF8),
    (Signature::Html(b"<B"), HTML_UTF8),
    (Signature::Html(b"<BODY"), HTML_UTF8),
    (Signature::Html(b"<BR"), HTML_UTF8),
    (Signature::Html(b"<P"), HTML_UTF8),
    (Signature::Html(b"<!--"), HTML_UTF8),
    (
        Signature::Masked {
            mask: b"\xFF\xFF\xFF\xFF\xFF",
            pattern: b"<?xml",
            skip_whitespace: true,
        },
        "text/xml; charset=utf-8",
    ),
    (Signature::Exact(b"%PDF-"), "application/pdf"),
    (Signature::Exact(b"%!PS-Adobe-"), "application/postscript"),
    (Signature::Exact(b"\xFE\xFF"), "text/plain; charset=utf-16be"),
    (Signature::Exact(b"\xFF\xFE"), "text/plain; charset=utf-16le"),
    (Signature::Exact(b"\xEF\xBB\xBF"), "text/plain; charset=utf-8"),
    (Signature::Exact(b"\x00\x00\x01\x00"), "image/x-icon"),
    (Signature::Exact(b"\x00\x00\x02\x00"), "image/x-icon"),
    (Signature::Exact(b"BM"), "image/bmp"),
    (Signature::Exact(b"GIF87a"), "image/gif"),
    (Signature::Exact(b"GIF89a"), "image/gif"),
    (
        Signature::Masked {
            mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF\xFF\xFF",
            pattern: b"RIFF\x00\x00\x00\x00WEBPVP",
            skip_whitespace: false,
        },
        "image/webp",
    ),
    (Signature::Exact(b"\x89PNG\x0D\x0A\x1A\x0A"), "image/png"),
    (Signature::Exact(b"\xFF\xD8\xFF"), "image/jpeg"),
    (
        Signature::Masked {
            mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
            pattern: b"RIFF\x00\x00\x00\x00WAVE",
            skip_whitespace: false,
        },
        "audio/wave",
    ),
    (
        Signature::Masked {
            mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
            pattern: b"RIFF\x00\x00\x00\x00AVI ",
            skip_whitespace: false,
        },
        "video/avi",
    ),
    (Signature::Exact(b"OggS\x00"), "application/ogg"),
    (Signature::Exact(b"MThd\x00\x00\x00\x06"), "audio/midi"),
    (Signature::Exact(b"ID3"), "audio/mpeg"),
    (Signature::Exact(b"\x1A\x45\xDF\xA3"), "video/webm"),
    (Signature::Exact(b"wOFF"), "font/woff"),
    (Signature::Exact(b"wOF2"), "font/woff2"),
    (Signature::Exact(b"\x1F\x8B\x08"), "application/x-gzip"),
    (Signature::Exact(b"PK\x03\x04"), "application/zip"),
    (Signature::Exact(b"Rar!\x1A\x07\x00"), "application/x-rar-compressed"),
    (Signature::Exact(b"Rar!\x1A\x07\x01\x00"), "application/x-rar-compressed"),
    (Signature::Exact(b"\x00\x61\x73\x6D"), "application/wasm"),
];

/// Sniffs a MIME type from leading bytes, following the WHATWG signature
/// table. Falls back to `text/plain` when no binary control bytes are
/// present and `application/octet-stream` otherwise.
pub fn sniff_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SAMPLE_SIZE)];
    let first_non_ws = data
        .iter()
        .position(|b| !is_whitespace(*b))
        .unwrap_or(data.len());

    for (signature, content_type) in SIGNATURES {
        if signature.matches(data, first_non_ws) {
            return content_type;
        }
    }

    if data[first_non_ws..].iter().any(|b| is_binary_byte(*b)) {
        "application/octet-stream"
    } else {
        "text/plain; charset=utf-8"
    }
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}
