//! Text payload detection and decoding

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, IBM866, ISO_8859_15, MACINTOSH, SHIFT_JIS, WINDOWS_1252};

/// Bytes inspected when sniffing for binary content
const SNIFF_WINDOW: usize = 8 * 1024;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "csv", "tsv", "json", "jsonl", "xml", "yaml", "yml", "toml",
    "ini", "cfg", "conf", "log", "html", "htm", "css", "js", "ts", "tsx", "jsx", "rs", "py", "rb",
    "go", "java", "kt", "c", "h", "cc", "cpp", "hpp", "cs", "php", "sh", "bash", "zsh", "sql",
    "srt", "vtt", "tex",
];

/// Whether a filename extension denotes a text payload
#[must_use]
pub fn is_text_extension(ext: &str) -> bool {
    TEXT_EXTENSIONS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(ext))
}

/// Whether a MIME type denotes a text payload
#[must_use]
pub fn is_text_mime(mime: &str) -> bool {
    let mime = mime.split(';').next().unwrap_or(mime).trim();
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/json"
                | "application/xml"
                | "application/yaml"
                | "application/x-yaml"
                | "application/toml"
                | "application/javascript"
                | "application/x-sh"
        )
}

/// Whether the leading bytes look binary
#[must_use]
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(SNIFF_WINDOW).any(|b| *b == 0)
}

/// Decode a text payload
///
/// UTF-8 (with or without BOM) is taken as-is. Otherwise the encoding is
/// guessed; a single-byte Western guess is treated as a misdetection and
/// the bytes are decoded as Shift_JIS. With `strict`, a decode that hits
/// malformed sequences yields `None`.
#[must_use]
pub fn decode_text(bytes: &[u8], strict: bool) -> Option<String> {
    let without_bom = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(without_bom) {
        return Some(text.to_string());
    }

    let encoding = guess_encoding(bytes);
    let (text, _, had_errors) = encoding.decode(bytes);
    if strict && had_errors {
        return None;
    }
    Some(text.into_owned())
}

fn guess_encoding(bytes: &[u8]) -> &'static Encoding {
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let guess = detector.guess(None, false);
    if is_western_single_byte(guess) {
        SHIFT_JIS
    } else {
        guess
    }
}

fn is_western_single_byte(encoding: &'static Encoding) -> bool {
    encoding == WINDOWS_1252 || encoding == ISO_8859_15 || encoding == MACINTOSH || encoding == IBM866
}

/// Wrap text in a fenced code block headed by its filename
#[must_use]
pub fn fence(name: &str, text: &str) -> String {
    let lang = std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    let longest_run = text
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let ticks = "`".repeat(longest_run.max(2) + 1);
    let body = text.strip_suffix('\n').unwrap_or(text);
    format!("{name}\n{ticks}{lang}\n{body}\n{ticks}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_extensions() {
        assert!(is_text_extension("md"));
        assert!(is_text_extension("CSV"));
        assert!(!is_text_extension("png"));
    }

    #[test]
    fn test_text_mime() {
        assert!(is_text_mime("text/plain; charset=utf-8"));
        assert!(is_text_mime("application/json"));
        assert!(!is_text_mime("image/png"));
    }

    #[test]
    fn test_decode_utf8_with_bom() {
        assert_eq!(decode_text(b"\xEF\xBB\xBFhello", true).as_deref(), Some("hello"));
    }

    #[test]
    fn test_decode_shift_jis() {
        let (bytes, _, _) = SHIFT_JIS.encode("こんにちは、世界。今日は良い天気です。");
        let text = decode_text(&bytes, true).unwrap();
        assert_eq!(text, "こんにちは、世界。今日は良い天気です。");
    }

    #[test]
    fn test_binary_sniff() {
        assert!(looks_binary(b"abc\0def"));
        assert!(!looks_binary(b"plain text"));
    }

    #[test]
    fn test_fence() {
        assert_eq!(fence("notes.md", "# Title\n"), "notes.md\n```md\n# Title\n```");
        let nested = fence("a.txt", "```rust\nfn x() {}\n```");
        assert!(nested.contains("````txt\n"));
        assert!(nested.ends_with("\n````"));
    }
}
