//! Media resolution and token-equivalent costs
//!
//! Local and embedded references are loaded into memory, classified by MIME
//! family and re-emitted as base64 `data:` URLs carrying their token cost.
//! Remote references are passed through and costed pessimistically.

use super::text;
use super::NormalizeOptions;
use crate::error::{Error, Result};
use crate::message::{ContentPart, ImageDetail, MediaRef};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Longest side an image is fitted into
pub const IMAGE_MAX_SIDE: u32 = 2048;
/// Short side after rescaling
pub const IMAGE_SHORT_SIDE: u32 = 768;
/// Tile edge length
pub const IMAGE_TILE: u32 = 512;
/// Tokens per tile
pub const TOKENS_PER_TILE: u64 = 170;
/// Base tokens per image; the whole cost in low-detail mode
pub const IMAGE_BASE_TOKENS: u64 = 85;
/// Audio tokens per second
pub const AUDIO_TOKENS_PER_SEC: f64 = 32.0;
/// Video tokens per second
pub const VIDEO_TOKENS_PER_SEC: f64 = 263.0;
/// Assumed audio byte rate when the duration is unknown
pub const AUDIO_BYTES_PER_SEC: f64 = 16_000.0;
/// Assumed video byte rate when the duration is unknown
pub const VIDEO_BYTES_PER_SEC: f64 = 125_000.0;

/// Token cost of an image
#[must_use]
pub fn image_tokens(width: u32, height: u32, detail: ImageDetail) -> u64 {
    if detail == ImageDetail::Low || width == 0 || height == 0 {
        return IMAGE_BASE_TOKENS;
    }
    let (mut w, mut h) = (f64::from(width), f64::from(height));

    let longest = w.max(h);
    if longest > f64::from(IMAGE_MAX_SIDE) {
        let scale = f64::from(IMAGE_MAX_SIDE) / longest;
        w = (w * scale).round();
        h = (h * scale).round();
    }

    let scale = f64::from(IMAGE_SHORT_SIDE) / w.min(h);
    let w = (w * scale).round() as u64;
    let h = (h * scale).round() as u64;

    let tile = u64::from(IMAGE_TILE);
    let tiles = w.div_ceil(tile) * h.div_ceil(tile);
    TOKENS_PER_TILE * tiles + IMAGE_BASE_TOKENS
}

/// Token cost of an image whose dimensions are unknown
#[must_use]
pub fn remote_image_tokens(detail: ImageDetail) -> u64 {
    image_tokens(IMAGE_MAX_SIDE, IMAGE_MAX_SIDE, detail)
}

/// Token cost of audio or video of the given length
#[must_use]
pub fn duration_tokens(family: MediaFamily, secs: f64) -> u64 {
    let rate = match family {
        MediaFamily::Audio => AUDIO_TOKENS_PER_SEC,
        MediaFamily::Video => VIDEO_TOKENS_PER_SEC,
        _ => return 0,
    };
    (secs.max(0.0) * rate).ceil() as u64
}

/// Broad MIME family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFamily {
    /// `image/*`
    Image,
    /// `audio/*`
    Audio,
    /// `video/*`
    Video,
    /// Text-like payloads
    Text,
    /// Anything else
    Other,
}

impl MediaFamily {
    /// Family of a MIME type
    #[must_use]
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("audio/") {
            Self::Audio
        } else if mime.starts_with("video/") {
            Self::Video
        } else if text::is_text_mime(mime) {
            Self::Text
        } else {
            Self::Other
        }
    }
}

/// MIME type for a filename extension
#[must_use]
pub fn mime_from_extension(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "md" | "markdown" => "text/markdown",
        other if text::is_text_extension(other) => "text/plain",
        _ => return None,
    };
    Some(mime)
}

/// MIME type from leading magic bytes
#[must_use]
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    let riff_kind = bytes.get(8..12);
    let mime = if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        "image/gif"
    } else if bytes.starts_with(b"RIFF") && riff_kind == Some(b"WEBP") {
        "image/webp"
    } else if bytes.starts_with(b"RIFF") && riff_kind == Some(b"WAVE") {
        "audio/wav"
    } else if bytes.starts_with(b"BM") && bytes.len() > 14 {
        "image/bmp"
    } else if bytes.starts_with(b"ID3") || bytes.starts_with(&[0xFF, 0xFB]) {
        "audio/mpeg"
    } else if bytes.starts_with(b"OggS") {
        "audio/ogg"
    } else if bytes.starts_with(b"fLaC") {
        "audio/flac"
    } else if bytes.get(4..8) == Some(b"ftyp") {
        "video/mp4"
    } else if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        "video/webm"
    } else if bytes.starts_with(b"%PDF") {
        "application/pdf"
    } else {
        return None;
    };
    Some(mime)
}

enum Source {
    Remote,
    Inline {
        data: Vec<u8>,
        mime: Option<String>,
        name: Option<String>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PartKind {
    Image,
    Audio,
    Video,
    File,
}

/// Resolve one content part; text parts are returned untouched
pub(crate) async fn resolve_part(part: ContentPart, options: &NormalizeOptions) -> Result<ContentPart> {
    let (kind, media) = match part {
        ContentPart::Text { .. } => return Ok(part),
        ContentPart::Image(m) => (PartKind::Image, m),
        ContentPart::Audio(m) => (PartKind::Audio, m),
        ContentPart::Video(m) => (PartKind::Video, m),
        ContentPart::File(m) => (PartKind::File, m),
    };
    if media.is_empty() {
        return Ok(rebuild(kind, media));
    }

    match load(&media.url, options).await? {
        Source::Remote => Ok(resolve_remote(kind, media)),
        Source::Inline { data, mime, name } => resolve_inline(kind, media, data, mime, name),
    }
}

async fn load(url: &str, options: &NormalizeOptions) -> Result<Source> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(Source::Remote);
    }
    if let Some(rest) = url.strip_prefix("data:") {
        let (data, mime) = decode_data_url(rest)?;
        return Ok(Source::Inline {
            data,
            mime,
            name: None,
        });
    }

    let path = url.strip_prefix("file://").unwrap_or(url);
    if !options.allow_local_files {
        return Err(Error::PolicyViolation(format!(
            "local file access is disabled: {path}"
        )));
    }
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| Error::Media(format!("cannot read {path}: {e}")))?;
    debug!(path = %path, bytes = data.len(), "Loaded local media");
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string);
    Ok(Source::Inline {
        data,
        mime: None,
        name,
    })
}

fn decode_data_url(rest: &str) -> Result<(Vec<u8>, Option<String>)> {
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::Media("data URL without payload separator".to_string()))?;
    let is_base64 = header.ends_with(";base64");
    let mime = header
        .split(';')
        .next()
        .filter(|m| !m.is_empty())
        .map(str::to_string);
    let data = if is_base64 {
        STANDARD
            .decode(payload.trim())
            .map_err(|e| Error::Media(format!("invalid base64 in data URL: {e}")))?
    } else {
        payload.as_bytes().to_vec()
    };
    Ok((data, mime))
}

fn resolve_remote(kind: PartKind, mut media: MediaRef) -> ContentPart {
    if media.mime.is_none() {
        media.mime = mime_from_extension(&media.url).map(str::to_string);
    }
    media.token_cost = Some(match kind {
        PartKind::Image => remote_image_tokens(media.detail),
        PartKind::Audio => media
            .duration_secs
            .map_or(0, |s| duration_tokens(MediaFamily::Audio, s)),
        PartKind::Video => media
            .duration_secs
            .map_or(0, |s| duration_tokens(MediaFamily::Video, s)),
        PartKind::File => 0,
    });
    rebuild(kind, media)
}

fn resolve_inline(
    kind: PartKind,
    mut media: MediaRef,
    data: Vec<u8>,
    source_mime: Option<String>,
    source_name: Option<String>,
) -> Result<ContentPart> {
    if media.name.is_none() {
        media.name = source_name;
    }
    let declared = media.mime.clone().or(source_mime);
    let mime = declared
        .filter(|m| !m.is_empty() && m != "application/octet-stream")
        .or_else(|| {
            media
                .name
                .as_deref()
                .and_then(mime_from_extension)
                .map(str::to_string)
        })
        .or_else(|| sniff_mime(&data).map(str::to_string));

    let family = mime.as_deref().map_or(MediaFamily::Other, MediaFamily::from_mime);

    // Only generic file parts change kind; declared media kinds are kept
    let kind = match (kind, family) {
        (PartKind::File, MediaFamily::Image) => PartKind::Image,
        (PartKind::File, MediaFamily::Audio) => PartKind::Audio,
        (PartKind::File, MediaFamily::Video) => PartKind::Video,
        (kind, _) => kind,
    };

    if kind == PartKind::File {
        let text = match family {
            MediaFamily::Text => text::decode_text(&data, false),
            MediaFamily::Other if mime.is_none() && !text::looks_binary(&data) => {
                text::decode_text(&data, true)
            }
            _ => None,
        };
        if let Some(text) = text {
            let text = match media.name.as_deref() {
                Some(name) => text::fence(name, &text),
                None => text,
            };
            return Ok(ContentPart::Text { text });
        }
    }

    let token_cost = match kind {
        PartKind::Image => {
            let (w, h) = image_dimensions(&data)?;
            image_tokens(w, h, media.detail)
        }
        PartKind::Audio => {
            let secs = media
                .duration_secs
                .or_else(|| wav_duration(&data))
                .unwrap_or(data.len() as f64 / AUDIO_BYTES_PER_SEC);
            duration_tokens(MediaFamily::Audio, secs)
        }
        PartKind::Video => {
            let secs = media
                .duration_secs
                .unwrap_or(data.len() as f64 / VIDEO_BYTES_PER_SEC);
            duration_tokens(MediaFamily::Video, secs)
        }
        PartKind::File => 0,
    };

    let mime = mime.unwrap_or_else(|| "application/octet-stream".to_string());
    media.url = format!("data:{mime};base64,{}", STANDARD.encode(&data));
    media.mime = Some(mime);
    media.token_cost = Some(token_cost);
    Ok(rebuild(kind, media))
}

fn image_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| Error::Media(format!("unreadable image: {e}")))?
        .into_dimensions()
        .map_err(|e| Error::Media(format!("unreadable image: {e}")))
}

fn wav_duration(data: &[u8]) -> Option<f64> {
    let reader = hound::WavReader::new(Cursor::new(data)).ok()?;
    let rate = reader.spec().sample_rate;
    if rate == 0 {
        return None;
    }
    Some(f64::from(reader.duration()) / f64::from(rate))
}

fn rebuild(kind: PartKind, media: MediaRef) -> ContentPart {
    match kind {
        PartKind::Image => ContentPart::Image(media),
        PartKind::Audio => ContentPart::Audio(media),
        PartKind::Video => ContentPart::Video(media),
        PartKind::File => ContentPart::File(media),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_tokens_tiling() {
        // 2048x2048 -> 768x768 -> 2x2 tiles
        assert_eq!(image_tokens(2048, 2048, ImageDetail::High), 765);
        // 1024x2048 -> 768x1536 -> 2x3 tiles
        assert_eq!(image_tokens(1024, 2048, ImageDetail::High), 1105);
        // 4096x1024 -> 2048x512 -> 3072x768 -> 6x2 tiles
        assert_eq!(image_tokens(4096, 1024, ImageDetail::High), 170 * 12 + 85);
        assert_eq!(image_tokens(4096, 4096, ImageDetail::Low), 85);
    }

    #[test]
    fn test_remote_image_cost() {
        assert_eq!(remote_image_tokens(ImageDetail::High), 765);
        assert_eq!(remote_image_tokens(ImageDetail::Low), 85);
    }

    #[test]
    fn test_duration_tokens() {
        assert_eq!(duration_tokens(MediaFamily::Audio, 10.0), 320);
        assert_eq!(duration_tokens(MediaFamily::Video, 2.0), 526);
        assert_eq!(duration_tokens(MediaFamily::Audio, 0.01), 1);
        assert_eq!(duration_tokens(MediaFamily::Text, 10.0), 0);
    }

    #[test]
    fn test_mime_detection() {
        assert_eq!(mime_from_extension("photo.JPG"), Some("image/jpeg"));
        assert_eq!(mime_from_extension("main.rs"), Some("text/plain"));
        assert_eq!(mime_from_extension("noext"), None);

        assert_eq!(sniff_mime(b"\x89PNG\r\n\x1a\n...."), Some("image/png"));
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WAVEfmt "), Some("audio/wav"));
        assert_eq!(sniff_mime(b"\0\0\0\x18ftypmp42"), Some("video/mp4"));
        assert_eq!(sniff_mime(b"hello"), None);
    }

    #[test]
    fn test_data_url_decoding() {
        let (data, mime) = decode_data_url("text/plain;base64,aGVsbG8=").unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(mime.as_deref(), Some("text/plain"));

        let (data, mime) = decode_data_url(",plain").unwrap();
        assert_eq!(data, b"plain");
        assert_eq!(mime, None);

        assert!(decode_data_url("image/png;base64").is_err());
    }
}
