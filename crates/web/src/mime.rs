//! Content types from file name extensions.

use std::collections::HashMap;

use once_cell::sync::Lazy;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

static CONTENT_TYPES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        // text
        ("txt", "text/plain"),
        ("text", "text/plain"),
        ("log", "text/x-log"),
        ("csv", "text/csv"),
        ("tsv", "text/tab-separated-values"),
        ("htm", "text/html"),
        ("html", "text/html"),
        ("css", "text/css"),
        ("js", "application/javascript"),
        ("mjs", "application/javascript"),
        ("md", "text/markdown"),
        ("ics", "text/calendar"),
        ("vcf", "text/vcard"),
        ("rtf", "application/rtf"),
        // structured
        ("json", "application/json"),
        ("map", "application/json"),
        ("xml", "application/xml"),
        ("xsl", "application/xml"),
        ("xhtml", "application/xhtml+xml"),
        ("rss", "application/rss+xml"),
        ("atom", "application/atom+xml"),
        ("yaml", "application/yaml"),
        ("yml", "application/yaml"),
        ("toml", "application/toml"),
        ("wasm", "application/wasm"),
        // images
        ("ico", "image/x-icon"),
        ("gif", "image/gif"),
        ("png", "image/png"),
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("jpe", "image/jpeg"),
        ("bmp", "image/bmp"),
        ("svg", "image/svg+xml"),
        ("svgz", "image/svg+xml"),
        ("tif", "image/tiff"),
        ("tiff", "image/tiff"),
        ("webp", "image/webp"),
        ("avif", "image/avif"),
        // fonts
        ("woff", "font/woff"),
        ("woff2", "font/woff2"),
        ("ttf", "font/ttf"),
        ("otf", "font/otf"),
        ("eot", "application/vnd.ms-fontobject"),
        // audio and video
        ("mp3", "audio/mpeg"),
        ("ogg", "audio/ogg"),
        ("oga", "audio/ogg"),
        ("wav", "audio/wav"),
        ("flac", "audio/flac"),
        ("mp4", "video/mp4"),
        ("m4v", "video/mp4"),
        ("webm", "video/webm"),
        ("ogv", "video/ogg"),
        ("avi", "video/x-msvideo"),
        ("mov", "video/quicktime"),
        // documents and archives
        ("pdf", "application/pdf"),
        ("doc", "application/msword"),
        ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        ("xls", "application/vnd.ms-excel"),
        ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        ("ppt", "application/vnd.ms-powerpoint"),
        ("pptx", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
        ("odt", "application/vnd.oasis.opendocument.text"),
        ("ods", "application/vnd.oasis.opendocument.spreadsheet"),
        ("zip", "application/zip"),
        ("gz", "application/gzip"),
        ("tgz", "application/gzip"),
        ("tar", "application/x-tar"),
        ("7z", "application/x-7z-compressed"),
        ("rar", "application/vnd.rar"),
        ("bz2", "application/x-bzip2"),
        ("jar", "application/java-archive"),
        // binaries
        ("bin", DEFAULT_CONTENT_TYPE),
        ("exe", "application/vnd.microsoft.portable-executable"),
        ("crt", "application/x-x509-ca-cert"),
        ("cer", "application/pkix-cert"),
        ("pem", "application/x-pem-file"),
        ("kml", "application/vnd.google-earth.kml+xml"),
        ("kmz", "application/vnd.google-earth.kmz"),
        ("gpx", "application/gpx+xml"),
    ])
});

/// The content type for `filename`, or [`DEFAULT_CONTENT_TYPE`] when its extension is unknown.
///
/// Surrounding whitespace is ignored and extensions match case-insensitively.
pub fn resolve(filename: &str) -> &'static str {
    let Some((_, extension)) = filename.trim().rsplit_once('.') else {
        return DEFAULT_CONTENT_TYPE;
    };

    let lookup = |extension: &str| CONTENT_TYPES.get(extension).copied();
    lookup(extension)
        .or_else(|| lookup(&extension.to_ascii_lowercase()))
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}
