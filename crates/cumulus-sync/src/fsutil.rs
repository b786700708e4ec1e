//! Local file helpers: streaming digests, content types, formatting

use std::path::Path;

use cumulus_core::domain::SyncError;
use tokio::io::AsyncReadExt;

/// Buffer size for streaming reads. Bounds per-file memory regardless of
/// file size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Computes the hex MD5 digest and size of a file by streaming its bytes.
pub async fn stream_md5(path: &Path) -> Result<(String, u64), SyncError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| SyncError::local_io(path, e))?;

    let mut context = md5::Context::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut size: u64 = 0;

    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| SyncError::local_io(path, e))?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
        size += n as u64;
    }

    Ok((format!("{:x}", context.compute()), size))
}

/// Returns the media type for a file based on its extension.
///
/// Unknown extensions fall back to `application/octet-stream`.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("txt") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("ogg") => "audio/ogg",
        Some("zip") => "application/zip",
        Some("tar") => "application/x-tar",
        Some("gz") => "application/gzip",
        Some("bz2") => "application/x-bzip2",
        _ => "application/octet-stream",
    }
}

/// Formats a POSIX mode as an octal permission string, e.g. "0644".
#[cfg(unix)]
pub fn permissions_string(metadata: &std::fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:04o}", metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
pub fn permissions_string(_metadata: &std::fs::Metadata) -> String {
    String::new()
}

/// Formats a byte count into a human-readable string, e.g. "1.5 MB".
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let units = ["KB", "MB", "GB", "TB", "PB", "EB"];
    format!("{:.1} {}", bytes as f64 / div as f64, units[exp])
}
