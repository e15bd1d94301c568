//! File name helpers for media formats.

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm", "avi", "m4v"];

/// Lower-cased extension of a file name or key, including the leading dot.
///
/// Returns an empty string when there is none.
pub fn extension_of(name: &str) -> String {
    let base = name.rsplit('/').next().unwrap_or(name);
    match base.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < base.len() => base[idx..].to_lowercase(),
        _ => String::new(),
    }
}

fn bare_extension(name: &str) -> String {
    extension_of(name).trim_start_matches('.').to_string()
}

pub fn is_image_file(name: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&bare_extension(name).as_str())
}

pub fn is_video_file(name: &str) -> bool {
    VIDEO_EXTENSIONS.contains(&bare_extension(name).as_str())
}

/// MIME type for a file name, falling back to `application/octet-stream`.
pub fn content_type_for(name: &str) -> &'static str {
    match bare_extension(name).as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("cat.png"), ".png");
        assert_eq!(extension_of("dir.v2/cat.JPG"), ".jpg");
        assert_eq!(extension_of("dir.v2/cat"), "");
        assert_eq!(extension_of(".hidden"), "");
        assert_eq!(extension_of("trailing."), "");
    }

    #[test]
    fn test_media_kinds() {
        assert!(is_image_file("a/b/photo.jpeg"));
        assert!(!is_image_file("clip.mp4"));
        assert!(is_video_file("clip.MOV"));
        assert!(!is_video_file("notes.txt"));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("cat.png"), "image/png");
        assert_eq!(content_type_for("cat.JPG"), "image/jpeg");
        assert_eq!(content_type_for("clip.mp4"), "video/mp4");
        assert_eq!(content_type_for("unknown"), "application/octet-stream");
    }
}
