//! Naming rules for the images written per request.
//!
//! An upload is stored as `<timestamp>_<sanitized-name>` and its annotated
//! counterpart as `pred_<upload name>`. Both are written once and never
//! mutated afterwards.

use chrono::{DateTime, TimeZone};
use std::ffi::OsStr;
use std::fmt::Display;
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

/// Upload extensions accepted by the service (compared case-insensitively).
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Prefix that ties an annotated image to its source upload.
pub const ANNOTATED_PREFIX: &str = "pred_";

/// Public URL prefix under which annotated images are served.
pub const OUTPUTS_URL_PREFIX: &str = "/static/outputs";

/// Public URL prefix under which raw uploads are served.
pub const UPLOADS_URL_PREFIX: &str = "/static/uploads";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";

/// Lower-cased extension of `filename`, without the dot.
///
/// Leading dots do not start an extension, so `.png` has none.
pub fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.trim_start_matches('.').rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Whether `filename` carries one of the allowed image extensions.
pub fn is_allowed_file(filename: &str) -> bool {
    extension_of(filename)
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Reduce a client-supplied file name to a safe, flat ASCII name.
///
/// The name is NFKD-normalised so accented letters keep their base letter,
/// then anything non-ASCII is dropped. `/` becomes a word break, whitespace
/// runs collapse to `_`, anything outside `[A-Za-z0-9_.-]` is dropped and
/// leading or trailing dots and underscores are stripped. The result may
/// be empty.
pub fn secure_filename(name: &str) -> String {
    let spaced: String = name
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Timestamp used to make upload names unique, e.g. `20240101_120000_000000`.
pub fn upload_timestamp<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// True when `name` is a single path component with no traversal.
pub fn is_plain_basename(name: &str) -> bool {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains('\0') {
        return false;
    }
    match Path::new(name).file_name() {
        Some(base) => base == OsStr::new(name),
        None => false,
    }
}

/// Public URL of an annotated image.
pub fn output_url(name: &str) -> String {
    format!("{}/{}", OUTPUTS_URL_PREFIX, name)
}

/// A source image as stored in the uploads directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    name: String,
}

impl UploadedImage {
    /// Build the stored name for a client file name.
    ///
    /// Returns `None` when the original name does not carry an allowed
    /// extension. If sanitizing strips the extension (non-ASCII names),
    /// the stored name falls back to `upload.<ext>`.
    pub fn from_original(timestamp: &str, original: &str) -> Option<Self> {
        if !is_allowed_file(original) {
            return None;
        }
        let ext = extension_of(original)?;

        let mut safe = secure_filename(original);
        if !is_allowed_file(&safe) {
            safe = format!("upload.{}", ext);
        }

        Some(Self {
            name: format!("{}_{}", timestamp, safe),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The annotated image derived from this upload.
    pub fn annotated(&self) -> AnnotatedImage {
        AnnotatedImage {
            name: format!("{}{}", ANNOTATED_PREFIX, self.name),
        }
    }
}

/// An annotated image as stored in the outputs directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedImage {
    name: String,
}

impl AnnotatedImage {
    /// Wrap the file name the prediction pipeline actually wrote.
    pub fn from_written(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        Some(Self {
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> String {
        output_url(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    #[test]
    fn test_allowed_extensions_case_insensitive() {
        assert!(is_allowed_file("cat.jpg"));
        assert!(is_allowed_file("cat.JPEG"));
        assert!(is_allowed_file("archive.tar.PNG"));
        assert!(!is_allowed_file("cat.gif"));
        assert!(!is_allowed_file("jpg"));
        assert!(!is_allowed_file("cat."));
        assert!(!is_allowed_file(""));
    }

    #[test]
    fn test_extension_of_hidden_file() {
        assert_eq!(extension_of(".png"), None);
        assert_eq!(extension_of(".hidden.PNG"), Some("png".to_string()));
        assert_eq!(extension_of("noext"), None);
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("my cat.jpg"), "my_cat.jpg");
        assert_eq!(secure_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("C:\\photos\\dog.png"), "Cphotosdog.png");
        assert_eq!(secure_filename("  weird$name!.jpeg "), "weirdname.jpeg");
        assert_eq!(secure_filename("..."), "");
    }

    #[test]
    fn test_secure_filename_transliterates_accents() {
        assert_eq!(secure_filename("café.jpg"), "cafe.jpg");
        assert_eq!(secure_filename("naïve photo.png"), "naive_photo.png");
        assert_eq!(secure_filename("Ångström.JPEG"), "Angstrom.JPEG");
        assert_eq!(secure_filename("日本.png"), "png");
    }

    #[test]
    fn test_upload_timestamp_format() {
        let now = Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_micro_opt(12, 0, 0, 42)
                .unwrap(),
        );
        assert_eq!(upload_timestamp(&now), "20240101_120000_000042");
    }

    #[test]
    fn test_uploaded_and_annotated_names() {
        let upload = UploadedImage::from_original("20240101_120000_000000", "cat.jpg").unwrap();
        assert_eq!(upload.name(), "20240101_120000_000000_cat.jpg");

        let annotated = upload.annotated();
        assert_eq!(annotated.name(), "pred_20240101_120000_000000_cat.jpg");
        assert_eq!(
            annotated.url(),
            "/static/outputs/pred_20240101_120000_000000_cat.jpg"
        );
    }

    #[test]
    fn test_uploaded_rejects_disallowed() {
        assert!(UploadedImage::from_original("ts", "notes.txt").is_none());
        assert!(UploadedImage::from_original("ts", "").is_none());
    }

    #[test]
    fn test_uploaded_falls_back_when_extension_lost() {
        let upload = UploadedImage::from_original("ts", "日本.png").unwrap();
        assert_eq!(upload.name(), "ts_upload.png");
    }

    #[test]
    fn test_is_plain_basename() {
        assert!(is_plain_basename("pred_1_cat.jpg"));
        assert!(!is_plain_basename(""));
        assert!(!is_plain_basename(".."));
        assert!(!is_plain_basename("."));
        assert!(!is_plain_basename("../../etc/passwd"));
        assert!(!is_plain_basename("a/b.jpg"));
        assert!(!is_plain_basename("..\\secret.png"));
    }

    #[test]
    fn test_annotated_from_written_path() {
        let annotated =
            AnnotatedImage::from_written(Path::new("/srv/static/outputs/pred_x.jpg")).unwrap();
        assert_eq!(annotated.name(), "pred_x.jpg");
    }
}
