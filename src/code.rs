/// Catalog code extraction from media file paths
///
/// Filenames in the wild look like `CJOD-160 Some Title.mp4`, `abc_123.mkv`
/// or `/library/SSIS.001/video.mp4`. The extractor tries a fixed, ordered
/// pattern set against progressively noisier views of the path and renders
/// whatever it finds as `PREFIX-NUMBER`.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

/// Code patterns in priority order. Group 1 is the prefix, group 2 the number.
const PATTERNS: &[&str] = &[
    // ABC-123
    r"([A-Z]{2,5})-(\d{3,5})",
    // ABC_123
    r"([A-Z]{2,5})[-_](\d{3,5})",
    // ABC123
    r"([A-Z]{3,5})(\d{3,5})",
    // ABC.123
    r"([A-Z]{2,5})\.(\d{3,5})",
    // S2MBD-002
    r"([A-Z][A-Z0-9]{2,4})-(\d{3,5})",
    // 012345-123
    r"(\d{6})[-_](\d{3})",
    // ABC-A123
    r"([A-Z]{2,5})[-_]([A-Z]\d{2,4})",
];

static ANCHORED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    PATTERNS
        .iter()
        .filter_map(|p| Regex::new(&format!("^{}$", p)).ok())
        .collect()
});

static UNANCHORED: LazyLock<Vec<Regex>> =
    LazyLock::new(|| PATTERNS.iter().filter_map(|p| Regex::new(p).ok()).collect());

/// Normalized `PREFIX-NUMBER` catalog identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogCode {
    prefix: String,
    number: String,
}

impl CatalogCode {
    pub fn new(prefix: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().to_uppercase(),
            number: number.into().to_uppercase(),
        }
    }

    /// Letter prefix, e.g. `CJOD` for `CJOD-160`
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    /// Extract a catalog code from a path or bare filename
    pub fn extract(path: &str) -> Option<Self> {
        CodeExtractor::extract(path)
    }
}

impl fmt::Display for CatalogCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.prefix, self.number)
    }
}

/// Ordered strategy cascade over the static pattern set
pub struct CodeExtractor;

impl CodeExtractor {
    pub fn extract(path: &str) -> Option<CatalogCode> {
        let full_path = path.to_uppercase();

        // Strategy 1: leading token before the first space, in any path segment
        for segment in full_path.split(['/', '\\']) {
            if let Some(code) = Self::match_leading_token(segment) {
                debug!("Code {} found in path segment '{}'", code, segment);
                return Some(code);
            }
        }

        // Strategy 2: same heuristic on the file stem
        let stem = Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_uppercase())
            .unwrap_or_default();
        if let Some(code) = Self::match_leading_token(&stem) {
            debug!("Code {} found in file stem '{}'", code, stem);
            return Some(code);
        }

        // Strategy 3: anywhere in the path
        for re in UNANCHORED.iter() {
            if let Some(code) = Self::captures_to_code(re, &full_path) {
                debug!("Code {} found by unanchored search in '{}'", code, path);
                return Some(code);
            }
        }

        None
    }

    fn match_leading_token(segment: &str) -> Option<CatalogCode> {
        let space = segment.find(' ')?;
        if space == 0 {
            return None;
        }
        let token = segment[..space].trim();
        ANCHORED
            .iter()
            .find_map(|re| Self::captures_to_code(re, token))
    }

    fn captures_to_code(re: &Regex, text: &str) -> Option<CatalogCode> {
        let caps = re.captures(text)?;
        let prefix = caps.get(1)?.as_str();
        let number = caps.get(2)?.as_str();
        Some(CatalogCode::new(prefix, number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(path: &str) -> Option<String> {
        CatalogCode::extract(path).map(|c| c.to_string())
    }

    #[test]
    fn test_leading_token_with_title() {
        assert_eq!(code("CJOD-160 Some Title.mp4"), Some("CJOD-160".to_string()));
        assert_eq!(code("/media/jav/ssis-001 Title Here.mkv"), Some("SSIS-001".to_string()));
    }

    #[test]
    fn test_separator_variants_normalize() {
        assert_eq!(code("ABP_123 title.mp4"), Some("ABP-123".to_string()));
        assert_eq!(code("ABP.123 title.mp4"), Some("ABP-123".to_string()));
        assert_eq!(code("ABP123 title.mp4"), Some("ABP-123".to_string()));
        assert_eq!(code("012345-678 title.mp4"), Some("012345-678".to_string()));
        assert_eq!(code("IPX-A123 title.mp4"), Some("IPX-A123".to_string()));
    }

    #[test]
    fn test_mixed_alphanumeric_prefix() {
        assert_eq!(code("S2MBD-002 title.mp4"), Some("S2MBD-002".to_string()));
    }

    #[test]
    fn test_directory_segment_wins_over_file() {
        assert_eq!(
            code("/videos/MIDE-777 Collection/ABP-123.mp4"),
            Some("MIDE-777".to_string())
        );
    }

    #[test]
    fn test_unanchored_fallback() {
        assert_eq!(code("/videos/[hd]abp-123[1080p].mp4"), Some("ABP-123".to_string()));
        assert_eq!(code("C:\\downloads\\watch_STARS-042.mp4"), Some("STARS-042".to_string()));
    }

    #[test]
    fn test_earlier_pattern_wins() {
        // Hyphenated pattern outranks the no-separator pattern on unanchored search
        assert_eq!(code("xyz999_and_ABC-123.mp4"), Some("ABC-123".to_string()));
    }

    #[test]
    fn test_no_code() {
        assert_eq!(code("holiday video.mp4"), None);
        assert_eq!(code(""), None);
        assert_eq!(code(" leading space.mp4"), None);
    }

    #[test]
    fn test_prefix_accessors() {
        let c = CatalogCode::extract("cjod-160 title.mp4").unwrap();
        assert_eq!(c.prefix(), "CJOD");
        assert_eq!(c.number(), "160");
    }
}
