//! Result extraction from the measurement site's CSV export.
//!
//! The export is a two-line, `;`-separated file with `"quoted"` cells and
//! German decimal commas. Column names are not stable, so headers are matched
//! by substring against a small vocabulary. Extraction never fails: anything
//! that cannot be read simply stays `None`.

use bandwatch_model::ExtractedResult;
use serde::{Deserialize, Serialize};
use tracing::debug;

const FIELD_DELIMITER: char = ';';

/// Result field a header can map to. Declaration order is match priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnCategory {
    Download,
    Upload,
    Latency,
}

impl ColumnCategory {
    pub const PRIORITY: [ColumnCategory; 3] = [
        ColumnCategory::Download,
        ColumnCategory::Upload,
        ColumnCategory::Latency,
    ];
}

/// Lower-case header fragments per result field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderVocabulary {
    pub download: Vec<String>,
    pub upload: Vec<String>,
    pub latency: Vec<String>,
}

impl Default for HeaderVocabulary {
    fn default() -> Self {
        Self {
            download: vec!["download".into(), "empfang".into()],
            upload: vec!["upload".into(), "senden".into()],
            latency: vec![
                "latency".into(),
                "latenz".into(),
                "ping".into(),
                "laufzeit".into(),
            ],
        }
    }
}

impl HeaderVocabulary {
    fn terms(&self, category: ColumnCategory) -> &[String] {
        match category {
            ColumnCategory::Download => &self.download,
            ColumnCategory::Upload => &self.upload,
            ColumnCategory::Latency => &self.latency,
        }
    }

    /// First category in [`ColumnCategory::PRIORITY`] whose vocabulary occurs
    /// in the (already lower-cased) header.
    pub fn classify(&self, header: &str) -> Option<ColumnCategory> {
        ColumnCategory::PRIORITY.into_iter().find(|category| {
            self.terms(*category)
                .iter()
                .filter(|term| !term.is_empty())
                .any(|term| header.contains(term.to_lowercase().as_str()))
        })
    }
}

/// Parses CSV exports into [`ExtractedResult`]s.
#[derive(Clone, Debug, Default)]
pub struct ResultExtractor {
    vocabulary: HeaderVocabulary,
}

impl ResultExtractor {
    pub fn new(vocabulary: HeaderVocabulary) -> Self {
        Self { vocabulary }
    }

    pub fn extract(&self, raw: &str) -> ExtractedResult {
        let mut result = ExtractedResult::default();

        let text = raw.trim_start_matches('\u{feff}').trim();
        let mut lines = text.lines();
        let (Some(header_line), Some(value_line)) = (lines.next(), lines.next())
        else {
            debug!(target: "measurement::extract", "export has fewer than two lines");
            return result;
        };

        let headers: Vec<String> = header_line
            .split(FIELD_DELIMITER)
            .map(|cell| strip_quotes(cell).to_lowercase())
            .collect();
        let values: Vec<&str> = value_line.split(FIELD_DELIMITER).map(strip_quotes).collect();

        for (header, value) in headers.iter().zip(values.iter()) {
            let Some(number) = parse_decimal(value) else {
                continue;
            };
            match self.vocabulary.classify(header) {
                Some(ColumnCategory::Download) => result.download = Some(number),
                Some(ColumnCategory::Upload) => result.upload = Some(number),
                Some(ColumnCategory::Latency) => result.latency = Some(number),
                None => {}
            }
        }

        debug!(
            target: "measurement::extract",
            ?headers,
            ?values,
            ?result,
            "parsed export"
        );
        result
    }
}

/// Extract with the default vocabulary.
pub fn extract(raw: &str) -> ExtractedResult {
    ResultExtractor::default().extract(raw)
}

fn strip_quotes(cell: &str) -> &str {
    let cell = cell.trim();
    let cell = cell.strip_prefix('"').unwrap_or(cell);
    let cell = cell.strip_suffix('"').unwrap_or(cell);
    cell.trim()
}

/// Reads the longest numeric prefix of `value` after turning the first decimal
/// comma into a dot, so `"123,4 Mbit/s"` yields `123.4`.
fn parse_decimal(value: &str) -> Option<f64> {
    let normalized = value.trim().replacen(',', ".", 1);
    let bytes = normalized.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return None;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && matches!(bytes[exp_end], b'+' | b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    normalized[..end].parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE_EXPORT: &str = "\"Messzeitpunkt\";\"Download (Mbit/s)\";\"Upload (Mbit/s)\";\"Ping (ms)\";\"Test-ID\"\n\"22.01.2026 10:15:03\";\"123,4\";\"38,91\";\"17\";\"a3f9\"\n";

    #[test]
    fn reads_site_export() {
        let result = extract(SITE_EXPORT);
        assert_eq!(result.download, Some(123.4));
        assert_eq!(result.upload, Some(38.91));
        assert_eq!(result.latency, Some(17.0));
    }

    #[test]
    fn download_cell_uses_decimal_comma() {
        let result = extract("\"download\"\n\"123,4\"");
        assert_eq!(result.download, Some(123.4));
        assert_eq!(result.upload, None);
        assert_eq!(result.latency, None);
    }

    #[test]
    fn regional_synonyms_are_matched() {
        let result =
            extract("Datenrate Empfang;Datenrate Senden;Laufzeit\n50,5;10,25;22,0\r\n");
        assert_eq!(result.download, Some(50.5));
        assert_eq!(result.upload, Some(10.25));
        assert_eq!(result.latency, Some(22.0));
    }

    #[test]
    fn header_matching_several_categories_prefers_download() {
        let result = extract("\"download ping\";\"upload\"\n\"5\";\"6\"");
        assert_eq!(result.download, Some(5.0));
        assert_eq!(result.latency, None);
        assert_eq!(result.upload, Some(6.0));
    }

    #[test]
    fn unparsable_and_unmatched_columns_are_ignored() {
        let result = extract("\"Download\";\"Upload\";\"Anbieter\"\n\"n/a\";\"12\";\"7,5\"");
        assert_eq!(result.download, None);
        assert_eq!(result.upload, Some(12.0));
        assert_eq!(result.latency, None);
    }

    #[test]
    fn trailing_units_are_tolerated() {
        let result = extract("Download;Ping\n\"95,2 Mbit/s\";\"12 ms\"");
        assert_eq!(result.download, Some(95.2));
        assert_eq!(result.latency, Some(12.0));
    }

    #[test]
    fn byte_order_mark_is_skipped() {
        let result = extract("\u{feff}\"Download\"\n\"1,5\"");
        assert_eq!(result.download, Some(1.5));
    }

    #[test]
    fn malformed_or_short_input_yields_nothing() {
        for raw in [
            "",
            "\n",
            "\"Download\"",
            "Download;Upload",
            ";;;\n;;;",
            "\"\n\"",
            "Download\n\"\"",
            "Download\n-",
            "Download\n.",
            "Download\nNaN",
            "Download\ninfinity",
            "ümlaut;€\n€;ü",
            "\"\"\"\";\n\";\"\"",
        ] {
            let result = extract(raw);
            assert!(result.is_empty(), "input {raw:?} produced {result:?}");
        }
    }

    #[test]
    fn custom_vocabulary_is_respected() {
        let extractor = ResultExtractor::new(HeaderVocabulary {
            download: vec!["dl".into()],
            upload: vec!["ul".into()],
            latency: vec!["rtt".into()],
        });
        let result = extractor.extract("DL;UL;RTT;Download\n1;2;3;4");
        assert_eq!(result.download, Some(1.0));
        assert_eq!(result.upload, Some(2.0));
        assert_eq!(result.latency, Some(3.0));
    }

    #[test]
    fn parse_decimal_reads_numeric_prefix() {
        assert_eq!(parse_decimal("-3,5"), Some(-3.5));
        assert_eq!(parse_decimal(",5"), Some(0.5));
        assert_eq!(parse_decimal("7."), Some(7.0));
        assert_eq!(parse_decimal("2e3x"), Some(2000.0));
        assert_eq!(parse_decimal("1e"), Some(1.0));
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal("1e999"), None);
    }
}
