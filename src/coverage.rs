//! Cobertura coverage report parsing.
//!
//! Coverage is diagnostic data: every failure mode (unreadable file,
//! malformed XML, missing or non-numeric `line-rate`) yields `None`.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;
use tracing::debug;

/// Read a Cobertura report and return line coverage as a percentage
/// rounded to two decimals.
#[must_use]
pub fn parse_cobertura(path: &Path) -> Option<f64> {
    match std::fs::read_to_string(path) {
        Ok(xml) => parse_cobertura_str(&xml),
        Err(e) => {
            debug!("Coverage report {} unreadable: {}", path.display(), e);
            None
        }
    }
}

/// Parse Cobertura XML text and return the root `line-rate` as a percentage.
#[must_use]
pub fn parse_cobertura_str(xml: &str) -> Option<f64> {
    let mut reader = Reader::from_str(xml);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.name().as_ref() != b"coverage" {
                    debug!("Coverage report root is not <coverage>");
                    return None;
                }
                let rate = e
                    .try_get_attribute("line-rate")
                    .ok()
                    .flatten()
                    .and_then(|attr| attr.unescape_value().ok())
                    .and_then(|value| value.trim().parse::<f64>().ok())
                    .filter(|rate| rate.is_finite());

                if rate.is_none() {
                    debug!("Coverage report has no usable line-rate attribute");
                    return None;
                }
                // The root must be well-formed through to the end.
                if !drain(&mut reader) {
                    return None;
                }
                return rate.map(to_percent);
            }
            Ok(Event::Eof) => {
                debug!("Coverage report has no root element");
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Malformed coverage report: {}", e);
                return None;
            }
        }
    }
}

fn drain(reader: &mut Reader<&[u8]>) -> bool {
    loop {
        match reader.read_event() {
            Ok(Event::Eof) => return true,
            Ok(_) => {}
            Err(e) => {
                debug!("Malformed coverage report: {}", e);
                return false;
            }
        }
    }
}

fn to_percent(rate: f64) -> f64 {
    (rate * 100.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REPORT: &str = r#"<?xml version="1.0" ?>
<!DOCTYPE coverage SYSTEM "https://raw.githubusercontent.com/cobertura/web/master/htdocs/xml/coverage-04.dtd">
<coverage version="7.4.0" timestamp="1700000000000" lines-valid="9" lines-covered="8" line-rate="0.8889" branches-covered="0" branches-valid="0" branch-rate="0" complexity="0">
	<sources>
		<source>/work/HumanEval</source>
	</sources>
	<packages>
		<package name="." line-rate="0.8889" branch-rate="0" complexity="0">
		</package>
	</packages>
</coverage>
"#;

    #[test]
    fn test_parses_line_rate_as_percent() {
        assert_eq!(parse_cobertura_str(REPORT), Some(88.89));
    }

    #[test]
    fn test_full_and_zero_coverage() {
        assert_eq!(parse_cobertura_str(r#"<coverage line-rate="1"/>"#), Some(100.0));
        assert_eq!(parse_cobertura_str(r#"<coverage line-rate="0"></coverage>"#), Some(0.0));
    }

    #[test]
    fn test_rounds_to_two_decimals() {
        assert_eq!(
            parse_cobertura_str(r#"<coverage line-rate="0.123456"/>"#),
            Some(12.35)
        );
    }

    #[test]
    fn test_missing_attribute_is_none() {
        assert_eq!(parse_cobertura_str(r#"<coverage branch-rate="0.5"/>"#), None);
    }

    #[test]
    fn test_non_numeric_rate_is_none() {
        assert_eq!(parse_cobertura_str(r#"<coverage line-rate="high"/>"#), None);
    }

    #[test]
    fn test_malformed_xml_is_none() {
        assert_eq!(parse_cobertura_str(r#"<coverage line-rate="0.5"><packages></coverage>"#), None);
        assert_eq!(parse_cobertura_str("not xml at all"), None);
        assert_eq!(parse_cobertura_str(""), None);
    }

    #[test]
    fn test_wrong_root_is_none() {
        assert_eq!(parse_cobertura_str(r#"<report line-rate="0.5"/>"#), None);
    }

    #[test]
    fn test_reads_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("coverage.xml");
        std::fs::write(&path, REPORT).unwrap();

        assert_eq!(parse_cobertura(&path), Some(88.89));
        assert_eq!(parse_cobertura(&temp.path().join("missing.xml")), None);
    }
}
