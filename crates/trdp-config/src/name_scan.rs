//! Textual "name pass" over the raw XML.
//!
//! The upstream TRDP schema's structural parse (driven by `quick_xml`
//! in `loader.rs`) does not surface a telegram's `name` attribute,
//! mirroring the real TCNOpen TRDP config library, whose structural
//! bindings carry `com_id`/`dataset_id`/exchange data but drop the
//! human-readable name. We recover it with a second, independent pass
//! over the same bytes: find every `<telegram ...>` tag and pull its
//! `com-id` and `name` attributes out with a small hand-written
//! scanner, keyed by `com_id`.

use std::collections::HashMap;

/// Scan raw XML text for `<telegram com-id="..." name="...">` tags and
/// return a `com_id -> name` map. Tags missing either attribute are
/// skipped (the loader falls back to a synthesized name).
pub fn scan_telegram_names(xml: &str) -> HashMap<u32, String> {
    let mut names = HashMap::new();
    let mut rest = xml;

    while let Some(tag_start) = rest.find("<telegram") {
        // Bail if "<telegram" is actually a prefix of a longer tag name
        // (e.g. "<telegramgroup"); require a tag-name boundary.
        let after = &rest[tag_start + "<telegram".len()..];
        if !after.starts_with(|c: char| c.is_whitespace() || c == '>' || c == '/') {
            rest = after;
            continue;
        }

        let Some(tag_end) = after.find('>') else {
            break;
        };
        let attrs_text = &after[..tag_end];

        if let (Some(com_id), Some(name)) = (
            scan_attribute(attrs_text, "com-id").and_then(|v| v.parse::<u32>().ok()),
            scan_attribute(attrs_text, "name"),
        ) {
            names.insert(com_id, name);
        }

        rest = &after[tag_end + 1..];
    }

    names
}

/// Find `key="value"` (or `key='value'`) within a tag's attribute text
/// and return the unescaped-at-the-syntax-level value. This is a
/// textual scan, not a full XML parser - it assumes well-formed
/// attribute quoting, which the structural pass already validated.
fn scan_attribute(attrs_text: &str, key: &str) -> Option<String> {
    let mut search_from = 0usize;
    loop {
        let rel = attrs_text[search_from..].find(key)?;
        let idx = search_from + rel;
        let before_ok = idx == 0
            || attrs_text[..idx]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_whitespace());
        let after = &attrs_text[idx + key.len()..];

        if before_ok && after.trim_start().starts_with('=') {
            let after_eq = after.trim_start()[1..].trim_start();
            let quote = after_eq.chars().next()?;
            if quote == '"' || quote == '\'' {
                let value_start = &after_eq[1..];
                let end = value_start.find(quote)?;
                return Some(value_start[..end].to_string());
            }
        }

        search_from = idx + key.len();
        if search_from >= attrs_text.len() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_telegram_name() {
        let xml = r#"<telegram com-id="1001" dataset-id="10" name="TrainStatus"/>"#;
        let names = scan_telegram_names(xml);
        assert_eq!(names.get(&1001), Some(&"TrainStatus".to_string()));
    }

    #[test]
    fn extracts_multiple_telegrams_regardless_of_attribute_order() {
        let xml = r#"
            <telegram name="First" com-id="1"/>
            <telegram com-id="2" dataset-id="5" name="Second" type="SOURCE"/>
        "#;
        let names = scan_telegram_names(xml);
        assert_eq!(names.get(&1), Some(&"First".to_string()));
        assert_eq!(names.get(&2), Some(&"Second".to_string()));
    }

    #[test]
    fn skips_telegram_missing_name() {
        let xml = r#"<telegram com-id="3" dataset-id="1"/>"#;
        let names = scan_telegram_names(xml);
        assert!(names.get(&3).is_none());
    }

    #[test]
    fn does_not_match_unrelated_tag_prefix() {
        let xml = r#"<telegramgroup com-id="9" name="Bogus"/><telegram com-id="4" name="Real"/>"#;
        let names = scan_telegram_names(xml);
        assert_eq!(names.get(&4), Some(&"Real".to_string()));
        assert!(names.get(&9).is_none());
    }
}
