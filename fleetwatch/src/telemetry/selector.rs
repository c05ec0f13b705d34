use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A metric name plus the label values a series must carry to be selected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl Selector {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// True when every selector label is present in `labels` with the same value.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.labels
            .iter()
            .all(|(key, expected)| labels.get(key).map_or(false, |actual| actual == expected))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.labels.is_empty() {
            let pairs: Vec<String> = self.labels.iter().map(|(k, v)| format!("{k}={v:?}")).collect();
            write!(f, "{{{}}}", pairs.join(","))?;
        }
        Ok(())
    }
}

/// Parses `metric_name{key="value",...}`. Parsing never fails: malformed label tokens are dropped.
pub fn parse_selector(raw: &str) -> Selector {
    let raw = raw.trim();
    if raw.is_empty() {
        return Selector::default();
    }

    let Some(open) = raw.find('{') else {
        return Selector { name: raw.to_string(), labels: BTreeMap::new() };
    };

    let name = raw[..open].trim().to_string();
    let rest = &raw[open + 1..];
    let body = match rest.rfind('}') {
        Some(close) => &rest[..close],
        None => rest,
    };

    let labels = split_label_pairs(body)
        .into_iter()
        .filter_map(parse_label_pair)
        .collect();

    Selector { name, labels }
}

/// Splits on commas outside double-quoted values, honoring backslash escapes inside quotes.
fn split_label_pairs(body: &str) -> Vec<&str> {
    let mut pairs = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (idx, ch) in body.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }

        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                pairs.push(&body[start..idx]);
                start = idx + 1;
            },
            _ => {},
        }
    }

    pairs.push(&body[start..]);
    pairs
}

fn parse_label_pair(pair: &str) -> Option<(String, String)> {
    let pair = pair.trim();
    let (key, value) = pair.split_once('=')?;
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() || value.is_empty() {
        return None;
    }

    Some((key.to_string(), unquote(value)))
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        if let Some(unescaped) = unescape(&value[1..value.len() - 1]) {
            return unescaped;
        }
    }

    value.trim_matches('"').to_string()
}

/// Standard string escapes; `None` on a malformed escape sequence.
pub(crate) fn unescape(quoted: &str) -> Option<String> {
    let mut result = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            if ch == '"' {
                return None;
            }
            result.push(ch);
            continue;
        }

        match chars.next()? {
            '\\' => result.push('\\'),
            '"' => result.push('"'),
            '\'' => result.push('\''),
            'n' => result.push('\n'),
            't' => result.push('\t'),
            'r' => result.push('\r'),
            'u' => {
                let code: String = chars.by_ref().take(4).collect();
                if code.len() != 4 {
                    return None;
                }
                let code = u32::from_str_radix(&code, 16).ok()?;
                result.push(char::from_u32(code)?);
            },
            _ => return None,
        }
    }

    Some(result)
}
