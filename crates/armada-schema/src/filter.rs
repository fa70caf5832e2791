use crate::SchemaError;
use regex::Regex;

/// Name filter used by every CLI listing. Matching always starts at the
/// beginning of the name; wildcards must also cover the whole name.
#[derive(Debug, Clone)]
pub struct NamePattern {
    regex: Option<Regex>,
}

impl NamePattern {
    /// Compile `pattern` as a wildcard (`*`, `?`, `[...]`, `[!...]`) or, with
    /// `regex`, as a regular expression.
    pub fn new(pattern: &str, regex: bool) -> Result<Self, SchemaError> {
        let source = if regex {
            format!("^(?:{pattern})")
        } else {
            format!("^(?:{})$", translate_wildcard(pattern))
        };
        let regex = Regex::new(&source).map_err(|e| SchemaError::InvalidPattern {
            pattern: pattern.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self { regex: Some(regex) })
    }

    /// Matches every name.
    pub fn any() -> Self {
        Self { regex: None }
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(name),
            None => true,
        }
    }
}

impl Default for NamePattern {
    fn default() -> Self {
        Self::any()
    }
}

fn translate_wildcard(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut class = String::new();
                let mut raw = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    raw.push(inner);
                    if inner == '\\' || inner == '[' {
                        class.push('\\');
                    }
                    class.push(inner);
                }
                if closed && !class.is_empty() && class != "^" {
                    out.push('[');
                    out.push_str(&class);
                    out.push(']');
                } else {
                    // Unterminated or empty brackets match literally.
                    out.push_str(&regex::escape("["));
                    if class.starts_with('^') {
                        out.push('!');
                    }
                    out.push_str(&regex::escape(&raw));
                    if closed {
                        out.push_str(&regex::escape("]"));
                    }
                }
            }
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out
}

/// Indices of the items whose name matches, ordered by name.
pub fn select<T>(items: &[T], pattern: &NamePattern, name: impl Fn(&T) -> String) -> Vec<usize> {
    let mut matched: Vec<(String, usize)> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let n = name(item);
            pattern.matches(&n).then_some((n, i))
        })
        .collect();
    matched.sort();
    matched.into_iter().map(|(_, i)| i).collect()
}
