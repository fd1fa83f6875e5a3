//! Record codec: converts between a file's raw text and an ordered
//! frontmatter map plus free-form body.
//!
//! Decoding never fails: a record without a well-formed frontmatter block is
//! treated as all-body with empty metadata. Encoding writes the canonical
//! form (`---`, `key: value` lines in map order, `---`, blank line, body),
//! which round-trips byte-for-byte through `decode`.

/// One frontmatter value. Values that parse as plain finite numbers are
/// stored as numbers on read; bracketed values become lists.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Number(f64),
    List(Vec<String>),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(number) => Some(*number),
            Value::Text(text) => text.trim().parse().ok().filter(|n: &f64| n.is_finite()),
            Value::List(_) => None,
        }
    }

    fn render(&self) -> String {
        match self {
            Value::Text(text) => text.clone(),
            Value::Number(number) => render_number(*number),
            Value::List(items) => format!("[{}]", items.join(", ")),
        }
    }
}

/// Integers print without a trailing `.0` so `readiness: 1` survives a
/// round-trip unchanged.
fn render_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        format!("{number}")
    }
}

/// Ordered key/value metadata. Insertion order is preserved through edit
/// round-trips, and keys this system does not understand pass through
/// verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    entries: Vec<(String, Value)>,
}

impl Frontmatter {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Replaces an existing key in place, or appends a new one.
    pub fn set(&mut self, key: &str, value: Value) {
        match self.entries.iter_mut().find(|(name, _)| name == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.entries.iter()
    }
}

/// Splits raw record text into frontmatter and body. Fail-soft: malformed
/// structure yields an empty map and the original text as body.
pub fn decode(text: &str) -> (Frontmatter, String) {
    let Some(first_newline) = text.find('\n') else {
        return (Frontmatter::default(), text.to_string());
    };
    if text[..first_newline].trim_end() != "---" {
        return (Frontmatter::default(), text.to_string());
    }

    let rest = &text[first_newline + 1..];
    let mut block_end = None;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            block_end = Some((offset, offset + line.len()));
            break;
        }
        offset += line.len();
    }
    let Some((block_end, body_start)) = block_end else {
        // No closing marker: not a frontmatter block at all.
        return (Frontmatter::default(), text.to_string());
    };

    let mut frontmatter = Frontmatter::default();
    for line in rest[..block_end].lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some(colon) = trimmed.find(':') else {
            continue;
        };
        let key = trimmed[..colon].trim();
        let raw = trimmed[colon + 1..].trim();
        frontmatter.entries.push((key.to_string(), parse_value(raw)));
    }

    // Drop the single separator blank line, nothing more, so a body that
    // itself begins with a newline survives a round-trip.
    let mut body = &rest[body_start..];
    body = body.strip_prefix("\r\n").or_else(|| body.strip_prefix('\n')).unwrap_or(body);
    (frontmatter, body.to_string())
}

fn parse_value(raw: &str) -> Value {
    if raw.starts_with('[') && raw.ends_with(']') {
        let inner = &raw[1..raw.len() - 1];
        let items = inner
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect();
        return Value::List(items);
    }
    if let Ok(number) = raw.parse::<f64>() {
        if number.is_finite() {
            return Value::Number(number);
        }
    }
    Value::Text(raw.to_string())
}

/// Renders a record back to text. A record with no metadata is just its body.
pub fn encode(frontmatter: &Frontmatter, body: &str) -> String {
    if frontmatter.is_empty() {
        return body.to_string();
    }
    let mut out = String::from("---\n");
    for (key, value) in frontmatter.iter() {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(&value.render());
        out.push('\n');
    }
    out.push_str("---\n\n");
    out.push_str(body);
    out
}

// ── Tests ────────────────────────────────────────────────────────────────────
