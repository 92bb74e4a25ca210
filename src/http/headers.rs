/// Case-preserving header map.
///
/// Keys compare case-insensitively, so inserting an existing key updates it
/// in place, but the original casing is kept for serialization. Iteration
/// order is insertion order.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    /// Headers as (original_name, value) pairs
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
        }
    }

    /// Insert a header, updating in place on a case-insensitive key match.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        if let Some((_, v)) = self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            *v = value;
        } else {
            self.headers.push((name, value));
        }
    }

    /// Get a header value (case-insensitive lookup).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether a header is present (case-insensitive).
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All headers in insertion order, original casing.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}
