use std::collections::BTreeMap;

/// A case-insensitive HTTP header map.
///
/// Keys are normalized to Title-Case on every insert (`Content-Length`,
/// `Cache-Control`, ...) so downstream lookups never need to guess the case
/// a particular client or origin used on the wire. Backed by a `BTreeMap`
/// for deterministic iteration order; the wire protocol itself does not
/// guarantee header order survives a round trip (spec's round-trip
/// property is explicitly "modulo header ordering").
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderMap {
    inner: BTreeMap<String, String>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header, normalizing `name` to Title-Case. Overwrites any
    /// existing value for the same (case-insensitive) name.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.inner.insert(title_case(name), value.into());
    }

    /// Looks up a header case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(&title_case(name)).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&title_case(name))
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.inner.remove(&title_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn content_length(&self) -> Option<usize> {
        self.get("Content-Length")?.trim().parse().ok()
    }

    pub fn is_chunked(&self) -> bool {
        self.get("Transfer-Encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }

    /// Splits `Cache-Control` on `", "` into its directives. Empty when the
    /// header is absent.
    pub fn cache_control(&self) -> Vec<String> {
        match self.get("Cache-Control") {
            Some(value) => value.split(", ").map(str::to_string).collect(),
            None => Vec::new(),
        }
    }

    /// The `max-age=N` directive in seconds, or `None` if absent/unparseable.
    pub fn max_age(&self) -> Option<u64> {
        self.cache_control().iter().find_map(|directive| {
            directive
                .strip_prefix("max-age=")
                .and_then(|n| n.parse::<u64>().ok())
        })
    }

    pub fn has_no_store(&self) -> bool {
        self.cache_control().iter().any(|d| d == "no-store")
    }
}

/// Normalizes a header name to Title-Case: each hyphen-separated word gets
/// an uppercase first letter and lowercase remainder (`content-length` ->
/// `Content-Length`).
fn title_case(name: &str) -> String {
    name.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_on_insert() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", "5");
        headers.insert("HOST", "example.test");
        assert_eq!(headers.get("Content-Length"), Some("5"));
        assert_eq!(headers.get("content-length"), Some("5"));
        assert_eq!(headers.get("host"), Some("example.test"));
    }

    #[test]
    fn cache_control_directives_split_on_comma_space() {
        let mut headers = HeaderMap::new();
        headers.insert("Cache-Control", "max-age=60, no-cache");
        assert_eq!(
            headers.cache_control(),
            vec!["max-age=60".to_string(), "no-cache".to_string()]
        );
        assert_eq!(headers.max_age(), Some(60));
    }

    #[test]
    fn max_age_absent_is_none() {
        let headers = HeaderMap::new();
        assert_eq!(headers.max_age(), None);
        assert!(!headers.has_no_store());
    }

    #[test]
    fn no_store_detected() {
        let mut headers = HeaderMap::new();
        headers.insert("Cache-Control", "no-store");
        assert!(headers.has_no_store());
    }
}
