//! Ordered HTTP header collection
//!
//! Header and trailer blocks keep insertion order and allow repeated names,
//! the way they travel on the wire. Names are stored lower-cased; HTTP/2
//! pseudo-headers (`:method`, `:path`, `:authority`, `:status`) live in the
//! same map as ordinary headers.

use std::cell::RefCell;
use std::rc::Rc;

/// Request method pseudo-header
pub const METHOD: &str = ":method";
/// Request path pseudo-header
pub const PATH: &str = ":path";
/// Request authority pseudo-header
pub const AUTHORITY: &str = ":authority";
/// Response status pseudo-header
pub const STATUS: &str = ":status";
/// Content length header
pub const CONTENT_LENGTH: &str = "content-length";

/// Header map owned by the host and shared with filters for one stream
pub type HeaderMapRef = Rc<RefCell<HeaderMap>>;

/// Ordered multi-map of header names to values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Create an empty header map
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the map for sharing with a filter
    pub fn into_shared(self) -> HeaderMapRef {
        Rc::new(RefCell::new(self))
    }

    /// Append a value, keeping any existing values for the same name
    pub fn add(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value for `name`, in insertion order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Set `name` to a single value.
    ///
    /// The first existing entry keeps its position; later duplicates are removed.
    /// A name that is not present is appended.
    pub fn replace(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref();
        let value = value.into();
        let mut replaced = false;
        self.entries.retain_mut(|(key, existing)| {
            if !key.eq_ignore_ascii_case(name) {
                return true;
            }
            if replaced {
                return false;
            }
            replaced = true;
            *existing = value.clone();
            true
        });
        if !replaced {
            self.add(name, value);
        }
    }

    /// Remove every value for `name`, returning how many were removed
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// Whether any value exists for `name`
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate over `(name, value)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Number of entries, counting repeated names separately
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `:method` pseudo-header
    pub fn method(&self) -> Option<&str> {
        self.get(METHOD)
    }

    /// `:path` pseudo-header
    pub fn path(&self) -> Option<&str> {
        self.get(PATH)
    }

    /// `:authority` pseudo-header
    pub fn authority(&self) -> Option<&str> {
        self.get(AUTHORITY)
    }

    /// `:status` pseudo-header
    pub fn status(&self) -> Option<&str> {
        self.get(STATUS)
    }

    /// Set `content-length` to `len`
    pub fn set_content_length(&mut self, len: usize) {
        self.replace(CONTENT_LENGTH, len.to_string());
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderMap
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in iter {
            map.add(name, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.add("X-Request-Id", "abc");

        assert_eq!(headers.get("x-request-id"), Some("abc"));
        assert_eq!(headers.get("X-REQUEST-ID"), Some("abc"));
        assert_eq!(headers.iter().next(), Some(("x-request-id", "abc")));
    }

    #[test]
    fn test_replace_keeps_first_position() {
        let mut headers: HeaderMap = [("a", "1"), ("b", "2"), ("a", "3")].into_iter().collect();

        headers.replace("a", "9");

        let entries: Vec<_> = headers.iter().collect();
        assert_eq!(entries, vec![("a", "9"), ("b", "2")]);

        headers.replace("c", "4");
        assert_eq!(headers.get("c"), Some("4"));
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn test_remove_and_get_all() {
        let mut headers: HeaderMap = [("set-cookie", "a=1"), ("set-cookie", "b=2")]
            .into_iter()
            .collect();

        assert_eq!(headers.get_all("set-cookie").collect::<Vec<_>>(), vec!["a=1", "b=2"]);
        assert_eq!(headers.remove("set-cookie"), 2);
        assert!(headers.is_empty());
        assert_eq!(headers.remove("set-cookie"), 0);
    }

    #[test]
    fn test_pseudo_headers() {
        let mut headers: HeaderMap = [(METHOD, "GET"), (PATH, "/"), (AUTHORITY, "example.com")]
            .into_iter()
            .collect();
        headers.set_content_length(12);

        assert_eq!(headers.method(), Some("GET"));
        assert_eq!(headers.path(), Some("/"));
        assert_eq!(headers.authority(), Some("example.com"));
        assert_eq!(headers.status(), None);
        assert_eq!(headers.get(CONTENT_LENGTH), Some("12"));
    }
}
