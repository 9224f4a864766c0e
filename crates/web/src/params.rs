//! Request parameters from the query string and url-encoded form bodies.

use std::collections::HashMap;

use bytes::Bytes;
use http::HeaderMap;
use http::header::CONTENT_TYPE;
use tracing::debug;

/// An ordered multimap of request parameters.
///
/// Keys are case-sensitive and keep the order they first appeared in; the values of
/// one key keep their arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    entries: Vec<(String, Vec<String>)>,
    // key -> position in `entries`
    index: HashMap<String, usize>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query parameters first, then the parameters of an `application/x-www-form-urlencoded` body.
    pub fn from_request(query: Option<&str>, headers: &HeaderMap, body: &Bytes) -> Self {
        let mut parameters = Self::new();
        if let Some(query) = query {
            parameters.extend_from_urlencoded(query.as_bytes());
        }
        if is_form(headers) && !body.is_empty() {
            parameters.extend_from_urlencoded(body);
        }
        parameters
    }

    /// Adds every pair of a url-encoded string; malformed input adds nothing.
    pub fn extend_from_urlencoded(&mut self, input: &[u8]) {
        match serde_urlencoded::from_bytes::<Vec<(String, String)>>(input) {
            Ok(pairs) => pairs.into_iter().for_each(|(key, value)| self.append(key, value)),
            Err(e) => debug!(cause = %e, "ignoring malformed url-encoded parameters"),
        }
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.index.get(&key) {
            Some(&position) => self.entries[position].1.push(value),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, vec![value]));
            }
        }
    }

    /// The first value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.index.get(key).map(|&position| self.entries[position].1.as_slice()).unwrap_or_default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(key, values)| (key.as_str(), values.as_slice()))
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<::mime::Mime>().ok())
        .is_some_and(|content_type| content_type.essence_str() == ::mime::APPLICATION_WWW_FORM_URLENCODED.essence_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn keeps_order_and_multiple_values() {
        let mut parameters = Parameters::new();
        parameters.extend_from_urlencoded(b"b=2&a=1&b=3&A=upper&empty=");

        let keys: Vec<_> = parameters.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, ["b", "a", "A", "empty"]);
        assert_eq!(parameters.get_all("b"), ["2", "3"]);
        assert_eq!(parameters.get("A"), Some("upper"));
        assert_eq!(parameters.get("empty"), Some(""));
        assert!(parameters.get_all("missing").is_empty());
        assert_eq!(parameters.len(), 4);
    }

    #[test]
    fn many_distinct_keys_keep_order() {
        const KEYS: usize = 100_000;
        let mut parameters = Parameters::new();
        for i in 0..KEYS {
            parameters.append(format!("k{i}"), i.to_string());
        }
        parameters.append("k0", "again");

        assert_eq!(parameters.len(), KEYS);
        assert_eq!(parameters.get_all("k0"), ["0", "again"]);
        assert_eq!(parameters.get("k99999"), Some("99999"));
        assert!(parameters.iter().enumerate().all(|(i, (key, _))| key == format!("k{i}")));
    }

    #[test]
    fn merges_query_and_form_body() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-www-form-urlencoded; charset=UTF-8"));
        let body = Bytes::from_static(b"name=lorem+ipsum&q=%C3%A8");

        let parameters = Parameters::from_request(Some("q=first"), &headers, &body);
        assert_eq!(parameters.get_all("q"), ["first", "è"]);
        assert_eq!(parameters.get("name"), Some("lorem ipsum"));
    }

    #[test]
    fn ignores_non_form_body() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let parameters = Parameters::from_request(None, &headers, &Bytes::from_static(b"a=1"));
        assert!(parameters.is_empty());
    }
}
