//! Conversions from `http` types to the primitive shapes the payload
//! builder takes. Shared by the server-side adapters.

use http::HeaderMap;
use std::collections::HashMap;

/// Copy a header map into name -> ordered value list form.
///
/// The `http` crate normalizes header names to lowercase on receipt;
/// values that are not valid UTF-8 are carried over lossily.
pub fn headers_to_map(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers.iter() {
        map.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    map
}

/// Parse a raw query string into key -> ordered value list form,
/// percent-decoding both sides. Repeated keys keep every value in the
/// order observed.
pub fn parse_query(query: Option<&str>) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();
    let Some(query) = query else {
        return params;
    };

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or_default();
        let value = parts.next().unwrap_or_default();
        params
            .entry(decode(key))
            .or_default()
            .push(decode(value));
    }
    params
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}
