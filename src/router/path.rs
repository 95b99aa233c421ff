//! Path helpers used by the gateway's route table.

use std::borrow::Cow;
use std::collections::BTreeMap;

/// Named parameters captured from `:name` template segments.
pub type PathParams = BTreeMap<String, String>;

/// Split a raw request target into its path and optional query string.
pub fn split_path_and_query(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (raw, None),
    }
}

/// Canonicalize a request path.
///
/// Drops any query string, trims whitespace and removes a single trailing
/// slash. An empty path becomes `/`, and `/` itself is never stripped.
pub fn normalize_path(raw: &str) -> String {
    let (path, _) = split_path_and_query(raw);
    let path = path.trim();

    if path.is_empty() || path == "/" {
        return "/".to_string();
    }

    path.strip_suffix('/').unwrap_or(path).to_string()
}

/// Parse a query string into a map. Later duplicates win.
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Match a request path against a route template.
///
/// Returns the captured parameters when every segment lines up, `None`
/// otherwise. Literal segments compare case-sensitively; captured values
/// are percent-decoded, falling back to the raw segment when decoding fails.
pub fn match_path(template: &str, path: &str) -> Option<PathParams> {
    let template_segments: Vec<&str> = segments(template).collect();
    let path_segments: Vec<&str> = segments(path).collect();

    if template_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = PathParams::new();
    for (expected, actual) in template_segments.iter().zip(&path_segments) {
        match expected.strip_prefix(':') {
            Some(name) => {
                params.insert(name.to_string(), decode_segment(actual).into_owned());
            }
            None if expected == actual => {}
            None => return None,
        }
    }

    Some(params)
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn decode_segment(segment: &str) -> Cow<'_, str> {
    urlencoding::decode(segment).unwrap_or(Cow::Borrowed(segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_query_and_trailing_slash() {
        assert_eq!(normalize_path("/v1/foo/?x=1"), "/v1/foo");
        assert_eq!(normalize_path("  /v1/foo  "), "/v1/foo");
        assert_eq!(normalize_path("/v1/foo"), "/v1/foo");
    }

    #[test]
    fn test_normalize_root_and_empty() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("   "), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/?a=b"), "/");
    }

    #[test]
    fn test_normalize_removes_only_one_trailing_slash() {
        assert_eq!(normalize_path("/v1/foo//"), "/v1/foo/");
    }

    #[test]
    fn test_match_captures_params() {
        let params = match_path("/v1/foo/:id", "/v1/foo/123").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("123"));
    }

    #[test]
    fn test_match_rejects_segment_count_mismatch() {
        assert!(match_path("/v1/foo/:id", "/v1/foo/123/bar").is_none());
        assert!(match_path("/v1/foo/:id", "/v1/foo").is_none());
    }

    #[test]
    fn test_match_rejects_literal_mismatch() {
        assert!(match_path("/v1/foo/:id", "/v1/bar/123").is_none());
        assert!(match_path("/v1/foo", "/v1/FOO").is_none());
    }

    #[test]
    fn test_match_decodes_params() {
        let params = match_path("/files/:name/:owner", "/files/hello%20world/a%2Fb").unwrap();
        assert_eq!(params["name"], "hello world");
        assert_eq!(params["owner"], "a/b");
    }

    #[test]
    fn test_match_keeps_raw_segment_on_bad_encoding() {
        let params = match_path("/files/:name", "/files/%E0%A4%A").unwrap();
        assert_eq!(params["name"], "%E0%A4%A");
    }

    #[test]
    fn test_match_root() {
        assert_eq!(match_path("/", "/"), Some(PathParams::new()));
        assert!(match_path("/", "/a").is_none());
    }

    #[test]
    fn test_parse_query_last_duplicate_wins() {
        let query = parse_query("x=1&y=hello+world&x=2");
        assert_eq!(query["x"], "2");
        assert_eq!(query["y"], "hello world");
    }

    #[test]
    fn test_split_path_and_query() {
        assert_eq!(split_path_and_query("/a?b=c"), ("/a", Some("b=c")));
        assert_eq!(split_path_and_query("/a"), ("/a", None));
    }
}
