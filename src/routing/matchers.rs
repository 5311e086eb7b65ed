use std::{iter::zip, str::FromStr};

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use regex::Regex;

/// Basically a type removing a trailing slash
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PathPrefix(Vec<String>);

impl PathPrefix {
    pub(crate) fn parse(string: &str) -> Self {
        let mut segments: Vec<&str> = string.split('/').collect();

        if segments.len() > 1 && segments.last().is_some_and(|segment| segment.is_empty()) {
            segments.pop();
        }

        Self(segments.into_iter().map(|s| s.to_string()).collect())
    }

    /// Match a string against a prefix on segment boundaries
    pub(crate) fn matches(&self, value_to_match: &str) -> bool {
        let segments: Vec<&str> = value_to_match.split('/').collect();
        let prefix = &self.0;

        if segments.len() < prefix.len() {
            return false;
        }

        zip(prefix, segments).all(|(prefix_segment, value_segment)| value_segment == prefix_segment)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum PathMatch {
    Exact(String),
    Prefix(PathPrefix),
    Regex(Regex),
}

impl PathMatch {
    pub(crate) fn matches(&self, value_to_match: &str) -> bool {
        match self {
            PathMatch::Exact(value) => value_to_match == value,
            PathMatch::Prefix(value) => value.matches(value_to_match),
            PathMatch::Regex(value) => value.is_match(value_to_match),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MethodMatch(Method);

impl MethodMatch {
    pub(crate) fn parse(s: &str) -> Result<Self, http::method::InvalidMethod> {
        Ok(Self(Method::from_str(&s.to_ascii_uppercase())?))
    }

    pub(crate) fn matches(&self, req_method: &Method) -> bool {
        self.0 == req_method
    }
}

#[derive(Debug, Clone)]
pub(crate) enum HeaderMatch {
    Exact { name: HeaderName, value: String },
    Regex { name: HeaderName, value: Regex },
}

impl HeaderMatch {
    pub(crate) fn matches(&self, header_map: &HeaderMap<HeaderValue>) -> bool {
        // Any value of a repeated header may satisfy the match; non-UTF-8 values never do.
        match self {
            Self::Exact { name, value } => header_map
                .get_all(name)
                .iter()
                .filter_map(|header_value| header_value.to_str().ok())
                .any(|header_value| header_value == value),
            Self::Regex { name, value } => header_map
                .get_all(name)
                .iter()
                .filter_map(|header_value| header_value.to_str().ok())
                .any(|header_value| value.is_match(header_value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matches() {
        let prefix = PathPrefix::parse("/abc");

        assert!(prefix.matches("/abc"));
        assert!(prefix.matches("/abc/def"));
        assert!(prefix.matches("/abc/def/"));
        assert!(prefix.matches("/abc/def/ghi"));
        assert!(!prefix.matches("/abcdef"));
    }

    #[test]
    fn trailing_slash_in_definition_is_ignored() {
        let prefix = PathPrefix::parse("/abc/");

        assert!(prefix.matches("/abc"));
        assert!(prefix.matches("/abc/def"));
        assert!(!prefix.matches("/abcdef"));
    }

    #[test]
    fn root_prefix_matches_everything() {
        let prefix = PathPrefix::parse("/");

        assert!(prefix.matches("/"));
        assert!(prefix.matches("/anything/at/all"));
    }

    #[test]
    fn method_match_is_case_insensitive_on_definition() {
        let method = MethodMatch::parse("get").unwrap();

        assert!(method.matches(&Method::GET));
        assert!(!method.matches(&Method::POST));
    }

    #[test]
    fn header_match_ignores_non_utf8_values() {
        let mut headers = HeaderMap::new();
        headers.append("x-env", HeaderValue::from_bytes(b"\xffbad").unwrap());
        headers.append("x-env", HeaderValue::from_static("prod"));

        let exact = HeaderMatch::Exact {
            name: HeaderName::from_static("x-env"),
            value: "prod".to_string(),
        };
        let regex = HeaderMatch::Regex {
            name: HeaderName::from_static("x-env"),
            value: Regex::new("^st").unwrap(),
        };

        assert!(exact.matches(&headers));
        assert!(!regex.matches(&headers));
    }
}
