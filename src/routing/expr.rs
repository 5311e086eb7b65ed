//! Match expressions such as `Host("a.test") && PathPrefix("/api")`.
//!
//! An expression is a conjunction of predicate calls. Each call takes one or two
//! string literals, written either in double quotes (with `\"` and `\\` escapes)
//! or in backticks (raw).

use std::str::FromStr;

use http::{HeaderName, Request};
use regex::Regex;
use thiserror::Error;

use super::host::{HostPattern, HostSpecParseError, RequestHost};
use super::matchers::{HeaderMatch, MethodMatch, PathMatch, PathPrefix};

#[derive(Debug, Error)]
pub(crate) enum ExprError {
    #[error("empty match expression")]
    Empty,
    #[error("unexpected end of match expression")]
    UnexpectedEnd,
    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar { offset: usize, found: char },
    #[error("unknown matcher function `{0}`")]
    UnknownFunction(String),
    #[error("`{function}` takes {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: usize,
        got: usize,
    },
    #[error("invalid host `{value}`: {reason}")]
    InvalidHost {
        value: String,
        reason: HostSpecParseError,
    },
    #[error("invalid method `{0}`")]
    InvalidMethod(String),
    #[error("invalid header name `{0}`")]
    InvalidHeaderName(String),
    #[error(transparent)]
    InvalidRegex(#[from] regex::Error),
}

#[derive(Debug, Clone)]
pub(crate) enum Predicate {
    Host(HostPattern),
    HostRegexp(Regex),
    Path(PathMatch),
    Method(MethodMatch),
    Header(HeaderMatch),
}

impl Predicate {
    fn matches<B>(&self, req: &Request<B>, host: Option<&(String, RequestHost)>) -> bool {
        match self {
            Predicate::Host(pattern) => host.is_some_and(|(_, parsed)| pattern.matches(parsed)),
            Predicate::HostRegexp(regex) => host.is_some_and(|(raw, _)| regex.is_match(raw)),
            Predicate::Path(path) => path.matches(req.uri().path()),
            Predicate::Method(method) => method.matches(req.method()),
            Predicate::Header(header) => header.matches(req.headers()),
        }
    }
}

/// A parsed match expression: every predicate must hold.
#[derive(Debug, Clone)]
pub(crate) struct Expr {
    predicates: Vec<Predicate>,
}

impl Expr {
    pub(crate) fn matches<B>(&self, req: &Request<B>) -> bool {
        let host = request_host(req).map(|raw| {
            let parsed = RequestHost::parse(&raw);
            (super::host::strip_port(&raw).to_string(), parsed)
        });

        self.predicates
            .iter()
            .all(|predicate| predicate.matches(req, host.as_ref()))
    }

    pub(crate) fn predicate_count(&self) -> usize {
        self.predicates.len()
    }
}

impl FromStr for Expr {
    type Err = ExprError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser {
            source,
            offset: 0,
        };
        parser.skip_whitespace();

        if parser.at_end() {
            return Err(ExprError::Empty);
        }

        let mut predicates = vec![parser.call()?];

        loop {
            parser.skip_whitespace();
            if parser.at_end() {
                break;
            }
            parser.expect_str("&&")?;
            predicates.push(parser.call()?);
        }

        Ok(Self { predicates })
    }
}

/// The host a request targets: the `Host` header, or the URI authority for
/// absolute-form requests.
fn request_host<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_ascii_lowercase)
        .or_else(|| req.uri().host().map(str::to_ascii_lowercase))
}

struct Parser<'a> {
    source: &'a str,
    offset: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.source[self.offset..]
    }

    fn at_end(&self) -> bool {
        self.rest().is_empty()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn unexpected(&self) -> ExprError {
        match self.peek() {
            Some(found) => ExprError::UnexpectedChar {
                offset: self.offset,
                found,
            },
            None => ExprError::UnexpectedEnd,
        }
    }

    fn expect_str(&mut self, token: &str) -> Result<(), ExprError> {
        self.skip_whitespace();
        if self.rest().starts_with(token) {
            self.offset += token.len();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn identifier(&mut self) -> Result<&'a str, ExprError> {
        self.skip_whitespace();
        let start = self.offset;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric()) {
            self.bump();
        }
        if start == self.offset {
            return Err(self.unexpected());
        }
        Ok(&self.source[start..self.offset])
    }

    fn string(&mut self) -> Result<String, ExprError> {
        self.skip_whitespace();
        match self.peek() {
            Some('`') => {
                self.bump();
                let start = self.offset;
                let len = self.rest().find('`').ok_or(ExprError::UnexpectedEnd)?;
                self.offset += len + 1;
                Ok(self.source[start..start + len].to_string())
            }
            Some('"') => {
                self.bump();
                let mut value = String::new();
                loop {
                    match self.bump().ok_or(ExprError::UnexpectedEnd)? {
                        '"' => return Ok(value),
                        '\\' => value.push(self.bump().ok_or(ExprError::UnexpectedEnd)?),
                        c => value.push(c),
                    }
                }
            }
            _ => Err(self.unexpected()),
        }
    }

    fn arguments(&mut self) -> Result<Vec<String>, ExprError> {
        self.expect_str("(")?;
        let mut args = vec![self.string()?];
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.bump();
                    args.push(self.string()?);
                }
                Some(')') => {
                    self.bump();
                    return Ok(args);
                }
                _ => return Err(self.unexpected()),
            }
        }
    }

    fn call(&mut self) -> Result<Predicate, ExprError> {
        let function = self.identifier()?;
        let args = self.arguments()?;

        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(ExprError::Arity {
                    function: function.to_string(),
                    expected,
                    got: args.len(),
                })
            }
        };

        let predicate = match function {
            "Host" => {
                arity(1)?;
                let pattern =
                    HostPattern::from_str(&args[0]).map_err(|reason| ExprError::InvalidHost {
                        value: args[0].clone(),
                        reason,
                    })?;
                Predicate::Host(pattern)
            }
            "HostRegexp" => {
                arity(1)?;
                Predicate::HostRegexp(Regex::new(&args[0])?)
            }
            "Path" => {
                arity(1)?;
                Predicate::Path(PathMatch::Exact(args[0].clone()))
            }
            "PathPrefix" => {
                arity(1)?;
                Predicate::Path(PathMatch::Prefix(PathPrefix::parse(&args[0])))
            }
            "PathRegexp" => {
                arity(1)?;
                Predicate::Path(PathMatch::Regex(Regex::new(&args[0])?))
            }
            "Method" => {
                arity(1)?;
                let method = MethodMatch::parse(&args[0])
                    .map_err(|_| ExprError::InvalidMethod(args[0].clone()))?;
                Predicate::Method(method)
            }
            "Header" | "HeaderRegexp" => {
                arity(2)?;
                let name = HeaderName::from_str(&args[0])
                    .map_err(|_| ExprError::InvalidHeaderName(args[0].clone()))?;
                let header = if function == "Header" {
                    HeaderMatch::Exact {
                        name,
                        value: args[1].clone(),
                    }
                } else {
                    HeaderMatch::Regex {
                        name,
                        value: Regex::new(&args[1])?,
                    }
                };
                Predicate::Header(header)
            }
            other => return Err(ExprError::UnknownFunction(other.to_string())),
        };

        Ok(predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(host: &str, method: &str, path: &str) -> Request<()> {
        Request::builder()
            .method(method)
            .uri(path)
            .header("host", host)
            .header("x-tenant", "blue")
            .body(())
            .unwrap()
    }

    fn expr(source: &str) -> Expr {
        Expr::from_str(source).unwrap()
    }

    #[test]
    fn host_expression() {
        let e = expr(r#"Host("a.test")"#);

        assert!(e.matches(&request("a.test", "GET", "/")));
        assert!(e.matches(&request("a.test:8443", "GET", "/")));
        assert!(!e.matches(&request("b.test", "GET", "/")));
    }

    #[test]
    fn conjunction_requires_every_predicate() {
        let e = expr(r#"Host("a.test") && PathPrefix("/api") && Method("POST")"#);

        assert_eq!(e.predicate_count(), 3);
        assert!(e.matches(&request("a.test", "POST", "/api/users")));
        assert!(!e.matches(&request("a.test", "GET", "/api/users")));
        assert!(!e.matches(&request("a.test", "POST", "/apiary")));
    }

    #[test]
    fn backtick_strings_are_raw() {
        let e = expr(r"PathRegexp(`^/v[0-9]+/`)");

        assert!(e.matches(&request("a.test", "GET", "/v2/items")));
        assert!(!e.matches(&request("a.test", "GET", "/items")));
    }

    #[test]
    fn escaped_quotes_in_strings() {
        let e = expr(r#"Header("x-tenant", "bl\"ue")"#);

        assert!(!e.matches(&request("a.test", "GET", "/")));
        assert!(expr(r#"Header("X-Tenant", "blue")"#).matches(&request("a.test", "GET", "/")));
    }

    #[test]
    fn host_regexp_sees_host_without_port() {
        let e = expr(r#"HostRegexp("^[a-z]+\\.test$")"#);

        assert!(e.matches(&request("abc.test:80", "GET", "/")));
        assert!(!e.matches(&request("abc.example", "GET", "/")));
    }

    #[test]
    fn malformed_expressions() {
        assert!(matches!(Expr::from_str("   "), Err(ExprError::Empty)));
        assert!(matches!(
            Expr::from_str(r#"Host("a.test""#),
            Err(ExprError::UnexpectedEnd)
        ));
        assert!(matches!(
            Expr::from_str(r#"Nope("x")"#),
            Err(ExprError::UnknownFunction(name)) if name == "Nope"
        ));
        assert!(matches!(
            Expr::from_str(r#"Host("a", "b")"#),
            Err(ExprError::Arity { expected: 1, got: 2, .. })
        ));
        assert!(matches!(
            Expr::from_str(r#"Host("bad_host.test")"#),
            Err(ExprError::InvalidHost { .. })
        ));
        assert!(matches!(
            Expr::from_str(r#"Host("a.test") || Host("b.test")"#),
            Err(ExprError::UnexpectedChar { found: '|', .. })
        ));
        assert!(matches!(
            Expr::from_str(r#"PathRegexp("(")"#),
            Err(ExprError::InvalidRegex(_))
        ));
    }
}
