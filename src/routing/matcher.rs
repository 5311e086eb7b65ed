use std::cmp::Ordering;
use std::str::FromStr;

use http::Request;
use thiserror::Error;

use super::expr::{Expr, ExprError};

#[derive(Debug, Error)]
pub(crate) enum MatcherError {
    #[error(transparent)]
    Expression(#[from] ExprError),
    #[error("no route for expression `{0}`")]
    UnknownRoute(String),
}

/// Maps match expressions to payloads and resolves requests against them.
pub(crate) trait RouteMatcher<P> {
    /// Installs `payload` under `expression`, replacing any payload already stored there.
    /// A malformed expression leaves the table unchanged.
    fn upsert_route(&mut self, expression: &str, payload: P) -> Result<(), MatcherError>;

    fn remove_route(&mut self, expression: &str) -> Result<P, MatcherError>;

    fn route<B>(&self, req: &Request<B>) -> Option<&P>;
}

#[derive(Debug)]
struct Route<P> {
    expression: String,
    expr: Expr,
    payload: P,
}

impl<P> Route<P> {
    /// More predicates first, then longer expressions, then lexical order.
    fn precedence(&self, other: &Self) -> Ordering {
        other
            .expr
            .predicate_count()
            .cmp(&self.expr.predicate_count())
            .then_with(|| other.expression.len().cmp(&self.expression.len()))
            .then_with(|| self.expression.cmp(&other.expression))
    }
}

/// Route matcher over [`Expr`] match expressions.
///
/// Routes are kept in precedence order so resolution returns the most specific match.
#[derive(Debug)]
pub(crate) struct ExprMatcher<P> {
    routes: Vec<Route<P>>,
}

impl<P> Default for ExprMatcher<P> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<P> ExprMatcher<P> {
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }

    fn position(&self, expression: &str) -> Option<usize> {
        self.routes
            .iter()
            .position(|route| route.expression == expression)
    }
}

impl<P> RouteMatcher<P> for ExprMatcher<P> {
    fn upsert_route(&mut self, expression: &str, payload: P) -> Result<(), MatcherError> {
        let expr = Expr::from_str(expression)?;

        if let Some(index) = self.position(expression) {
            let route = &mut self.routes[index];
            route.expr = expr;
            route.payload = payload;
            return Ok(());
        }

        let route = Route {
            expression: expression.to_string(),
            expr,
            payload,
        };
        let index = self
            .routes
            .partition_point(|existing| existing.precedence(&route) == Ordering::Less);
        self.routes.insert(index, route);

        Ok(())
    }

    fn remove_route(&mut self, expression: &str) -> Result<P, MatcherError> {
        let index = self
            .position(expression)
            .ok_or_else(|| MatcherError::UnknownRoute(expression.to_string()))?;

        Ok(self.routes.remove(index).payload)
    }

    fn route<B>(&self, req: &Request<B>) -> Option<&P> {
        self.routes
            .iter()
            .find(|route| route.expr.matches(req))
            .map(|route| &route.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(host: &str, path: &str) -> Request<()> {
        Request::builder()
            .uri(path)
            .header("host", host)
            .body(())
            .unwrap()
    }

    #[test]
    fn most_specific_route_wins() {
        let mut matcher = ExprMatcher::default();
        matcher.upsert_route(r#"Host("a.test")"#, "site").unwrap();
        matcher
            .upsert_route(r#"Host("a.test") && PathPrefix("/api")"#, "api")
            .unwrap();

        assert_eq!(matcher.route(&request("a.test", "/api/v1")), Some(&"api"));
        assert_eq!(matcher.route(&request("a.test", "/index.html")), Some(&"site"));
        assert_eq!(matcher.route(&request("b.test", "/api")), None);
    }

    #[test]
    fn upsert_replaces_payload_for_same_expression() {
        let mut matcher = ExprMatcher::default();
        matcher.upsert_route(r#"Host("a.test")"#, 1).unwrap();
        matcher.upsert_route(r#"Host("a.test")"#, 2).unwrap();

        assert_eq!(matcher.len(), 1);
        assert_eq!(matcher.route(&request("a.test", "/")), Some(&2));
    }

    #[test]
    fn malformed_upsert_leaves_table_untouched() {
        let mut matcher = ExprMatcher::default();
        matcher.upsert_route(r#"Host("a.test")"#, 1).unwrap();

        assert!(matcher.upsert_route(r#"Host("a.test"#, 2).is_err());
        assert_eq!(matcher.len(), 1);
        assert_eq!(matcher.route(&request("a.test", "/")), Some(&1));
    }

    #[test]
    fn remove_unknown_route_fails() {
        let mut matcher: ExprMatcher<u8> = ExprMatcher::default();

        assert!(matches!(
            matcher.remove_route(r#"Host("a.test")"#),
            Err(MatcherError::UnknownRoute(_))
        ));
    }
}
