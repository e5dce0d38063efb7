//! Route patterns and the ordered dispatch table.

use std::fmt;
use std::sync::Arc;

use http::Method;

use crate::handler::Handler;

/// A `"METHOD path"` or `"path"` glob selecting requests for a handler.
///
/// The method part is matched case-insensitively and defaults to any
/// method. Path segments are matched case-sensitively; `*` matches any
/// single segment, while `**` (or a `*` in trailing position) matches the
/// whole remainder of the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    method: Option<String>,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
    Rest,
}

impl RoutePattern {
    /// Parses a pattern. Parsing never fails; odd input just becomes a
    /// pattern that matches nothing sensible.
    pub fn parse(pattern: &str) -> RoutePattern {
        let pattern = pattern.trim();
        let (method, path) = match pattern.split_once(' ') {
            Some((method, path)) => (Some(method.trim().to_ascii_uppercase()), path.trim()),
            None => (None, pattern),
        };

        let raw: Vec<&str> = path
            .trim_start_matches('/')
            .split_terminator('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        let last = raw.len().saturating_sub(1);
        let segments = raw
            .iter()
            .enumerate()
            .map(|(index, segment)| match *segment {
                "**" => Segment::Rest,
                "*" if index == last => Segment::Rest,
                "*" => Segment::Wildcard,
                literal => Segment::Literal(literal.to_owned()),
            })
            .collect();

        RoutePattern { method, segments }
    }

    pub(crate) fn matches(&self, method: &Method, path: &str) -> bool {
        if let Some(ref want) = self.method {
            if !want.eq_ignore_ascii_case(method.as_str()) {
                return false;
            }
        }

        let path: Vec<&str> = path
            .trim_start_matches('/')
            .split_terminator('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        let mut at = 0;
        for segment in &self.segments {
            match segment {
                Segment::Rest => return true,
                Segment::Wildcard => {
                    if at >= path.len() {
                        return false;
                    }
                    at += 1;
                }
                Segment::Literal(want) => {
                    if path.get(at).map(|s| *s) != Some(want.as_str()) {
                        return false;
                    }
                    at += 1;
                }
            }
        }
        at == path.len()
    }
}

impl<'a> From<&'a str> for RoutePattern {
    fn from(pattern: &'a str) -> RoutePattern {
        RoutePattern::parse(pattern)
    }
}

struct Route {
    pattern: RoutePattern,
    handler: Arc<dyn Handler>,
}

/// The ordered list of routes; dispatch picks the first match.
#[derive(Default)]
pub(crate) struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub(crate) fn append(&mut self, pattern: RoutePattern, handler: Arc<dyn Handler>) {
        self.routes.push(Route { pattern, handler });
    }

    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Option<Arc<dyn Handler>> {
        self.routes
            .iter()
            .find(|route| route.pattern.matches(method, path))
            .map(|route| Arc::clone(&route.handler))
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, method: &Method, path: &str) -> bool {
        RoutePattern::parse(pattern).matches(method, path)
    }

    #[test]
    fn literal_paths() {
        assert!(matches("/fish", &Method::GET, "/fish"));
        assert!(matches("/fish/chips", &Method::POST, "/fish/chips"));
        assert!(!matches("/fish", &Method::GET, "/fish/chips"));
        assert!(!matches("/fish/chips", &Method::GET, "/fish"));
        // path literals are case sensitive
        assert!(!matches("/fish", &Method::GET, "/Fish"));
    }

    #[test]
    fn method_patterns() {
        assert!(matches("GET /fish", &Method::GET, "/fish"));
        assert!(matches("get /fish", &Method::GET, "/fish"));
        assert!(!matches("POST /fish", &Method::GET, "/fish"));
        // no method part means any method
        assert!(matches("/fish", &Method::DELETE, "/fish"));
    }

    #[test]
    fn single_segment_wildcard() {
        assert!(matches("/fish/*/peas", &Method::GET, "/fish/chips/peas"));
        assert!(!matches("/fish/*/peas", &Method::GET, "/fish/peas"));
        assert!(!matches("/fish/*/peas", &Method::GET, "/fish/chips/mushy/peas"));
    }

    #[test]
    fn trailing_wildcard_matches_remainder() {
        assert!(matches("/fish/*", &Method::GET, "/fish"));
        assert!(matches("/fish/*", &Method::GET, "/fish/chips/mushy/peas"));
        assert!(matches("/fish/**", &Method::GET, "/fish/chips"));
        assert!(matches("*", &Method::GET, "/"));
        assert!(matches("*", &Method::GET, "/anything/at/all"));
    }

    #[test]
    fn first_match_wins() {
        use crate::handler::handler_fn;
        use bytes::Bytes;
        use http::{Response, StatusCode};

        fn status_handler(status: StatusCode) -> Arc<dyn Handler> {
            Arc::new(handler_fn(move |_req| async move {
                Ok::<_, crate::Error>(Response::builder().status(status).body(Bytes::new()).unwrap())
            }))
        }

        let mut router = Router::default();
        router.append(
            RoutePattern::parse("/fish"),
            status_handler(StatusCode::ACCEPTED),
        );
        router.append(RoutePattern::parse("*"), status_handler(StatusCode::GONE));

        let first = router.lookup(&Method::GET, "/fish").expect("route");
        let res = tokio_test::block_on(first.call(
            http::Request::builder().uri("/fish").body(Bytes::new()).unwrap(),
        ))
        .unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);

        let rest = router.lookup(&Method::GET, "/other").expect("catch-all");
        let res = tokio_test::block_on(rest.call(
            http::Request::builder().uri("/other").body(Bytes::new()).unwrap(),
        ))
        .unwrap();
        assert_eq!(res.status(), StatusCode::GONE);
    }
}
