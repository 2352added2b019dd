use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// Records request count and latency per route template.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = route_label(
        req.extensions().get::<MatchedPath>().map(MatchedPath::as_str),
        req.uri().path(),
    );

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// Route template when axum matched one, otherwise the raw path with
/// id-like segments collapsed to keep label cardinality bounded.
fn route_label(matched: Option<&str>, raw: &str) -> String {
    if let Some(template) = matched {
        return template.to_string();
    }
    raw.split('/')
        .map(|segment| if looks_like_id(segment) { "{id}" } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

fn looks_like_id(segment: &str) -> bool {
    let uuid_like =
        segment.len() == 36 && segment.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
    let numeric = !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit());
    uuid_like || numeric
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_matched_template() {
        assert_eq!(
            route_label(Some("/api/v1/practice/{id}"), "/api/v1/practice/abc"),
            "/api/v1/practice/{id}"
        );
    }

    #[test]
    fn collapses_ids_in_unmatched_paths() {
        assert_eq!(
            route_label(None, "/api/v1/exams/attempts/550e8400-e29b-41d4-a716-446655440000"),
            "/api/v1/exams/attempts/{id}"
        );
        assert_eq!(route_label(None, "/nope/42/x"), "/nope/{id}/x");
        assert_eq!(route_label(None, "/health"), "/health");
    }
}
