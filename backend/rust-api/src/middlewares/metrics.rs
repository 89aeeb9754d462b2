use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// Records request count and latency per normalized route.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

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

/// Collapses caller-chosen ids into `{id}` so label cardinality stays bounded.
///
/// Challenge and user ids are free-form strings, so the segment after
/// `challenges` or `users` is always replaced; elsewhere only UUIDs,
/// ObjectIds and numbers are.
fn normalize_path(path: &str) -> String {
    let mut normalized = Vec::new();
    let mut previous = "";

    for segment in path.split('/') {
        let is_id = matches!(previous, "challenges" | "users")
            || is_uuid_like(segment)
            || is_object_id(segment)
            || is_numeric_id(segment);

        if is_id && !segment.is_empty() {
            normalized.push("{id}");
        } else {
            normalized.push(segment);
        }
        previous = segment;
    }

    normalized.join("/")
}

fn is_uuid_like(s: &str) -> bool {
    s.len() == 36 && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

fn is_object_id(s: &str) -> bool {
    s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_numeric_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path("/api/v1/challenges/two-sum/chat"),
            "/api/v1/challenges/{id}/chat"
        );
        assert_eq!(
            normalize_path("/api/v1/users/alice/chat-sessions"),
            "/api/v1/users/{id}/chat-sessions"
        );
        assert_eq!(
            normalize_path("/api/v1/challenges/507f1f77bcf86cd799439011/chat"),
            "/api/v1/challenges/{id}/chat"
        );
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/metrics"), "/metrics");
    }

    #[test]
    fn test_id_shapes() {
        assert!(is_uuid_like("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_uuid_like("not-a-uuid"));
        assert!(is_object_id("507f1f77bcf86cd799439011"));
        assert!(!is_object_id("chat-sessions"));
        assert!(is_numeric_id("123"));
        assert!(!is_numeric_id(""));
    }
}
