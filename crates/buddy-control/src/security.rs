use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Per-request metadata available to handlers via `Extension<RequestMeta>`.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: String,
}

fn accept_request_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.len() > MAX_REQUEST_ID_LEN {
        return None;
    }
    raw.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .then(|| raw.to_string())
}

// Middleware: propagate a caller-supplied request id or mint one, and echo it back.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(accept_request_id)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestMeta {
        request_id: request_id.clone(),
    });

    let mut resp = next.run(req).await;
    if let Ok(v) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::accept_request_id;

    #[test]
    fn request_ids_are_sanitized() {
        assert_eq!(accept_request_id(" abc-123 ").as_deref(), Some("abc-123"));
        assert_eq!(accept_request_id("bad id"), None);
        assert_eq!(accept_request_id(&"a".repeat(200)), None);
        assert_eq!(accept_request_id(""), None);
    }
}
