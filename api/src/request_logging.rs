use poem::{Endpoint, IntoResponse, Middleware, Request, Response};
use std::time::Instant;

/// Middleware that logs HTTP requests with method, path, status, duration,
/// and a truncated copy of the response body.
pub struct RequestLogging {
    max_body_bytes: usize,
}

impl RequestLogging {
    pub fn new(max_body_bytes: usize) -> Self {
        Self { max_body_bytes }
    }
}

impl<E: Endpoint> Middleware<E> for RequestLogging {
    type Output = RequestLoggingEndpoint<E>;

    fn transform(&self, ep: E) -> Self::Output {
        RequestLoggingEndpoint {
            inner: ep,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

pub struct RequestLoggingEndpoint<E> {
    inner: E,
    max_body_bytes: usize,
}

impl<E: Endpoint> Endpoint for RequestLoggingEndpoint<E> {
    type Output = Response;

    async fn call(&self, req: Request) -> poem::Result<Self::Output> {
        let start = Instant::now();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let response = self.inner.call(req).await;

        let duration_ms = start.elapsed().as_millis();

        match response {
            Ok(resp) => {
                let mut resp = resp.into_response();
                let status = resp.status();

                // The body is buffered so a preview can be logged, then put
                // back on the response untouched.
                let bytes = resp.take_body().into_bytes().await?;
                let preview = truncate_body(&String::from_utf8_lossy(&bytes), self.max_body_bytes);

                if status.is_success() {
                    tracing::info!(
                        method = %method,
                        path = %path,
                        status = %status.as_u16(),
                        duration_ms = %duration_ms,
                        response = %preview,
                        "request completed"
                    );
                } else {
                    tracing::warn!(
                        method = %method,
                        path = %path,
                        status = %status.as_u16(),
                        duration_ms = %duration_ms,
                        response = %preview,
                        "request failed"
                    );
                }

                resp.set_body(bytes);
                Ok(resp)
            }
            Err(err) => {
                let status = err.status();
                tracing::error!(
                    method = %method,
                    path = %path,
                    status = %status.as_u16(),
                    duration_ms = %duration_ms,
                    error = %err,
                    "request error"
                );
                Err(err)
            }
        }
    }
}

/// Cuts the body preview at `max` bytes, backing up to a char boundary, and
/// marks the cut with a trailing ellipsis.
fn truncate_body(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{} ...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_body_untouched() {
        assert_eq!(truncate_body("short", 1000), "short");
    }

    #[test]
    fn test_long_body_truncated_with_marker() {
        let body = "x".repeat(1200);
        let preview = truncate_body(&body, 1000);
        assert_eq!(preview.len(), 1004);
        assert!(preview.ends_with(" ..."));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // Each 'é' is two bytes; cutting at 3 must back up to byte 2.
        let preview = truncate_body("ééé", 3);
        assert_eq!(preview, "é ...");
    }

    #[test]
    fn test_exact_length_not_truncated() {
        let body = "x".repeat(1000);
        assert_eq!(truncate_body(&body, 1000), body);
    }
}
