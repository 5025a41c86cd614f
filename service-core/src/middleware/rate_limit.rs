use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

/// Rate limiter keyed by client IP address
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

/// Resolve the client address of a request.
///
/// The first `X-Forwarded-For` hop wins over the socket peer so that clients
/// behind a proxy are not all lumped into one bucket.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
    let forwarded_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok());

    forwarded_ip.or_else(|| {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

/// Create a keyed rate limiter allowing `attempts` per `window_seconds` per IP
pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    let burst = NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_millis((window_seconds * 1000) / burst.get() as u64)
        .max(Duration::from_millis(1));
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(burst);

    Arc::new(RateLimiter::dashmap(quota))
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match client_ip(request.headers(), request.extensions()) {
        Some(ip) => match limiter.check_key(&ip) {
            Ok(_) => Ok(next.run(request).await),
            Err(negative) => {
                let wait_time = negative.wait_time_from(DefaultClock::default().now());
                tracing::warn!(client_ip = %ip, "IP rate limit exceeded");
                Err(AppError::TooManyRequests(
                    "Too many requests from this IP. Please try again later.".to_string(),
                    Some(wait_time.as_secs().max(1)),
                ))
            }
        },
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        middleware::from_fn_with_state,
        routing::post,
    };
    use tower::ServiceExt;

    fn login_request(ip: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/login")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 9000))));

        assert_eq!(
            client_ip(&headers, &extensions),
            Some("203.0.113.7".parse().unwrap())
        );
        assert_eq!(
            client_ip(&HeaderMap::new(), &extensions),
            Some("127.0.0.1".parse().unwrap())
        );
        assert_eq!(client_ip(&HeaderMap::new(), &Extensions::new()), None);
    }

    #[tokio::test]
    async fn test_ip_limiter_blocks_after_burst() {
        let limiter = create_ip_rate_limiter(2, 60);
        let app = Router::new()
            .route("/login", post(|| async { "ok" }))
            .layer(from_fn_with_state(limiter, ip_rate_limit_middleware));

        for _ in 0..2 {
            let res = app.clone().oneshot(login_request("198.51.100.1")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = app.clone().oneshot(login_request("198.51.100.1")).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key("retry-after"));

        // Other clients keep their own budget
        let res = app.oneshot(login_request("198.51.100.2")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
