//! Source-address allowlist for the payment webhook.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::task::{Context, Poll};

use axum::extract::connect_info::ConnectInfo;
use axum::http::{Extensions, HeaderMap, Request};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use tower::{Layer, Service};

use crate::config::AllowedIps;
use crate::error::AppError;

#[derive(Clone, Debug)]
pub struct IpFilterLayer {
    allowed_ips: AllowedIps,
    trusted_proxy_depth: usize,
}

impl IpFilterLayer {
    pub fn new(allowed_ips: AllowedIps, trusted_proxy_depth: usize) -> Self {
        Self {
            allowed_ips,
            trusted_proxy_depth,
        }
    }
}

impl<S> Layer<S> for IpFilterLayer {
    type Service = IpFilterService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IpFilterService {
            inner,
            filter: self.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct IpFilterService<S> {
    inner: S,
    filter: IpFilterLayer,
}

impl<S, B> Service<Request<B>> for IpFilterService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let client_ip = client_ip(
            req.headers(),
            req.extensions(),
            self.filter.trusted_proxy_depth,
        );

        if !is_allowed(client_ip, &self.filter.allowed_ips) {
            tracing::warn!(
                client_ip = ?client_ip,
                path = %req.uri().path(),
                "payment webhook call from address outside allowlist"
            );
            let response =
                AppError::Forbidden("source address not allowed".to_string()).into_response();
            return Box::pin(async move { Ok(response) });
        }

        // Swap in a fresh clone so the ready service handles this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(req).await })
    }
}

fn is_allowed(client_ip: Option<IpAddr>, allowed_ips: &AllowedIps) -> bool {
    match allowed_ips {
        AllowedIps::Any => true,
        AllowedIps::Cidrs(cidrs) => {
            client_ip.is_some_and(|ip| cidrs.iter().any(|cidr| cidr.contains(&ip)))
        }
    }
}

/// Prefers the `X-Forwarded-For` entry added by the outermost trusted proxy,
/// falling back to the socket peer address.
fn client_ip(headers: &HeaderMap, extensions: &Extensions, trusted_proxy_depth: usize) -> Option<IpAddr> {
    forwarded_for(headers, trusted_proxy_depth).or_else(|| {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

fn forwarded_for(headers: &HeaderMap, trusted_proxy_depth: usize) -> Option<IpAddr> {
    let raw = headers.get("x-forwarded-for")?.to_str().ok()?;
    let chain: Vec<IpAddr> = raw.split(',').filter_map(parse_hop).collect();

    if trusted_proxy_depth >= chain.len() {
        return None;
    }
    chain.get(chain.len() - 1 - trusted_proxy_depth).copied()
}

fn parse_hop(value: &str) -> Option<IpAddr> {
    let value = value.trim();
    IpAddr::from_str(value)
        .ok()
        .or_else(|| SocketAddr::from_str(value).ok().map(|addr| addr.ip()))
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderValue, StatusCode};
    use ipnet::IpNet;
    use tower::{service_fn, ServiceExt};

    fn provider_range() -> AllowedIps {
        AllowedIps::Cidrs(vec!["203.0.113.0/24".parse::<IpNet>().unwrap()])
    }

    async fn status_for(allowed: AllowedIps, depth: usize, req: Request<Body>) -> StatusCode {
        let service = IpFilterLayer::new(allowed, depth).layer(service_fn(|_req: Request<Body>| async {
            Ok::<Response, Infallible>(StatusCode::OK.into_response())
        }));
        service.oneshot(req).await.unwrap().status()
    }

    fn webhook_request(xff: Option<&'static str>) -> Request<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri("/webhooks/payments")
            .body(Body::empty())
            .unwrap();
        if let Some(xff) = xff {
            req.headers_mut()
                .insert("x-forwarded-for", HeaderValue::from_static(xff));
        }
        req
    }

    #[test]
    fn forwarded_for_skips_trusted_proxies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.10, 198.51.100.7"),
        );

        assert_eq!(
            forwarded_for(&headers, 1),
            Some(IpAddr::from([203, 0, 113, 10]))
        );
        assert_eq!(
            forwarded_for(&headers, 0),
            Some(IpAddr::from([198, 51, 100, 7]))
        );
        assert_eq!(forwarded_for(&headers, 2), None);
    }

    #[test]
    fn hops_may_carry_ports() {
        assert_eq!(
            parse_hop(" 203.0.113.9:4431 "),
            Some(IpAddr::from([203, 0, 113, 9]))
        );
        assert_eq!(parse_hop("unknown"), None);
    }

    #[tokio::test]
    async fn provider_address_passes() {
        let req = webhook_request(Some("203.0.113.55, 198.51.100.7"));
        assert_eq!(status_for(provider_range(), 1, req).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn other_address_is_forbidden() {
        let req = webhook_request(Some("198.51.100.55, 198.51.100.7"));
        assert_eq!(
            status_for(provider_range(), 1, req).await,
            StatusCode::FORBIDDEN
        );
    }

    #[tokio::test]
    async fn wildcard_allows_anyone() {
        let req = webhook_request(None);
        assert_eq!(status_for(AllowedIps::Any, 0, req).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn peer_address_used_without_forwarded_header() {
        let mut req = webhook_request(None);
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 44], 8080))));
        assert_eq!(status_for(provider_range(), 0, req).await, StatusCode::OK);

        let unknown = webhook_request(None);
        assert_eq!(
            status_for(provider_range(), 0, unknown).await,
            StatusCode::FORBIDDEN
        );
    }
}
