use bytes::Bytes;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::{NetError, NetResult},
    types::NetOptions,
};

#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
}

impl HttpClient {
    #[must_use]
    pub fn new(options: NetOptions) -> Self {
        let inner = Client::builder()
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .expect("failed to build reqwest client");
        Self { inner, options }
    }

    /// Fetch a URL to bytes. Cancellation wins over an in-flight request.
    pub async fn get_bytes(&self, url: Url, cancel: &CancellationToken) -> NetResult<Bytes> {
        let req = self
            .inner
            .get(url.clone())
            .timeout(self.options.request_timeout);

        let resp = tokio::select! {
            () = cancel.cancelled() => return Err(NetError::Cancelled),
            resp = req.send() => resp.map_err(NetError::from)?,
        };

        let status = resp.status();
        if !status.is_success() {
            return Err(NetError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        tokio::select! {
            () = cancel.cancelled() => Err(NetError::Cancelled),
            bytes = resp.bytes() => bytes.map_err(NetError::from),
        }
    }

    /// Fetch with the pipeline's failure policy: one immediate retry on a
    /// retryable transport error, then give up.
    pub async fn get_bytes_once_retried(
        &self,
        url: Url,
        cancel: &CancellationToken,
    ) -> NetResult<Bytes> {
        match self.get_bytes(url.clone(), cancel).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.is_retryable() && !cancel.is_cancelled() => {
                warn!(url = %url, error = %e, "segment fetch failed, retrying once");
                self.get_bytes(url, cancel).await
            }
            Err(e) => {
                debug!(url = %url, error = %e, "segment fetch failed, not retryable");
                Err(e)
            }
        }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(NetOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use axum::{extract::State, http::StatusCode, routing::get, Router};
    use tokio::net::TcpListener;

    use super::*;

    async fn serve(app: Router) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    #[tokio::test]
    async fn get_bytes_returns_body() {
        let base = serve(Router::new().route("/seg.m4s", get(|| async { "payload" }))).await;
        let client = HttpClient::default();
        let bytes = client
            .get_bytes(base.join("seg.m4s").unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"payload");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let base = serve(Router::new().route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "nope") }),
        ))
        .await;
        let client = HttpClient::default();
        let err = client
            .get_bytes(base.join("missing").unwrap(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::HttpStatus { status: 404, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let base = serve(Router::new().route("/seg.m4s", get(|| async { "payload" }))).await;
        let client = HttpClient::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .get_bytes(base.join("seg.m4s").unwrap(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Cancelled));
    }

    #[tokio::test]
    async fn retry_once_recovers_from_transient_failure() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/flaky",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::INTERNAL_SERVER_ERROR, "boom")
                    } else {
                        (StatusCode::OK, "recovered")
                    }
                }),
            )
            .with_state(Arc::clone(&hits));
        let base = serve(app).await;
        let client = HttpClient::default();
        let bytes = client
            .get_bytes_once_retried(base.join("flaky").unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"recovered");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_gives_up_after_second_failure() {
        let base = serve(Router::new().route(
            "/down",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;
        let client = HttpClient::default();
        let err = client
            .get_bytes_once_retried(base.join("down").unwrap(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::HttpStatus { status: 503, .. }));
    }
}
