//! Consul KV as a [`CoordinationStore`].
//!
//! Only two endpoints are used: `GET /v1/kv/<key>?raw` returns the stored
//! bytes (404 when the key does not exist) and `PUT /v1/kv/<key>` replaces
//! the value, answering `true` on success.

use flakeguard::{CoordinationStore, StoreError};
use reqwest::{Client, StatusCode};

const TOKEN_HEADER: &str = "X-Consul-Token";

#[derive(Clone, Debug)]
pub struct ConsulStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ConsulStore {
    /// Creates a client for the agent at `addr`. `http://` is assumed when
    /// `addr` carries no scheme.
    ///
    /// # Errors
    ///
    /// If the HTTP client cannot be built.
    pub fn new(addr: &str, token: Option<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: normalize_addr(addr),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}", self.base_url, key)
    }

    fn with_token(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.header(TOKEN_HEADER, token),
            None => req,
        }
    }
}

fn normalize_addr(addr: &str) -> String {
    let addr = addr.trim().trim_end_matches('/');
    if addr.contains("://") {
        addr.to_owned()
    } else {
        format!("http://{addr}")
    }
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(e.to_string())
}

impl CoordinationStore for ConsulStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let resp = self
            .with_token(self.client.get(format!("{}?raw", self.url(key))))
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await.map_err(transport)?;
        Ok(Some(body.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let resp = self
            .with_token(self.client.put(self.url(key)))
            .body(value)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(StoreError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        match body.trim() {
            "true" => Ok(()),
            other => Err(StoreError::Unavailable(format!(
                "consul did not apply the write: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        net::SocketAddr,
        sync::{Arc, Mutex},
    };

    use axum::{
        Router,
        body::Bytes,
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        routing::get,
    };
    use flakeguard::{ClockGuard, Error};
    use tokio::net::TcpListener;

    use super::*;

    #[derive(Clone, Default)]
    struct MockConsul {
        kv: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        tokens: Arc<Mutex<Vec<Option<String>>>>,
    }

    impl MockConsul {
        fn record_token(&self, headers: &HeaderMap) {
            let token = headers
                .get(TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            self.tokens.lock().unwrap().push(token);
        }
    }

    async fn get_kv(
        State(mock): State<MockConsul>,
        Path(key): Path<String>,
        headers: HeaderMap,
    ) -> Result<Vec<u8>, StatusCode> {
        mock.record_token(&headers);
        mock.kv
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(StatusCode::NOT_FOUND)
    }

    async fn put_kv(
        State(mock): State<MockConsul>,
        Path(key): Path<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> &'static str {
        mock.record_token(&headers);
        mock.kv.lock().unwrap().insert(key, body.to_vec());
        "true"
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        addr
    }

    async fn spawn_mock() -> (SocketAddr, MockConsul) {
        let mock = MockConsul::default();
        let router = Router::new()
            .route("/v1/kv/{*key}", get(get_kv).put(put_kv))
            .with_state(mock.clone());
        (serve(router).await, mock)
    }

    #[test]
    fn addresses_default_to_http() {
        assert_eq!(normalize_addr("127.0.0.1:8500"), "http://127.0.0.1:8500");
        assert_eq!(normalize_addr("https://consul:8501/"), "https://consul:8501");
        assert_eq!(normalize_addr(" consul.service:8500 "), "http://consul.service:8500");
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let (addr, _mock) = spawn_mock().await;
        let store = ConsulStore::new(&addr.to_string(), None).unwrap();
        assert_eq!(store.get("machine_1/ts").await, Ok(None));
    }

    #[tokio::test]
    async fn put_then_get_round_trips_raw_bytes() {
        let (addr, mock) = spawn_mock().await;
        let store = ConsulStore::new(&addr.to_string(), None).unwrap();

        store.put("machine_1/ts", b"1700000000".to_vec()).await.unwrap();
        assert_eq!(
            mock.kv.lock().unwrap().get("machine_1/ts"),
            Some(&b"1700000000".to_vec())
        );
        assert_eq!(
            store.get("machine_1/ts").await,
            Ok(Some(b"1700000000".to_vec()))
        );
    }

    #[tokio::test]
    async fn token_is_sent_when_configured() {
        let (addr, mock) = spawn_mock().await;
        let store = ConsulStore::new(&format!("http://{addr}"), Some("s3cret".into())).unwrap();
        store.get("machine_2/ts").await.unwrap();
        store.put("machine_2/ts", b"1".to_vec()).await.unwrap();
        assert_eq!(
            *mock.tokens.lock().unwrap(),
            vec![Some("s3cret".to_owned()), Some("s3cret".to_owned())]
        );
    }

    #[tokio::test]
    async fn server_errors_are_reported_with_status() {
        let router = Router::new().route(
            "/v1/kv/{*key}",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "No cluster leader") })
                .put(|| async { (StatusCode::FORBIDDEN, "Permission denied") }),
        );
        let addr = serve(router).await;
        let store = ConsulStore::new(&addr.to_string(), None).unwrap();

        assert_eq!(
            store.get("machine_3/ts").await,
            Err(StoreError::UnexpectedStatus {
                status: 500,
                body: "No cluster leader".into()
            })
        );
        assert_eq!(
            store.put("machine_3/ts", b"1".to_vec()).await,
            Err(StoreError::UnexpectedStatus {
                status: 403,
                body: "Permission denied".into()
            })
        );
    }

    #[tokio::test]
    async fn rejected_write_is_an_error() {
        let router = Router::new().route("/v1/kv/{*key}", axum::routing::put(|| async { "false" }));
        let addr = serve(router).await;
        let store = ConsulStore::new(&addr.to_string(), None).unwrap();
        assert!(matches!(
            store.put("machine_4/ts", b"1".to_vec()).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_agent_is_a_transport_error() {
        // bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = ConsulStore::new(&addr.to_string(), None).unwrap();
        assert!(matches!(
            store.get("machine_5/ts").await,
            Err(StoreError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn clock_guard_runs_against_consul() {
        let (addr, mock) = spawn_mock().await;
        mock.kv
            .lock()
            .unwrap()
            .insert("machine_6/ts".into(), b"1700000100".to_vec());

        let guard = ClockGuard::new(ConsulStore::new(&addr.to_string(), None).unwrap(), 6);
        assert_eq!(
            guard.check_startup_clock(1_700_000_000).await,
            Err(Error::ClockRegressedPersisted {
                now: 1_700_000_000,
                watermark: 1_700_000_100
            })
        );
        assert_eq!(guard.check_startup_clock(1_700_000_100).await, Ok(Some(1_700_000_100)));
        assert_eq!(guard.record_watermark(1_700_000_101).await, Ok(true));
        assert_eq!(
            mock.kv.lock().unwrap().get("machine_6/ts"),
            Some(&b"1700000101".to_vec())
        );
    }
}
