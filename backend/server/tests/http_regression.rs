use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use points::{
    config::Config,
    database::PointStore,
    error::StoreError,
    memory::MemoryStore,
    models::{BatchId, Category, PointRecord, StoredRecord},
    router,
    state::AppState,
};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::{net::TcpListener, time::sleep};

struct TestServer {
    base: String,
    client: Client,
    state: Arc<AppState>,
}

/// A store whose every call fails, as if the database were unreachable.
struct Offline;

#[async_trait]
impl PointStore for Offline {
    async fn find_by_key(
        &self,
        category: Category,
        _address: &str,
        _platform: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        Err(StoreError::Unavailable(format!("{category} offline")))
    }

    async fn find_by_address(
        &self,
        category: Category,
        _address: &str,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        Err(StoreError::Unavailable(format!("{category} offline")))
    }

    async fn accumulate(
        &self,
        category: Category,
        _batch: BatchId,
        _records: &[PointRecord],
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable(format!("{category} offline")))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("offline".into()))
    }
}

impl TestServer {
    async fn start() -> Result<Self> {
        Self::start_with(Arc::new(MemoryStore::new())).await
    }

    async fn start_with(store: Arc<dyn PointStore>) -> Result<Self> {
        let state = AppState::with_store(Config::default(), store);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind test listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read listener address")?;

        let app = router(state.clone());
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                eprintln!("test server error: {err}");
            }
        });

        Ok(Self {
            base: format!("http://{addr}"),
            client: Client::new(),
            state,
        })
    }

    async fn post_raw(&self, path: &str, body: &str) -> Result<(StatusCode, String)> {
        let response = self
            .client
            .post(format!("{}{path}", self.base))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await?;
        let status = response.status();
        Ok((status, response.text().await?))
    }

    async fn post(&self, path: &str, body: Value) -> Result<(StatusCode, Value)> {
        let (status, text) = self.post_raw(path, &body.to_string()).await?;
        Ok((status, serde_json::from_str(&text)?))
    }

    async fn summary(&self, address: &str) -> Result<(StatusCode, Value)> {
        let response = self
            .client
            .get(format!("{}/address/{address}", self.base))
            .send()
            .await?;
        let status = response.status();
        Ok((status, response.json().await?))
    }

    /// Polls until `check` accepts the summary; persistence is asynchronous.
    async fn eventually<F>(&self, address: &str, check: F) -> Result<Value>
    where
        F: Fn(&Value) -> bool,
    {
        for _ in 0..100 {
            let (_, summary) = self.summary(address).await?;
            if check(&summary) {
                return Ok(summary);
            }
            sleep(Duration::from_millis(20)).await;
        }
        bail!("summary for {address} never reached the expected state")
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn webhook_normalizes_category_but_not_platform() -> Result<()> {
    let server = TestServer::start().await?;

    let (status, body) = server
        .post(
            "/webhook",
            json!({"points": [["0xABC", "DEX", " binance ", 5], ["0xABC", "dex", "binance", 3]]}),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["processed_records"], 2);

    let summary = server
        .eventually("0xABC", |s| s["dex"].as_array().is_some_and(|rows| rows.len() == 2))
        .await?;

    let dex = summary["dex"].as_array().context("dex is an array")?;
    let padded = dex
        .iter()
        .find(|row| row["platform"] == " binance ")
        .context("verbatim platform row")?;
    assert_eq!(padded["point"], 5);
    assert_eq!(padded["address"], "0xABC");
    assert!(padded["id"].is_u64());

    server
        .post(
            "/webhook",
            json!({"points": [["0xABC", " Dex", " binance ", 3]]}),
        )
        .await?;
    server
        .eventually("0xABC", |s| {
            s["dex"]
                .as_array()
                .and_then(|rows| rows.iter().find(|row| row["platform"] == " binance "))
                .is_some_and(|row| row["point"] == 8)
        })
        .await?;

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_arity_is_acknowledged_but_not_stored() -> Result<()> {
    let server = TestServer::start().await?;

    let (status, body) = server.post("/webhook", json!({"points": [[1, 2, 3]]})).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed_records"], 1);

    server.state.queue.shutdown().await;

    let (_, summary) = server.summary("1").await?;
    for category in ["dex", "nft", "launchpad", "social", "games", "lsd"] {
        assert_eq!(summary[category], json!([]), "{category}");
    }
    assert!(server.state.queue.dead_letters().is_empty());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_address_returns_six_empty_lists() -> Result<()> {
    let server = TestServer::start().await?;

    let (status, summary) = server.summary("0xnobody").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        summary,
        json!({
            "address": "0xnobody",
            "dex": [],
            "nft": [],
            "launchpad": [],
            "social": [],
            "games": [],
            "lsd": [],
        })
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_bodies() -> Result<()> {
    let server = TestServer::start().await?;

    let (status, body) = server.post_raw("/webhook", "{not json").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Invalid JSON"));

    let (status, body) = server.post_raw("/webhook", r#"{"points": "nope"}"#).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Invalid points data format"));

    let (status, body) = server.post_raw("/webhook", r#"{"other": []}"#).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "No points data found");

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_blocks_are_scored_and_stored() -> Result<()> {
    let server = TestServer::start().await?;

    let (status, body) = server
        .post(
            "/stream",
            json!({
                "data": [{ "transactions": [
                    { "from": "0xfeed", "to": "0xE0FA8195AE92B9C473C0C0C12C2D6BCBD245DE47", "value": "0x0" },
                    { "from": "0xfeed", "to": "0xc816865f172d640d93712c68a7e1f83f3fa63235", "value": "0x29a2241af62c0000" },
                    { "from": "0xfeed", "to": null, "value": "0x1" },
                ]}]
            }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed_records"], 2);

    let summary = server
        .eventually("0xfeed", |s| {
            s["games"].as_array().is_some_and(|rows| !rows.is_empty())
                && s["dex"].as_array().is_some_and(|rows| !rows.is_empty())
        })
        .await?;

    assert_eq!(summary["games"][0]["platform"], "2048");
    assert_eq!(summary["games"][0]["point"], 1);
    assert_eq!(summary["dex"][0]["platform"], "kuru");
    assert_eq!(summary["dex"][0]["point"], 3);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn health_and_dead_letters() -> Result<()> {
    let server = TestServer::start().await?;

    let health = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await?;
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.text().await?, "ok");

    let dead: Value = server
        .client
        .get(format!("{}/dead-letters", server.base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(dead, json!([]));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_store_fails_the_query_with_details() -> Result<()> {
    let server = TestServer::start_with(Arc::new(Offline)).await?;

    let (status, body) = server.summary("0xabc").await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Failed to query address data");
    let details = body["details"].as_array().context("details is an array")?;
    assert_eq!(details.len(), 6);
    assert!(
        details
            .iter()
            .any(|detail| detail.as_str().is_some_and(|d| d.contains("gamefi offline")))
    );

    let health = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await?;
    assert_eq!(health.status(), StatusCode::SERVICE_UNAVAILABLE);

    Ok(())
}
