use std::sync::Arc;

use reqwest::StatusCode;

use stacks_api::app::{build_app, services::AppServices};
use stacks_catalog::ItemDraft;
use stacks_core::ItemId;

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Build app (same router as prod), but bind to an ephemeral port.
        let services = Arc::new(AppServices::in_memory());
        let app = build_app(services.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }

    async fn seed_book(&self, title: &str, copies: i64) -> ItemId {
        let item = ItemDraft {
            isbn: format!("isbn-{title}"),
            title: title.to_string(),
            authors: vec!["Octavia E. Butler".to_string()],
            genres: vec!["scifi".to_string()],
            publisher: "Four Walls".to_string(),
            page_count: 345,
            published_year: 1993,
            sell_price: 1_250,
            stock_price: 500,
            borrow_price: 100,
            copies,
        }
        .build()
        .unwrap();
        let id = item.id;
        self.services.store().insert_item(item).await.unwrap();
        id
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

const READER: &str = "reader@example.com";

async fn post_as(
    client: &reqwest::Client,
    url: String,
    user: &str,
) -> (StatusCode, serde_json::Value) {
    let res = client
        .post(url)
        .header("x-user-email", user)
        .send()
        .await
        .unwrap();
    let status = res.status();
    let body = res.json().await.unwrap();
    (status, body)
}

#[tokio::test]
async fn borrow_and_return_round_trip() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let book = server.seed_book("Parable of the Sower", 3).await;

    let (status, body) = post_as(
        &client,
        format!("{}/transactions/borrow/{}", server.base_url, book),
        READER,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Book borrowed successfully");

    // Stock went down, visible through the detail endpoint.
    let detail: serde_json::Value = client
        .get(format!("{}/admin/book/{}", server.base_url, book))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["currentCopies"], 2);

    // Second borrow of the same book is a policy denial.
    let (status, body) = post_as(
        &client,
        format!("{}/transactions/borrow/{}", server.base_url, book),
        READER,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Already borrowed");

    let (status, body) = post_as(
        &client,
        format!("{}/transactions/return/{}", server.base_url, book),
        READER,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Book returned successfully");

    // Returning again: nothing held anymore.
    let (status, _body) = post_as(
        &client,
        format!("{}/transactions/return/{}", server.base_url, book),
        READER,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn identity_header_is_required() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let book = server.seed_book("Kindred", 2).await;

    let res = client
        .post(format!("{}/transactions/borrow/{}", server.base_url, book))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["message"], "User email required in headers");
}

#[tokio::test]
async fn unknown_and_malformed_ids_are_not_found() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, _) = post_as(
        &client,
        format!(
            "{}/transactions/borrow/{}",
            server.base_url,
            ItemId::new()
        ),
        READER,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post_as(
        &client,
        format!("{}/transactions/borrow/not-a-uuid", server.base_url),
        READER,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn purchase_respects_the_per_item_cap() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let book = server.seed_book("Wild Seed", 5).await;
    let url = format!("{}/transactions/purchase/{}", server.base_url, book);

    for _ in 0..2 {
        let (status, body) = post_as(&client, url.clone(), READER).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Book purchased successfully");
    }

    let (status, body) = post_as(&client, url, READER).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Max 2 copies per book");
}

#[tokio::test]
async fn wallet_reflects_circulation_income() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let book = server.seed_book("Dawn", 4).await;

    post_as(
        &client,
        format!("{}/transactions/borrow/{}", server.base_url, book),
        READER,
    )
    .await;

    // Opening 100.00 plus the 1.00 borrow fee.
    let wallet: serde_json::Value = client
        .get(format!("{}/admin/wallet", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(wallet["balance"], "101.00");

    let movements: serde_json::Value = client
        .get(format!(
            "{}/admin/wallet/transactions?type=credit",
            server.base_url
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let movements = movements["movements"].as_array().unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0]["type"], "CREDIT");
    assert_eq!(movements[0]["amount"], 100);
}

#[tokio::test]
async fn listing_search_and_pagination_envelope() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    server.seed_book("Adulthood Rites", 3).await;
    server.seed_book("Imago", 3).await;

    let body: serde_json::Value = client
        .get(format!("{}/admin/book?search=imago", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let books = body["books"].as_array().unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0]["title"], "Imago");
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["pagination"]["page"], 1);

    let all: serde_json::Value = client
        .get(format!("{}/admin/book?limit=1&page=2", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all["books"].as_array().unwrap().len(), 1);
    assert_eq!(all["pagination"]["total"], 2);
    assert_eq!(all["pagination"]["totalPages"], 2);
}

#[tokio::test]
async fn audit_log_filters_and_validates_action_type() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let book = server.seed_book("Fledgling", 3).await;

    post_as(
        &client,
        format!("{}/transactions/borrow/{}", server.base_url, book),
        READER,
    )
    .await;

    let logs: serde_json::Value = client
        .get(format!(
            "{}/admin/book/logs?type=borrow&bookId={}",
            server.base_url, book
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let rows = logs.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["actionType"], "BORROW");
    assert_eq!(rows[0]["userEmail"], READER);
    assert_eq!(rows[0]["book"]["title"], "Fledgling");

    let res = client
        .get(format!("{}/admin/book/logs?type=lend", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("BORROW"));
}

#[tokio::test]
async fn users_summary_groups_holdings() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let book = server.seed_book("Patternmaster", 4).await;

    post_as(
        &client,
        format!("{}/transactions/borrow/{}", server.base_url, book),
        READER,
    )
    .await;
    post_as(
        &client,
        format!("{}/transactions/purchase/{}", server.base_url, book),
        "buyer@example.com",
    )
    .await;

    let summary: serde_json::Value = client
        .get(format!("{}/admin/book/users", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(summary[READER][0]["type"], "BORROW");
    assert_eq!(summary["buyer@example.com"][0]["type"], "BUY");
    assert_eq!(summary["buyer@example.com"][0]["title"], "Patternmaster");
}

#[tokio::test]
async fn operational_health_endpoints_expose_cache_and_queues() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    // Two copies: the first borrow leaves exactly one, arming the monitor.
    let book = server.seed_book("Survivor", 2).await;

    let cache: serde_json::Value = client
        .get(format!("{}/admin/health/cache", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cache["status"], "healthy");

    post_as(
        &client,
        format!("{}/transactions/borrow/{}", server.base_url, book),
        READER,
    )
    .await;

    // The reminder plus the two low-stock jobs are parked in the queue.
    let queues: serde_json::Value = client
        .get(format!("{}/admin/health/queues", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(queues["stats"]["pending"], 3);
    assert_eq!(queues["deadLetters"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn health_endpoint_is_public() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
