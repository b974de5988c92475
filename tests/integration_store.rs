#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Integration tests that require a Postgres instance with the pgvector
// extension available. Run with:
//   TEST_DATABASE_URL=postgres://localhost/bulletin_test cargo test --test integration_store

use bulletin_ingest::cache::{ArticleCache, MemoryCache, page_key};
use bulletin_ingest::config::Config;
use bulletin_ingest::database::Database;
use bulletin_ingest::database::models::{NewArticle, NewVector};
use bulletin_ingest::pipeline::Pipeline;
use chrono::NaiveDate;
use pgvector::Vector;
use serde_json::json;
use serial_test::serial;
use std::env;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEST_DIMENSION: u32 = 64;

fn test_database_url() -> Option<String> {
    env::var("TEST_DATABASE_URL").ok()
}

fn test_config(database_url: String) -> Config {
    let mut config = Config::default();
    config.database.url = Some(database_url);
    config.embedding.dimension = TEST_DIMENSION;
    config
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date should parse")
}

fn article(link: &str, published_on: &str) -> NewArticle {
    NewArticle {
        title: format!("通知 {link}"),
        unit: Some("教务处".to_string()),
        link: link.to_string(),
        published_on: date(published_on),
        content: "正文内容".to_string(),
        summary: "摘要".to_string(),
        attachments: Vec::new(),
    }
}

fn unit_vector(index: usize) -> Vec<f32> {
    let mut values = vec![0.0f32; TEST_DIMENSION as usize];
    values[index % TEST_DIMENSION as usize] = 1.0;
    values
}

async fn fresh_database(config: &Config) -> Database {
    let database = Database::connect(config)
        .await
        .expect("should connect to TEST_DATABASE_URL");
    sqlx::query("DROP TABLE IF EXISTS vectors")
        .execute(database.pool())
        .await
        .expect("should drop vectors table");
    sqlx::query("DROP TABLE IF EXISTS articles")
        .execute(database.pool())
        .await
        .expect("should drop articles table");
    database
        .ensure_schema(TEST_DIMENSION)
        .await
        .expect("schema bootstrap should succeed");
    database
}

#[tokio::test]
#[serial]
async fn schema_bootstrap_is_idempotent() {
    let Some(url) = test_database_url() else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let config = test_config(url);
    let database = fresh_database(&config).await;

    // Safe to call on every run.
    database
        .ensure_schema(TEST_DIMENSION)
        .await
        .expect("second bootstrap should succeed");
    database
        .ensure_schema(TEST_DIMENSION)
        .await
        .expect("third bootstrap should succeed");
}

#[tokio::test]
#[serial]
async fn conflict_tolerant_inserts_and_lookups() {
    let Some(url) = test_database_url() else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let config = test_config(url);
    let database = fresh_database(&config).await;

    let batch = vec![
        article("http://oa.example.edu.cn/notice/1", "2024-05-06"),
        article("http://oa.example.edu.cn/notice/2", "2024-05-06"),
    ];
    let inserted = database
        .upsert_articles(&batch)
        .await
        .expect("insert should succeed");
    assert_eq!(inserted, 2);

    // Replaying the same batch inserts nothing.
    let replayed = database
        .upsert_articles(&batch)
        .await
        .expect("replay should succeed");
    assert_eq!(replayed, 0);

    let links = database
        .existing_links(date("2024-05-06"))
        .await
        .expect("link lookup should succeed");
    assert_eq!(links.len(), 2);
    assert!(links.contains("http://oa.example.edu.cn/notice/1"));

    let resolved = database
        .lookup_for_embedding(&["http://oa.example.edu.cn/notice/1".to_string()])
        .await
        .expect("embedding lookup should succeed");
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].summary, "摘要");

    // One vector per article, conflicts ignored.
    let vectors = vec![NewVector {
        article_id: resolved[0].id,
        embedding: Vector::from(unit_vector(0)),
        published_on: resolved[0].published_on,
    }];
    assert_eq!(
        database.upsert_vectors(&vectors).await.expect("vector insert"),
        1
    );
    assert_eq!(
        database.upsert_vectors(&vectors).await.expect("vector replay"),
        0
    );
}

#[tokio::test]
#[serial]
async fn nearest_neighbors_orders_by_distance() {
    let Some(url) = test_database_url() else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };
    let config = test_config(url);
    let database = fresh_database(&config).await;

    let batch = vec![
        article("http://oa.example.edu.cn/notice/1", "2024-05-06"),
        article("http://oa.example.edu.cn/notice/2", "2024-05-06"),
        article("http://oa.example.edu.cn/notice/3", "2024-05-06"),
    ];
    database
        .upsert_articles(&batch)
        .await
        .expect("insert should succeed");
    let resolved = database
        .lookup_for_embedding(&batch.iter().map(|a| a.link.clone()).collect::<Vec<_>>())
        .await
        .expect("lookup should succeed");

    let vectors: Vec<NewVector> = resolved
        .iter()
        .enumerate()
        .map(|(index, row)| NewVector {
            article_id: row.id,
            embedding: Vector::from(unit_vector(index)),
            published_on: row.published_on,
        })
        .collect();
    database
        .upsert_vectors(&vectors)
        .await
        .expect("vector insert should succeed");

    // Query along the first axis: its article must come back closest.
    let neighbors = database
        .nearest_neighbors(unit_vector(0), 3)
        .await
        .expect("query should succeed");
    assert_eq!(neighbors.len(), 3);
    assert_eq!(neighbors[0].id, vectors[0].article_id);
    assert!(neighbors[0].distance < neighbors[1].distance);
    assert!(neighbors[1].distance <= neighbors[2].distance);
}

const LISTING_TEMPLATE: &str = r#"
<html><body><table><tbody>
  <tr class="datalight">
    <td><a href="/notice/view.jsp?id=101" title="通知一">通知一</a></td>
    <td>教务处</td><td>2024-05-06</td>
  </tr>
  <tr class="datalight">
    <td><a href="/notice/view.jsp?id=102" title="通知二">通知二</a></td>
    <td>商学院</td><td>2024-05-06</td>
  </tr>
  <tr class="datalight">
    <td><a href="/notice/view.jsp?id=103" title="通知三">通知三</a></td>
    <td></td><td>2024-05-06</td>
  </tr>
</tbody></table></body></html>
"#;

const DETAIL_TEMPLATE: &str = r#"
<html><body><span id="spanContent">
<p>各位师生：</p>
<p>现将有关事项通知如下，请按时办理。</p>
</span></body></html>
"#;

/// End-to-end: 3 candidates for the date, 1 already stored, working
/// summarizer and embedder. Exactly 2 articles and 2 vectors are inserted,
/// and a second run inserts nothing.
#[tokio::test]
#[serial]
async fn end_to_end_ingestion_is_idempotent() {
    let Some(url) = test_database_url() else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    let portal = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING_TEMPLATE))
        .mount(&portal)
        .await;
    Mock::given(method("POST"))
        .and(path("/notice/view.jsp"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DETAIL_TEMPLATE))
        .mount(&portal)
        .await;

    let ai = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "生成的摘要"}}]
        })))
        .mount(&ai)
        .await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"embedding": unit_vector(0)},
                {"embedding": unit_vector(1)}
            ]
        })))
        .mount(&ai)
        .await;

    let mut config = test_config(url);
    config.source.base_url = portal.uri();
    config.source.list_url = format!("{}/list", portal.uri());
    config.summarizer.base_url = format!("{}/chat", ai.uri());
    config.summarizer.api_key = Some("test-key".to_string());
    config.embedding.base_url = Some(format!("{}/embed", ai.uri()));
    config.embedding.model = Some("embed-test".to_string());
    config.embedding.api_key = Some("test-key".to_string());

    let database = fresh_database(&config).await;
    let target_date = date("2024-05-06");

    // One of the three listed items is already stored.
    let existing_link = format!("{}/notice/view.jsp?id=101", portal.uri());
    let mut pre_existing = article(&existing_link, "2024-05-06");
    pre_existing.content = "原有正文".to_string();
    database
        .upsert_articles(&[pre_existing])
        .await
        .expect("pre-insert should succeed");

    let cache = Arc::new(MemoryCache::new());
    let cache_handle: Arc<dyn ArticleCache> = cache.clone();
    let pipeline = Pipeline::new(config.clone(), cache_handle).expect("pipeline should build");

    let stats = pipeline.run(target_date).await.expect("run should succeed");
    assert_eq!(stats.candidates, 3);
    assert_eq!(stats.new_items, 2);
    assert_eq!(stats.fetched, 2);
    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.vectors_inserted, 2);

    // The pre-existing article's content was not touched.
    let links = database
        .lookup_for_embedding(&[existing_link.clone()])
        .await
        .expect("lookup should succeed");
    assert_eq!(links[0].content, "原有正文");

    // The head pagination window was cached for this backfill date.
    assert!(cache.exists(&page_key(None, config.cache.page_limit)));

    // Second run over identical upstream data inserts nothing.
    let second = pipeline.run(target_date).await.expect("rerun should succeed");
    assert_eq!(second.candidates, 3);
    assert_eq!(second.new_items, 0);
    assert_eq!(second.inserted, 0);
}
