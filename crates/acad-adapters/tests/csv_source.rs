use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use acad_adapters::{students_from_rows, CsvSheetSource, StudentColumns, TableSource};
use acad_core::SourceDescriptor;
use acad_storage::{BackoffPolicy, HttpClientConfig, RelayFetcher};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};

type Seen = Arc<Mutex<Vec<String>>>;

async fn html_relay() -> impl IntoResponse {
    Html("<html><body>Sign in</body></html>")
}

async fn throttle_relay() -> impl IntoResponse {
    (StatusCode::TOO_MANY_REQUESTS, "")
}

async fn csv_relay(State(seen): State<Seen>, Query(q): Query<HashMap<String, String>>) -> impl IntoResponse {
    seen.lock().unwrap().push(q.get("url").cloned().unwrap_or_default());
    "SL,Student ID,Student Name,Sex,Mobile,Email\n\
     1,221-15-4567,\"Uddin, Rahim\",MALE,01712345678,rahim4567@diu.edu.bd\n\
     2,221-15-4568,Karim Hasan,F,,\n"
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

fn source_with(relays: Vec<String>) -> CsvSheetSource {
    let config = HttpClientConfig {
        timeout: Duration::from_secs(2),
        backoff: BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        rate_limit_pause: Duration::from_millis(1),
        relays,
        export_base: "https://sheets.example/d".to_string(),
        ..Default::default()
    };
    CsvSheetSource::new(Arc::new(RelayFetcher::new(config).unwrap()))
}

#[tokio::test]
async fn decodes_rows_after_html_and_throttled_relays() {
    let seen: Seen = Arc::default();
    let base = serve(
        Router::new()
            .route("/html", get(html_relay))
            .route("/throttle", get(throttle_relay))
            .route("/csv", get(csv_relay))
            .with_state(seen.clone()),
    )
    .await;
    let source = source_with(vec![
        format!("{base}/html?url="),
        format!("{base}/throttle?url="),
        format!("{base}/csv?url="),
    ]);

    let rows = source
        .fetch_rows(&SourceDescriptor::new("doc-1", "42"))
        .await;

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("Student Name"), "Uddin, Rahim");
    assert_eq!(rows[1].get("Mobile"), "");

    let requested = seen.lock().unwrap().clone();
    assert_eq!(requested.len(), 1);
    assert!(requested[0].starts_with("https://sheets.example/d/doc-1/export?format=csv&gid=42&t="));

    let students = students_from_rows(&rows, &StudentColumns::default());
    assert_eq!(students[0].sex, "Male");
    assert_eq!(students[1].sex, "Female");
}

#[tokio::test]
async fn unreachable_source_yields_no_rows() {
    let base = serve(Router::new().route("/html", get(html_relay))).await;
    let source = source_with(vec![format!("{base}/html?url=")]);

    let rows = source
        .fetch_rows(&SourceDescriptor::new("doc-1", "0"))
        .await;

    assert!(rows.is_empty());
}
