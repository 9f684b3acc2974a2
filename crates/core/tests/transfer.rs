//! End-to-end planning and execution against in-memory and local backends

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use tempfile::TempDir;

use xfer_core::{
    BackendClient, ByteStream, CancellationToken, CredentialResolver, Endpoint, Environment,
    Error, ExecutorConfig, FailureKind, LocalClient, ListPage, MemoryClient, ObjectDescriptor,
    ObjectSink, OperationKind, PlanOptions, Result, RetryBuilder, Scheme, TaskReport, TaskState,
    TransferExecutor, TransferPlan, TransferPlanner, TransferRoute, parse_locator,
};

fn test_env() -> Environment {
    Environment::new()
        .with("ACCESS_KEY_ID", "AKIDEXAMPLE")
        .with("SECRET_ACCESS_KEY", "secret")
        .with("DEFAULT_REGION", "us-east-1")
}

fn endpoint(raw: &str, client: Arc<dyn BackendClient>) -> Endpoint {
    let locator = parse_locator(raw).unwrap();
    let credentials = CredentialResolver::new(test_env())
        .resolve(locator.scheme())
        .unwrap();
    Endpoint::new(locator, credentials, client)
}

fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        retry: RetryBuilder::new()
            .max_attempts(3)
            .initial_backoff_ms(1)
            .max_backoff_ms(5)
            .build(),
        ..Default::default()
    }
}

async fn plan(source: &Endpoint, destination: &Endpoint) -> TransferPlan {
    TransferPlanner::default()
        .plan(source, destination, &PlanOptions::default())
        .await
        .unwrap()
}

/// Wraps a [`MemoryClient`] and injects read failures
#[derive(Default)]
struct FlakyClient {
    inner: MemoryClient,
    /// `open_read` calls that fail outright before any byte
    fail_opens: AtomicUsize,
    /// Reads that fail after yielding their first chunk
    fail_mid_stream: AtomicUsize,
    offsets: Mutex<Vec<u64>>,
}

impl FlakyClient {
    fn new(inner: MemoryClient) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    fn failing_opens(self, n: usize) -> Self {
        self.fail_opens.store(n, Ordering::SeqCst);
        self
    }

    fn failing_mid_stream(self, n: usize) -> Self {
        self.fail_mid_stream.store(n, Ordering::SeqCst);
        self
    }

    fn offsets(&self) -> Vec<u64> {
        self.offsets.lock().unwrap().clone()
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl BackendClient for FlakyClient {
    async fn list_page(&self, prefix: &str, token: Option<String>) -> Result<ListPage> {
        self.inner.list_page(prefix, token).await
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectDescriptor>> {
        self.inner.stat(key).await
    }

    async fn open_read(&self, key: &str, offset: u64) -> Result<ByteStream> {
        self.offsets.lock().unwrap().push(offset);

        if take_one(&self.fail_opens) {
            return Err(Error::Network("connection reset by peer".into()));
        }

        let body = self.inner.open_read(key, offset).await?;
        if take_one(&self.fail_mid_stream) {
            let broken = body
                .take(1)
                .chain(stream::once(async {
                    Err(Error::Network("read timed out".into()))
                }))
                .boxed();
            return Ok(broken);
        }
        Ok(body)
    }

    async fn open_write(&self, key: &str, offset: u64) -> Result<Box<dyn ObjectSink>> {
        self.inner.open_write(key, offset).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn test_prefix_copy_maps_relative_keys() {
    let source = MemoryClient::new();
    for key in ["dir/a.csv", "dir/b.csv", "dir/sub/c.csv"] {
        source.insert(key, "data");
    }
    let destination = MemoryClient::new();

    let src = endpoint("s3://bucket/dir/", Arc::new(source.clone()));
    let dst = endpoint("s3://other-bucket/out/", Arc::new(destination.clone()));
    let plan = plan(&src, &dst).await;

    let targets: Vec<_> = plan
        .tasks()
        .iter()
        .map(|t| t.destination().to_string())
        .collect();
    assert_eq!(
        targets,
        vec![
            "s3://other-bucket/out/a.csv",
            "s3://other-bucket/out/b.csv",
            "s3://other-bucket/out/sub/c.csv",
        ]
    );

    let report = TransferExecutor::new(TransferRoute::between(&src, &dst))
        .execute(&plan, 2)
        .await;
    assert!(report.is_success());
    assert_eq!(
        destination.keys(),
        vec!["out/a.csv", "out/b.csv", "out/sub/c.csv"]
    );
}

#[tokio::test]
async fn test_report_has_one_entry_per_task_at_any_concurrency() {
    let source = MemoryClient::new().page_size(7);
    for i in 0..25 {
        source.insert(format!("data/{i:02}.bin"), vec![i as u8; 100 + i]);
    }

    for concurrency in [0, 1, 4, 16, 64] {
        let destination = MemoryClient::new();
        let src = endpoint("s3://bucket/data/", Arc::new(source.clone()));
        let dst = endpoint("/restore/", Arc::new(destination.clone()));
        let plan = plan(&src, &dst).await;
        assert_eq!(plan.len(), 25);

        let report = TransferExecutor::new(TransferRoute::between(&src, &dst))
            .with_config(fast_config())
            .execute(&plan, concurrency)
            .await;

        let indices: Vec<_> = report.entries().iter().map(|e| e.index).collect();
        assert_eq!(indices, (0..25).collect::<Vec<_>>(), "concurrency {concurrency}");
        assert_eq!(report.succeeded(), 25);
        assert_eq!(destination.len(), 25);
        assert_eq!(report.total_bytes(), plan.total_bytes());
    }
}

#[tokio::test]
async fn test_transient_failures_below_limit_succeed() {
    let memory = MemoryClient::new();
    memory.insert("in/file.txt", "payload");
    let source = Arc::new(FlakyClient::new(memory).failing_opens(2));

    let src = endpoint("s3://bucket/in/", source.clone());
    let dst = endpoint("/out/", Arc::new(MemoryClient::new()));
    let plan = plan(&src, &dst).await;

    let report = TransferExecutor::new(TransferRoute::between(&src, &dst))
        .with_config(fast_config())
        .execute(&plan, 1)
        .await;

    let entry = &report.entries()[0];
    assert_eq!(entry.state, TaskState::Succeeded);
    assert_eq!(entry.attempts, 3);
    assert!(entry.error.is_none());
}

#[tokio::test]
async fn test_exceeding_retry_limit_is_fatal() {
    let memory = MemoryClient::new();
    memory.insert("in/good.txt", "fine");
    memory.insert("in/z-bad.txt", "never arrives");
    let source = Arc::new(FlakyClient::new(memory));

    let src = endpoint("s3://bucket/in/", source.clone());
    let destination = MemoryClient::new();
    let dst = endpoint("/out/", Arc::new(destination.clone()));
    let plan = plan(&src, &dst).await;

    // Sequential run so the good task reads before failures are switched on
    let switch = source.clone();
    let report = TransferExecutor::new(TransferRoute::between(&src, &dst))
        .with_config(fast_config())
        .with_progress(Arc::new(move |report: &TaskReport| {
            if report.index == 0 {
                switch.fail_opens.store(usize::MAX, Ordering::SeqCst);
            }
        }))
        .execute(&plan, 1)
        .await;

    assert_eq!(report.entries()[0].state, TaskState::Succeeded);
    let bad = &report.entries()[1];
    assert_eq!(bad.state, TaskState::Failed(FailureKind::Fatal));
    assert_eq!(bad.attempts, 3);
    assert!(bad.error.as_deref().unwrap().contains("Network"));
    assert!(!report.is_success());
    assert_eq!(destination.keys(), vec!["/out/good.txt"]);
}

#[tokio::test]
async fn test_retry_resumes_from_committed_offset() {
    let body: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();
    let memory = MemoryClient::new();
    memory.insert("big/blob", body.clone());
    let source = Arc::new(FlakyClient::new(memory).failing_mid_stream(1));

    let destination = MemoryClient::new();
    let src = endpoint("s3://bucket/big/", source.clone());
    let dst = endpoint("/local/", Arc::new(destination.clone()));
    let plan = plan(&src, &dst).await;
    assert!(plan.is_resumable());

    let config = ExecutorConfig {
        stream_threshold: 1024,
        chunk_size: 1024,
        ..fast_config()
    };
    let report = TransferExecutor::new(TransferRoute::between(&src, &dst))
        .with_config(config)
        .execute(&plan, 1)
        .await;

    let entry = &report.entries()[0];
    assert_eq!(entry.state, TaskState::Succeeded);
    assert_eq!(entry.attempts, 2);
    assert_eq!(entry.bytes, body.len() as u64);

    // The first chunk was committed before the failure
    let offsets = source.offsets();
    assert_eq!(offsets.len(), 2);
    assert_eq!(offsets[0], 0);
    assert!(offsets[1] > 0);
    assert_eq!(destination.get("/local/blob").unwrap(), Bytes::from(body));
}

#[tokio::test]
async fn test_retry_restarts_without_resumable_destination() {
    let body = vec![7u8; 100_000];
    let memory = MemoryClient::new();
    memory.insert("/in/blob", body.clone());
    let source = Arc::new(FlakyClient::new(memory).failing_mid_stream(1));

    let destination = MemoryClient::new();
    let src = endpoint("/in/", source.clone());
    let dst = endpoint("s3://bucket/out/", Arc::new(destination.clone()));
    let plan = plan(&src, &dst).await;
    assert!(!plan.is_resumable());

    let config = ExecutorConfig {
        stream_threshold: 1024,
        chunk_size: 1024,
        ..fast_config()
    };
    let report = TransferExecutor::new(TransferRoute::between(&src, &dst))
        .with_config(config)
        .execute(&plan, 1)
        .await;

    assert_eq!(report.entries()[0].state, TaskState::Succeeded);
    assert_eq!(source.offsets(), vec![0, 0]);
    assert_eq!(destination.get("out/blob").unwrap(), Bytes::from(body));
}

#[tokio::test]
async fn test_cancellation_stops_new_tasks() {
    let source = MemoryClient::new();
    for i in 0..5 {
        source.insert(format!("p/{i}"), "x");
    }
    let destination = MemoryClient::new();
    let src = endpoint("s3://bucket/p/", Arc::new(source.clone()));
    let dst = endpoint("/q/", Arc::new(destination.clone()));
    let plan = plan(&src, &dst).await;

    let token = CancellationToken::new();
    let trigger = token.clone();
    let report = TransferExecutor::new(TransferRoute::between(&src, &dst))
        .with_cancellation(token)
        .with_progress(Arc::new(move |_: &TaskReport| trigger.cancel()))
        .execute(&plan, 1)
        .await;

    assert!(report.was_cancelled());
    assert_eq!(report.len(), 5);
    assert_eq!(report.entries()[0].state, TaskState::Succeeded);
    assert!(
        report.entries()[1..]
            .iter()
            .all(|e| e.state == TaskState::Cancelled && e.attempts == 0)
    );
    // Succeeded work is not rolled back
    assert_eq!(destination.keys(), vec!["/q/0"]);
    assert!(!report.is_success());
}

#[tokio::test]
async fn test_missing_access_key_fails_before_any_listing() {
    let source = MemoryClient::new();
    source.insert("dir/a", "x");
    let clients_built = AtomicUsize::new(0);

    let connect = |env: Environment| {
        let resolver = CredentialResolver::new(env);
        let (source, clients_built) = (&source, &clients_built);
        async move {
            let endpoint = Endpoint::connect(
                parse_locator("s3://bucket/dir/").unwrap(),
                &resolver,
                |_, _| {
                    clients_built.fetch_add(1, Ordering::SeqCst);
                    let client: Arc<dyn BackendClient> = Arc::new(source.clone());
                    async move { Ok::<_, Error>(client) }
                },
            )
            .await?;
            let destination = endpoint_for_dest();
            TransferPlanner::default()
                .plan(&endpoint, &destination, &PlanOptions::default())
                .await
        }
    };

    let env = Environment::new()
        .with("SECRET_ACCESS_KEY", "secret")
        .with("DEFAULT_REGION", "us-east-1");
    let err = connect(env).await.unwrap_err();

    assert!(matches!(&err, Error::MissingCredential(name) if name == "ACCESS_KEY_ID"));
    assert!(err.is_plan_error());
    assert_eq!(clients_built.load(Ordering::SeqCst), 0);
    assert_eq!(source.calls().total(), 0);

    // The same path lists the source once the key is present
    let plan = connect(test_env()).await.unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(clients_built.load(Ordering::SeqCst), 1);
    assert!(source.calls().list > 0);
}

fn endpoint_for_dest() -> Endpoint {
    endpoint("s3://other-bucket/out/", Arc::new(MemoryClient::new()))
}

#[tokio::test]
async fn test_s3_single_object_destination_is_rejected_without_io() {
    let source = MemoryClient::new();
    source.insert("dir/file.csv", "x");
    let destination = MemoryClient::new();

    let src = endpoint("s3://bucket/dir/file.csv", Arc::new(source.clone()));
    let dst = endpoint("s3://other/file.csv", Arc::new(destination.clone()));
    let err = TransferPlanner::default()
        .plan(&src, &dst, &PlanOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::UnsupportedOperation {
            backend: Scheme::S3,
            operation: OperationKind::WriteSingleObject,
        }
    ));
    assert_eq!(source.calls().total(), 0);
    assert_eq!(destination.calls().total(), 0);
}

#[tokio::test]
async fn test_empty_prefix_is_rejected() {
    let source = MemoryClient::new();
    source.insert("elsewhere/x", "x");

    let src = endpoint("s3://bucket/empty/", Arc::new(source));
    let dst = endpoint("/tmp/out/", Arc::new(MemoryClient::new()));
    let err = TransferPlanner::default()
        .plan(&src, &dst, &PlanOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::EmptySource(loc) if loc == "s3://bucket/empty/"));
}

#[tokio::test]
async fn test_local_round_trip() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in");
    std::fs::create_dir_all(input.join("nested")).unwrap();
    std::fs::write(input.join("one.txt"), "first").unwrap();
    std::fs::write(input.join("nested/two.txt"), "second").unwrap();

    let bucket = MemoryClient::new();
    let local: Arc<dyn BackendClient> = Arc::new(LocalClient::new());

    let upload_src = endpoint(&format!("{}/", input.display()), local.clone());
    let upload_dst = endpoint("s3://bucket/backup/", Arc::new(bucket.clone()));
    let upload = plan(&upload_src, &upload_dst).await;
    let report = TransferExecutor::new(TransferRoute::between(&upload_src, &upload_dst))
        .execute(&upload, 4)
        .await;
    assert!(report.is_success());
    assert_eq!(
        bucket.keys(),
        vec!["backup/nested/two.txt", "backup/one.txt"]
    );

    let restore = dir.path().join("restore");
    let download_src = endpoint("s3://bucket/backup/", Arc::new(bucket.clone()));
    let download_dst = endpoint(&format!("{}/", restore.display()), local);
    let download = plan(&download_src, &download_dst).await;
    let report = TransferExecutor::new(TransferRoute::between(&download_src, &download_dst))
        .execute(&download, 4)
        .await;
    assert!(report.is_success());

    assert_eq!(std::fs::read_to_string(restore.join("one.txt")).unwrap(), "first");
    assert_eq!(
        std::fs::read_to_string(restore.join("nested/two.txt")).unwrap(),
        "second"
    );
}
