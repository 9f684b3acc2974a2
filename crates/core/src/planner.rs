//! Transfer planning
//!
//! Planning runs every capability check before touching a backend, then
//! enumerates the source and maps each object onto the destination. A
//! rejected combination never produces a [`TransferPlan`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::capability::{CapabilityRegistry, IfExists, OperationKind};
use crate::client::BackendClient;
use crate::credentials::{CredentialResolver, Credentials};
use crate::error::{Error, Result};
use crate::lister::ObjectLister;
use crate::locator::Locator;
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::task::{TransferPlan, TransferTask};

/// A locator together with the credentials and client that serve it
#[derive(Clone)]
pub struct Endpoint {
    pub locator: Locator,
    pub credentials: Arc<Credentials>,
    pub client: Arc<dyn BackendClient>,
}

impl Endpoint {
    pub fn new(
        locator: Locator,
        credentials: Arc<Credentials>,
        client: Arc<dyn BackendClient>,
    ) -> Self {
        Self {
            locator,
            credentials,
            client,
        }
    }

    /// Resolve credentials for `locator`, then build its client
    ///
    /// `make_client` only runs once every required credential resolved.
    pub async fn connect<F, Fut>(
        locator: Locator,
        resolver: &CredentialResolver,
        make_client: F,
    ) -> Result<Self>
    where
        F: FnOnce(Locator, Arc<Credentials>) -> Fut,
        Fut: Future<Output = Result<Arc<dyn BackendClient>>>,
    {
        let credentials = resolver.resolve(locator.scheme())?;
        let client = make_client(locator.clone(), credentials.clone()).await?;
        Ok(Self::new(locator, credentials, client))
    }
}

/// User choices that shape a plan
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub if_exists: IfExists,
    /// Only copy objects whose source-relative key matches
    pub include: Option<glob::Pattern>,
}

impl PlanOptions {
    pub fn new(if_exists: IfExists) -> Self {
        Self {
            if_exists,
            include: None,
        }
    }

    /// Only copy objects whose relative key matches the glob `pattern`
    pub fn with_include(mut self, pattern: &str) -> Result<Self> {
        let compiled = glob::Pattern::new(pattern)
            .map_err(|e| Error::Config(format!("invalid include pattern '{pattern}': {e}")))?;
        self.include = Some(compiled);
        Ok(self)
    }
}

/// Shape of a transfer, decided by the two locators' prefix flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferIntent {
    SingleToSingle,
    SingleToPrefix,
    PrefixToPrefix,
}

/// Builds validated transfer plans
#[derive(Debug, Clone)]
pub struct TransferPlanner<'r> {
    registry: &'r CapabilityRegistry,
    retry: RetryConfig,
}

impl Default for TransferPlanner<'static> {
    fn default() -> Self {
        Self::new(CapabilityRegistry::builtin())
    }
}

impl<'r> TransferPlanner<'r> {
    pub fn new(registry: &'r CapabilityRegistry) -> Self {
        Self {
            registry,
            retry: RetryConfig::default(),
        }
    }

    /// Retry policy for listing and stat calls made while planning
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Check a source/destination pair without any I/O
    pub fn validate(
        &self,
        source: &Locator,
        destination: &Locator,
        options: &PlanOptions,
    ) -> Result<TransferIntent> {
        if source == destination {
            return Err(Error::InvalidLocator(format!(
                "source and destination are the same: {source}"
            )));
        }

        let src = source.scheme();
        let dst = destination.scheme();

        self.registry.require_support(src, OperationKind::ReadObject)?;

        let intent = match (source.is_prefix(), destination.is_prefix()) {
            (false, false) => {
                self.registry
                    .require_support(dst, OperationKind::WriteSingleObject)?;
                TransferIntent::SingleToSingle
            }
            (false, true) => {
                self.registry.require_support(dst, OperationKind::WritePrefix)?;
                TransferIntent::SingleToPrefix
            }
            (true, true) => {
                self.registry.require_support(src, OperationKind::ListObjects)?;
                self.registry.require_support(dst, OperationKind::WritePrefix)?;
                TransferIntent::PrefixToPrefix
            }
            (true, false) => {
                return Err(Error::InvalidLocator(format!(
                    "{destination} must end with '/' when copying from prefix {source}"
                )));
            }
        };

        self.registry.require_if_exists(dst, options.if_exists)?;

        Ok(intent)
    }

    /// Validate, enumerate, and build the plan
    pub async fn plan(
        &self,
        source: &Endpoint,
        destination: &Endpoint,
        options: &PlanOptions,
    ) -> Result<TransferPlan> {
        check_credentials(source)?;
        check_credentials(destination)?;

        let intent = self.validate(&source.locator, &destination.locator, options)?;

        let tasks = match intent {
            TransferIntent::SingleToSingle | TransferIntent::SingleToPrefix => {
                vec![self.plan_single(source, &destination.locator).await?]
            }
            TransferIntent::PrefixToPrefix => {
                self.plan_prefix(source, &destination.locator, options)
                    .await?
            }
        };

        if tasks.is_empty() {
            return Err(Error::EmptySource(source.locator.to_string()));
        }

        let resumable = self
            .registry
            .supports(source.locator.scheme(), OperationKind::RangedRead)
            && self
                .registry
                .supports(destination.locator.scheme(), OperationKind::ResumableWrite);

        let plan = TransferPlan::new(
            source.locator.clone(),
            destination.locator.clone(),
            options.if_exists,
            resumable,
            tasks,
        );

        tracing::info!(
            source = %plan.source(),
            destination = %plan.destination(),
            tasks = plan.len(),
            bytes = plan.total_bytes(),
            resumable,
            "Transfer planned"
        );

        Ok(plan)
    }

    async fn plan_single(&self, source: &Endpoint, destination: &Locator) -> Result<TransferTask> {
        let key = source.locator.path();
        let client = &source.client;
        let descriptor = retry_with_backoff(&self.retry, move || client.stat(key), Error::is_retryable)
            .await?
            .ok_or_else(|| Error::NotFound(source.locator.to_string()))?;

        let target = if destination.is_prefix() {
            destination.join(source.locator.file_name())?
        } else {
            destination.clone()
        };

        Ok(TransferTask::new(
            0,
            source.locator.clone(),
            target,
            descriptor.size,
            descriptor.etag,
        ))
    }

    async fn plan_prefix(
        &self,
        source: &Endpoint,
        destination: &Locator,
        options: &PlanOptions,
    ) -> Result<Vec<TransferTask>> {
        let mut lister = ObjectLister::new(source.client.clone(), source.locator.clone());
        let mut tasks = Vec::new();
        // Storage path of each destination, mapped to the key writing it
        let mut targets: HashMap<String, String> = HashMap::new();

        loop {
            let current = &lister;
            let page = retry_with_backoff(&self.retry, move || current.fetch_page(), Error::is_retryable)
                .await?;
            let Some(page) = page else { break };

            for object in lister.advance(page) {
                let Some(relative) = source.locator.relative_key(&object.key) else {
                    continue;
                };
                if let Some(pattern) = &options.include
                    && !pattern.matches(relative)
                {
                    continue;
                }

                let object_source = source.locator.object(&object.key);
                let object_destination = destination.join(relative)?;
                if let Some(previous) =
                    targets.insert(object_destination.storage_path(), object.key.clone())
                {
                    return Err(Error::InvalidLocator(format!(
                        "'{previous}' and '{}' would both be written to {object_destination}",
                        object.key
                    )));
                }
                tasks.push(TransferTask::new(
                    tasks.len(),
                    object_source,
                    object_destination,
                    object.size,
                    object.etag,
                ));
            }
        }

        tracing::debug!(
            source = %source.locator,
            pages = lister.cursor().pages_fetched(),
            objects = tasks.len(),
            "Enumerated source prefix"
        );

        Ok(tasks)
    }
}

fn check_credentials(endpoint: &Endpoint) -> Result<()> {
    if endpoint.credentials.backend() != endpoint.locator.scheme() {
        return Err(Error::Config(format!(
            "{} credentials cannot be used for {}",
            endpoint.credentials.backend(),
            endpoint.locator
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use crate::client::{ListPage, MockBackendClient, ObjectDescriptor};
    use crate::credentials::Environment;
    use crate::locator::{Scheme, parse_locator};

    fn creds(scheme: Scheme) -> Arc<Credentials> {
        let env = Environment::new()
            .with("ACCESS_KEY_ID", "AKID")
            .with("SECRET_ACCESS_KEY", "secret")
            .with("DEFAULT_REGION", "us-east-1");
        CredentialResolver::new(env).resolve(scheme).unwrap()
    }

    fn endpoint(raw: &str, client: MockBackendClient) -> Endpoint {
        let locator = parse_locator(raw).unwrap();
        let credentials = creds(locator.scheme());
        Endpoint::new(locator, credentials, Arc::new(client))
    }

    /// A mock that fails the test if any method is called
    fn untouched() -> MockBackendClient {
        let mut mock = MockBackendClient::new();
        mock.expect_list_page().never();
        mock.expect_stat().never();
        mock.expect_open_read().never();
        mock.expect_open_write().never();
        mock.expect_delete().never();
        mock
    }

    #[tokio::test]
    async fn test_s3_single_to_single_is_rejected() {
        let source = endpoint("s3://bucket/dir/file.csv", untouched());
        let destination = endpoint("s3://other/out.csv", untouched());

        let err = TransferPlanner::default()
            .plan(&source, &destination, &PlanOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::UnsupportedOperation {
                backend: Scheme::S3,
                operation: OperationKind::WriteSingleObject
            }
        ));
    }

    #[tokio::test]
    async fn test_local_to_s3_single_is_rejected_without_io() {
        let source = endpoint("/tmp/data.csv", untouched());
        let destination = endpoint("s3://bucket/data.csv", untouched());

        let err = TransferPlanner::default()
            .plan(&source, &destination, &PlanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { .. }));
    }

    #[tokio::test]
    async fn test_prefix_to_prefix_maps_relative_keys() {
        let mut mock = MockBackendClient::new();
        mock.expect_list_page()
            .withf(|prefix, _| prefix == "dir/")
            .times(1)
            .returning(|_, _| {
                Ok(ListPage {
                    objects: vec![
                        ObjectDescriptor::new("dir/a.csv", 10),
                        ObjectDescriptor::new("dir/b.csv", 20),
                        ObjectDescriptor::new("dir/sub/c.csv", 30),
                    ],
                    next_token: None,
                })
            });

        let source = endpoint("s3://bucket/dir/", mock);
        let destination = endpoint("s3://other-bucket/out/", untouched());

        let plan = TransferPlanner::default()
            .plan(&source, &destination, &PlanOptions::default())
            .await
            .unwrap();

        assert_eq!(plan.len(), 3);
        let destinations: Vec<&str> = plan
            .tasks()
            .iter()
            .map(|t| t.destination().path())
            .collect();
        assert_eq!(destinations, vec!["out/a.csv", "out/b.csv", "out/sub/c.csv"]);
        assert!(plan
            .tasks()
            .iter()
            .all(|t| t.destination().bucket() == "other-bucket"));
        assert_eq!(plan.total_bytes(), 60);
        assert!(!plan.is_resumable());
        for (i, task) in plan.tasks().iter().enumerate() {
            assert_eq!(task.index(), i);
        }
    }

    fn doubled_separator_listing() -> MockBackendClient {
        let mut mock = MockBackendClient::new();
        mock.expect_list_page().times(1).returning(|_, _| {
            Ok(ListPage {
                objects: vec![
                    ObjectDescriptor::new("dir//x", 1),
                    ObjectDescriptor::new("dir/x", 2),
                ],
                next_token: None,
            })
        });
        mock
    }

    #[tokio::test]
    async fn test_doubled_separator_keys_stay_distinct() {
        let source = endpoint("s3://bucket/dir/", doubled_separator_listing());
        let destination = endpoint("s3://other-bucket/out/", untouched());

        let plan = TransferPlanner::default()
            .plan(&source, &destination, &PlanOptions::default())
            .await
            .unwrap();

        let destinations: Vec<&str> = plan
            .tasks()
            .iter()
            .map(|t| t.destination().path())
            .collect();
        assert_eq!(destinations, vec!["out//x", "out/x"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_colliding_local_destinations_are_rejected() {
        let source = endpoint("s3://bucket/dir/", doubled_separator_listing());
        let destination = endpoint("/tmp/out/", untouched());

        let err = TransferPlanner::default()
            .plan(&source, &destination, &PlanOptions::default())
            .await
            .unwrap_err();

        assert!(err.is_plan_error());
        assert!(
            matches!(&err, Error::InvalidLocator(msg) if msg.contains("dir//x") && msg.contains("dir/x")),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn test_empty_prefix_is_empty_source() {
        let mut mock = MockBackendClient::new();
        mock.expect_list_page()
            .returning(|_, _| Ok(ListPage::default()));

        let source = endpoint("s3://bucket/nothing/", mock);
        let destination = endpoint("/tmp/out/", untouched());

        let err = TransferPlanner::default()
            .plan(&source, &destination, &PlanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptySource(loc) if loc == "s3://bucket/nothing/"));
    }

    #[tokio::test]
    async fn test_single_to_prefix_uses_file_name() {
        let mut mock = MockBackendClient::new();
        mock.expect_stat()
            .withf(|key| key == "dir/file.csv")
            .returning(|key| Ok(Some(ObjectDescriptor::new(key, 7).with_etag("e1"))));

        let source = endpoint("s3://bucket/dir/file.csv", mock);
        let destination = endpoint("s3://other/out/", untouched());

        let plan = TransferPlanner::default()
            .plan(&source, &destination, &PlanOptions::default())
            .await
            .unwrap();
        assert_eq!(plan.len(), 1);
        let task = &plan.tasks()[0];
        assert_eq!(task.destination().path(), "out/file.csv");
        assert_eq!(task.expected_size(), 7);
        assert_eq!(task.etag(), Some("e1"));
    }

    #[tokio::test]
    async fn test_missing_single_source_is_not_found() {
        let mut mock = MockBackendClient::new();
        mock.expect_stat().returning(|_| Ok(None));

        let source = endpoint("s3://bucket/missing.csv", mock);
        let destination = endpoint("/tmp/out/", untouched());

        let err = TransferPlanner::default()
            .plan(&source, &destination, &PlanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_listing_retries_transient_page_errors() {
        let mut mock = MockBackendClient::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_list_page()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(Error::Network("503".into())));
        mock.expect_list_page()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(ListPage {
                    objects: vec![ObjectDescriptor::new("p/x", 1)],
                    next_token: None,
                })
            });

        let source = endpoint("s3://bucket/p/", mock);
        let destination = endpoint("/tmp/out/", untouched());
        let planner = TransferPlanner::default().with_retry(RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        });

        let plan = planner
            .plan(&source, &destination, &PlanOptions::default())
            .await
            .unwrap();
        assert_eq!(plan.len(), 1);
        // S3 supports ranged reads and local files resume writes
        assert!(plan.is_resumable());
    }

    #[tokio::test]
    async fn test_prefix_to_single_is_invalid() {
        let source = endpoint("s3://bucket/dir/", untouched());
        let destination = endpoint("/tmp/out.csv", untouched());

        let err = TransferPlanner::default()
            .plan(&source, &destination, &PlanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLocator(_)));
    }

    #[tokio::test]
    async fn test_if_exists_checked_against_destination() {
        let source = endpoint("/tmp/in/", untouched());
        let destination = endpoint("s3://bucket/out/", untouched());
        let options = PlanOptions {
            if_exists: IfExists::Skip,
            ..Default::default()
        };

        let err = TransferPlanner::default()
            .plan(&source, &destination, &options)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedIfExists {
                backend: Scheme::S3,
                mode: IfExists::Skip
            }
        ));
    }

    #[tokio::test]
    async fn test_include_filter() {
        let mut mock = MockBackendClient::new();
        mock.expect_list_page().returning(|_, _| {
            Ok(ListPage {
                objects: vec![
                    ObjectDescriptor::new("in/a.csv", 1),
                    ObjectDescriptor::new("in/b.json", 1),
                ],
                next_token: None,
            })
        });

        let source = endpoint("s3://bucket/in/", mock);
        let destination = endpoint("/tmp/out/", untouched());
        let options = PlanOptions::default().with_include("*.csv").unwrap();

        let plan = TransferPlanner::default()
            .plan(&source, &destination, &options)
            .await
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.tasks()[0].destination().path(), "/tmp/out/a.csv");
    }

    #[test]
    fn test_invalid_include_pattern() {
        let err = PlanOptions::new(IfExists::Skip).with_include("[").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("include")));
    }

    #[tokio::test]
    async fn test_mismatched_credentials() {
        let locator = parse_locator("s3://bucket/dir/").unwrap();
        let source = Endpoint::new(
            locator,
            Arc::new(Credentials::anonymous(Scheme::Local)),
            Arc::new(untouched()),
        );
        let destination = endpoint("/tmp/out/", untouched());

        let err = TransferPlanner::default()
            .plan(&source, &destination, &PlanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_registry_rows_drive_validation() {
        // A registry where S3 can write single objects accepts the same pair
        let registry = CapabilityRegistry::new(vec![Capability {
            backend: Scheme::S3,
            supports: OperationKind::ALL.into_iter().collect(),
            if_exists: [IfExists::Overwrite].into_iter().collect(),
        }]);
        let planner = TransferPlanner::new(&registry);
        let intent = planner
            .validate(
                &parse_locator("s3://a/x.csv").unwrap(),
                &parse_locator("s3://b/y.csv").unwrap(),
                &PlanOptions::default(),
            )
            .unwrap();
        assert_eq!(intent, TransferIntent::SingleToSingle);
    }

    #[test]
    fn test_same_source_and_destination() {
        let loc = parse_locator("s3://a/dir/").unwrap();
        let err = TransferPlanner::default()
            .validate(&loc, &loc, &PlanOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLocator(_)));
    }
}
