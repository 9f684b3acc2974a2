//! Subcommands and the state they share

pub mod cp;
pub mod features;
pub mod ls;

use std::sync::Arc;

use anyhow::Context;
use xfer_core::{
    BackendClient, Config, ConfigManager, CredentialResolver, Endpoint, Environment, LocalClient,
    Locator, Scheme,
};
use xfer_s3::S3Client;

/// Environment snapshot and loaded configuration for one invocation
#[derive(Debug, Clone)]
pub struct AppContext {
    env: Environment,
    config: Config,
}

impl AppContext {
    /// Snapshot the process environment and load `config.toml`
    pub fn load() -> anyhow::Result<Self> {
        Self::from_env(Environment::from_process())
    }

    pub fn from_env(env: Environment) -> anyhow::Result<Self> {
        let manager = ConfigManager::new(&env).context("Failed to locate config directory")?;
        let config = manager.load().with_context(|| {
            format!("Failed to load {}", manager.config_path().display())
        })?;
        Ok(Self { env, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn resolver(&self, backend: Scheme) -> CredentialResolver {
        CredentialResolver::new(self.env.clone())
            .with_overrides(self.config.credential_overrides(backend))
    }

    /// Resolve credentials and build the client that serves `locator`
    pub async fn connect(&self, locator: Locator) -> xfer_core::Result<Endpoint> {
        let backend = locator.scheme();
        let read_chunk = self.config.transfer.chunk_size_bytes;

        let endpoint = Endpoint::connect(
            locator,
            &self.resolver(backend),
            |locator, credentials| async move {
                let client: Arc<dyn BackendClient> = match locator.scheme() {
                    Scheme::Local => Arc::new(LocalClient::new().read_chunk(read_chunk)),
                    Scheme::S3 => Arc::new(S3Client::new(locator.bucket(), &credentials).await?),
                };
                Ok::<_, xfer_core::Error>(client)
            },
        )
        .await?;

        tracing::debug!(locator = %endpoint.locator, backend = %backend, "Connected endpoint");
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use xfer_core::{Error, parse_locator};

    #[tokio::test]
    async fn test_connect_requires_credentials_first() {
        let config = TempDir::new().unwrap();
        let env = Environment::new()
            .with("XFER_CONFIG_DIR", config.path().to_string_lossy())
            .with("SECRET_ACCESS_KEY", "secret")
            .with("DEFAULT_REGION", "us-east-1");
        let ctx = AppContext::from_env(env).unwrap();

        let err = ctx
            .connect(parse_locator("s3://bucket/dir/").unwrap())
            .await
            .err()
            .expect("connect should fail before building a client");
        assert!(matches!(err, Error::MissingCredential(name) if name == "ACCESS_KEY_ID"));

        let local = ctx.connect(parse_locator("/tmp/in/").unwrap()).await.unwrap();
        assert_eq!(local.locator.scheme(), Scheme::Local);
    }
}
