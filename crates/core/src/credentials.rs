//! Credential resolution
//!
//! Credentials are resolved once per run from an injected environment map
//! (plus optional overrides from the config file) and then shared read-only
//! by every client. Nothing else in the crate reads process environment.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::locator::Scheme;

pub const ACCESS_KEY_ID: &str = "ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY: &str = "SECRET_ACCESS_KEY";
pub const SESSION_TOKEN: &str = "SESSION_TOKEN";
pub const DEFAULT_REGION: &str = "DEFAULT_REGION";
pub const ENDPOINT_URL: &str = "ENDPOINT_URL";

/// One credential field a backend understands
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
    pub secret: bool,
}

const S3_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: ACCESS_KEY_ID,
        required: true,
        secret: false,
    },
    FieldSpec {
        name: SECRET_ACCESS_KEY,
        required: true,
        secret: true,
    },
    FieldSpec {
        name: DEFAULT_REGION,
        required: true,
        secret: false,
    },
    FieldSpec {
        name: SESSION_TOKEN,
        required: false,
        secret: true,
    },
    FieldSpec {
        name: ENDPOINT_URL,
        required: false,
        secret: false,
    },
];

/// Credential fields for a backend, required fields first
pub fn fields_for(backend: Scheme) -> &'static [FieldSpec] {
    match backend {
        Scheme::Local => &[],
        Scheme::S3 => S3_FIELDS,
    }
}

/// Name/value lookup the resolver reads from
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Resolved authentication material for one backend
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    backend: Scheme,
    fields: BTreeMap<String, String>,
}

impl Credentials {
    /// Credentials for backends that need none
    pub fn anonymous(backend: Scheme) -> Self {
        Self {
            backend,
            fields: BTreeMap::new(),
        }
    }

    pub fn backend(&self) -> Scheme {
        self.backend
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Value of a field the resolver guaranteed to be present
    pub fn required(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| Error::MissingCredential(name.to_string()))
    }

    /// Whether a session token puts these credentials in temporary mode
    pub fn is_temporary(&self) -> bool {
        self.get(SESSION_TOKEN).is_some()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret: Vec<&str> = fields_for(self.backend)
            .iter()
            .filter(|spec| spec.secret)
            .map(|spec| spec.name)
            .collect();
        let redacted: BTreeMap<&str, &str> = self
            .fields
            .iter()
            .map(|(k, v)| {
                let shown = if secret.contains(&k.as_str()) {
                    "***"
                } else {
                    v.as_str()
                };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("Credentials")
            .field("backend", &self.backend)
            .field("fields", &redacted)
            .finish()
    }
}

/// Resolves [`Credentials`] from overrides, then the environment
#[derive(Debug, Clone, Default)]
pub struct CredentialResolver {
    env: Environment,
    overrides: HashMap<String, String>,
}

impl CredentialResolver {
    pub fn new(env: Environment) -> Self {
        Self {
            env,
            overrides: HashMap::new(),
        }
    }

    /// Per-run values that take precedence over the environment
    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        self.overrides
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .or_else(|| self.env.get(name).filter(|v| !v.is_empty()))
    }

    /// Resolve every field for `backend`, failing on the first missing one
    pub fn resolve(&self, backend: Scheme) -> Result<Arc<Credentials>> {
        let mut fields = BTreeMap::new();

        for spec in fields_for(backend) {
            match self.lookup(spec.name) {
                Some(value) => {
                    fields.insert(spec.name.to_string(), value.to_string());
                }
                None if spec.required => {
                    return Err(Error::MissingCredential(spec.name.to_string()));
                }
                None => {}
            }
        }

        if let Some(endpoint) = fields.get(ENDPOINT_URL) {
            url::Url::parse(endpoint)
                .map_err(|e| Error::Config(format!("{ENDPOINT_URL} '{endpoint}': {e}")))?;
        }

        tracing::debug!(
            backend = %backend,
            temporary = fields.contains_key(SESSION_TOKEN),
            "Resolved credentials"
        );

        Ok(Arc::new(Credentials { backend, fields }))
    }
}
