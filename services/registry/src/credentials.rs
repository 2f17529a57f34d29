//! Temporary credentials for registries in other accounts.
//!
//! Cross-account access goes through two collaborators: a
//! [`CredentialProvider`] which assumes a role in the target account, and a
//! [`RegistryConnector`] which turns the resulting credentials into a
//! [`Registry`] client for one region.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use storage::Storage;
use zeroize::Zeroize;

use crate::api::Registry;
use crate::error::RegistryError;
use crate::local::{StorageRegistry, DEFAULT_URL_TTL};

const ARN_PREFIX: &str = "arn:aws:iam::";

/// A credential value which is redacted from debug output and wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// The underlying value.
    pub fn revealed(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Errors obtaining or using temporary credentials.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Account ids are twelve digits.
    #[error("invalid account id {0:?}")]
    InvalidAccount(String),

    /// Not an `arn:aws:iam::<account>:role/<name>` string.
    #[error("invalid role ARN {0:?}")]
    InvalidArn(String),

    /// The provider refused to assume the role.
    #[error("access denied assuming {0}")]
    AccessDenied(RoleArn),

    /// The credentials are no longer valid.
    #[error("credentials for {role} expired at {expiration}")]
    Expired {
        /// Role the credentials were issued for.
        role: RoleArn,
        /// When they expired.
        expiration: DateTime<Utc>,
    },

    /// The credentials belong to a different account than the one requested.
    #[error("credentials for account {issued} cannot access account {requested}")]
    WrongAccount {
        /// Account the credentials were issued in.
        issued: String,
        /// Account the client was requested for.
        requested: String,
    },

    /// Building the client failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// An IAM role, `arn:aws:iam::<account>:role/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleArn {
    account: String,
    name: String,
}

impl RoleArn {
    /// The role `name` in `account`.
    pub fn new(account: &str, name: &str) -> Result<Self, CredentialError> {
        validate_account(account)?;
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(CredentialError::InvalidArn(format!(
                "{ARN_PREFIX}{account}:role/{name}"
            )));
        }
        Ok(Self {
            account: account.to_owned(),
            name: name.to_owned(),
        })
    }

    /// The account holding the role.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// The role name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RoleArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ARN_PREFIX}{}:role/{}", self.account, self.name)
    }
}

impl FromStr for RoleArn {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CredentialError::InvalidArn(s.to_owned());
        let rest = s.strip_prefix(ARN_PREFIX).ok_or_else(invalid)?;
        let (account, resource) = rest.split_once(':').ok_or_else(invalid)?;
        let name = resource.strip_prefix("role/").ok_or_else(invalid)?;
        RoleArn::new(account, name).map_err(|_| invalid())
    }
}

/// Check that `account` is a twelve digit account id.
pub fn validate_account(account: &str) -> Result<(), CredentialError> {
    if account.len() == 12 && account.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(CredentialError::InvalidAccount(account.to_owned()))
    }
}

/// Short lived credentials obtained by assuming a role.
#[derive(Debug, Clone)]
pub struct TemporaryCredentials {
    /// Access key id.
    pub access_key_id: String,

    /// Secret access key.
    pub secret_access_key: Secret,

    /// Session token accompanying the key pair.
    pub session_token: Secret,

    /// When the credentials stop working.
    pub expiration: DateTime<Utc>,

    /// The role which was assumed.
    pub role: RoleArn,
}

impl TemporaryCredentials {
    /// The account the credentials act in.
    pub fn account(&self) -> &str {
        self.role.account()
    }

    /// Whether the credentials have expired.
    pub fn is_expired(&self) -> bool {
        self.expiration <= Utc::now()
    }
}

/// Assumes roles to obtain temporary credentials.
#[async_trait::async_trait]
pub trait CredentialProvider: fmt::Debug + Send + Sync {
    /// Assume `role`, naming the session `session_name`.
    async fn assume_role(
        &self,
        role: &RoleArn,
        session_name: &str,
    ) -> Result<TemporaryCredentials, CredentialError>;
}

/// Builds registry clients from temporary credentials.
#[async_trait::async_trait]
pub trait RegistryConnector: fmt::Debug + Send + Sync {
    /// A client for the registry of `account` in `region`.
    async fn connect(
        &self,
        account: &str,
        region: &str,
        credentials: &TemporaryCredentials,
    ) -> Result<Arc<dyn Registry>, CredentialError>;
}

/// A [`CredentialProvider`] which mints credentials locally.
///
/// Any well formed role is assumable, except in accounts explicitly denied.
#[derive(Debug, Clone)]
pub struct LocalCredentialProvider {
    session_duration: Duration,
    denied: Vec<String>,
}

impl Default for LocalCredentialProvider {
    fn default() -> Self {
        Self {
            session_duration: Duration::from_secs(900),
            denied: Vec::new(),
        }
    }
}

impl LocalCredentialProvider {
    /// A provider issuing fifteen minute sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue sessions lasting `duration`.
    pub fn with_session_duration(mut self, duration: Duration) -> Self {
        self.session_duration = duration;
        self
    }

    /// Refuse to assume roles in `account`.
    pub fn deny_account(mut self, account: impl Into<String>) -> Self {
        self.denied.push(account.into());
        self
    }
}

#[async_trait::async_trait]
impl CredentialProvider for LocalCredentialProvider {
    #[tracing::instrument(skip(self), fields(%role))]
    async fn assume_role(
        &self,
        role: &RoleArn,
        session_name: &str,
    ) -> Result<TemporaryCredentials, CredentialError> {
        if self.denied.iter().any(|account| account == role.account()) {
            return Err(CredentialError::AccessDenied(role.clone()));
        }

        let key = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
        let expiration = Utc::now()
            + chrono::Duration::from_std(self.session_duration)
                .unwrap_or_else(|_| chrono::Duration::seconds(900));

        tracing::debug!(%expiration, "issued session credentials");
        Ok(TemporaryCredentials {
            access_key_id: format!("ASIA{}", &key[..16]),
            secret_access_key: Secret::new(uuid::Uuid::new_v4().to_string()),
            session_token: Secret::new(uuid::Uuid::new_v4().to_string()),
            expiration,
            role: role.clone(),
        })
    }
}

/// A [`RegistryConnector`] producing [`StorageRegistry`] clients.
///
/// Every `(account, region)` pair lives in its own bucket of the shared
/// storage, see [`StorageRegistry::for_account`].
#[derive(Debug, Clone)]
pub struct StorageConnector {
    storage: Storage,
    part_size: Option<u64>,
    url_ttl: Duration,
}

impl StorageConnector {
    /// Connect to registries kept in `storage`.
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            part_size: None,
            url_ttl: DEFAULT_URL_TTL,
        }
    }

    /// Limit the upload part size of connected registries.
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size);
        self
    }

    /// Set the download url lifetime of connected registries.
    pub fn with_url_ttl(mut self, ttl: Duration) -> Self {
        self.url_ttl = ttl;
        self
    }
}

#[async_trait::async_trait]
impl RegistryConnector for StorageConnector {
    #[tracing::instrument(skip(self, credentials), fields(role=%credentials.role))]
    async fn connect(
        &self,
        account: &str,
        region: &str,
        credentials: &TemporaryCredentials,
    ) -> Result<Arc<dyn Registry>, CredentialError> {
        validate_account(account)?;
        if credentials.account() != account {
            return Err(CredentialError::WrongAccount {
                issued: credentials.account().to_owned(),
                requested: account.to_owned(),
            });
        }
        if credentials.is_expired() {
            return Err(CredentialError::Expired {
                role: credentials.role.clone(),
                expiration: credentials.expiration,
            });
        }

        let mut registry =
            StorageRegistry::for_account(&self.storage, account, region).with_url_ttl(self.url_ttl);
        if let Some(part_size) = self.part_size {
            registry = registry.with_part_size(part_size);
        }
        Ok(Arc::new(registry))
    }
}
