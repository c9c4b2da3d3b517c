use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::models::CoreError;

pub const DEFAULT_PLATFORM: &str = "default";

pub trait Credential: Debug + Send + Sync {
    fn platform(&self) -> &str;

    fn verify_connection(&self) -> Result<(), CoreError>;
}

#[derive(Clone, Debug, Default)]
pub struct PlatformCredentials {
    pub admin: Option<Arc<dyn Credential>>,
    pub users: Vec<Arc<dyn Credential>>,
}

impl PlatformCredentials {
    pub fn admin(admin: Arc<dyn Credential>) -> Self {
        Self {
            admin: Some(admin),
            users: Vec::new(),
        }
    }

    pub fn with_users(mut self, users: Vec<Arc<dyn Credential>>) -> Self {
        self.users = users;
        self
    }
}

/// Credentials handed to plugin validators, keyed by platform.
pub type Credentials = BTreeMap<String, PlatformCredentials>;

pub trait Deployment: Send + Sync {
    fn credentials_for(&self, platform: &str) -> Result<PlatformCredentials, CoreError>;

    fn all_credentials(&self) -> BTreeMap<String, Vec<PlatformCredentials>>;
}

#[derive(Clone, Debug, Default)]
pub struct StaticDeployment {
    platforms: BTreeMap<String, Vec<PlatformCredentials>>,
}

impl StaticDeployment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_platform(
        mut self,
        platform: impl Into<String>,
        credentials: PlatformCredentials,
    ) -> Self {
        self.platforms
            .entry(platform.into())
            .or_default()
            .push(credentials);
        self
    }
}

impl Deployment for StaticDeployment {
    fn credentials_for(&self, platform: &str) -> Result<PlatformCredentials, CoreError> {
        Ok(self
            .platforms
            .get(platform)
            .and_then(|entries| entries.first())
            .cloned()
            .unwrap_or_default())
    }

    fn all_credentials(&self) -> BTreeMap<String, Vec<PlatformCredentials>> {
        self.platforms.clone()
    }
}
