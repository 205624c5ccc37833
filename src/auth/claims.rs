//! Claim-to-role mapping.
//!
//! Roles come either from a configured path into the claims
//! (`resource_access::cbioportal::roles`) or from a [`UserRoleService`].
//! An absent or empty roles collection yields no permissions.

use super::identity::Identity;
use super::policy::PermissionSet;
use crate::error::{AuthError, ConfigError};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Delimiter between keys of a claim path.
pub const CLAIM_PATH_DELIMITER: &str = "::";

/// Key path into nested claim objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimPath(Vec<String>);

impl ClaimPath {
    pub fn parse(path: &str) -> Result<Self, ConfigError> {
        let keys: Vec<String> = path
            .split(CLAIM_PATH_DELIMITER)
            .map(|k| k.trim().to_string())
            .collect();
        if keys.iter().any(String::is_empty) {
            return Err(ConfigError::invalid(
                "roles-path",
                format!("`{}` has an empty key", path),
            ));
        }
        Ok(Self(keys))
    }

    /// Resolve the path; `None` if any key along the way is missing.
    pub fn resolve<'a>(&self, claims: &'a serde_json::Map<String, Value>) -> Option<&'a Value> {
        let (first, rest) = self.0.split_first()?;
        rest.iter()
            .try_fold(claims.get(first)?, |value, key| value.get(key))
    }

    /// Role strings at the path. Anything but an array of strings is no roles.
    pub fn roles(&self, claims: &serde_json::Map<String, Value>) -> Vec<String> {
        match self.resolve(claims) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(other) => {
                tracing::debug!("roles claim is not an array ({}), granting nothing", kind(other));
                Vec::new()
            }
            None => Vec::new(),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, thiserror::Error)]
#[error("role lookup failed: {0}")]
pub struct RoleLookupError(pub String);

/// Secondary source of roles for a validated identity.
///
/// Returns an empty list for users without roles; errors are reserved for
/// genuine lookup failures.
#[async_trait::async_trait]
pub trait UserRoleService: Send + Sync {
    async fn roles_for(&self, identity: &Identity) -> Result<Vec<String>, RoleLookupError>;
}

/// Roles per user, keyed by email claim (falling back to subject).
pub struct FileUserRoles {
    roles: HashMap<String, Vec<String>>,
}

impl FileUserRoles {
    pub fn new(roles: HashMap<String, Vec<String>>) -> Self {
        let roles = roles
            .into_iter()
            .map(|(user, roles)| (user.to_lowercase(), roles))
            .collect();
        Self { roles }
    }

    /// Load a JSON object mapping user keys to role arrays.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let load_error = |reason: String| ConfigError::Load {
            option: "user-roles-file",
            location: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read(path).map_err(|e| load_error(e.to_string()))?;
        let roles: HashMap<String, Vec<String>> =
            serde_json::from_slice(&raw).map_err(|e| load_error(e.to_string()))?;
        Ok(Self::new(roles))
    }
}

#[async_trait::async_trait]
impl UserRoleService for FileUserRoles {
    async fn roles_for(&self, identity: &Identity) -> Result<Vec<String>, RoleLookupError> {
        let key = identity.email().unwrap_or(identity.subject()).to_lowercase();
        Ok(self.roles.get(&key).cloned().unwrap_or_default())
    }
}

/// Where roles come from. Exactly one source per deployment.
#[derive(Clone)]
pub enum RoleSource {
    ClaimPath(ClaimPath),
    UserService(Arc<dyn UserRoleService>),
}

/// Turns an identity into a normalized permission set.
#[derive(Clone)]
pub struct ClaimMapper {
    source: RoleSource,
    role_prefix: Option<String>,
}

impl ClaimMapper {
    pub fn new(source: RoleSource) -> Self {
        Self {
            source,
            role_prefix: None,
        }
    }

    /// Keep only roles named `<prefix>:<role>`, stripping the prefix.
    pub fn with_role_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.role_prefix = Some(format!("{}:", prefix.into()));
        self
    }

    pub async fn permissions(&self, identity: &Identity) -> Result<PermissionSet, AuthError> {
        let roles = match &self.source {
            RoleSource::ClaimPath(path) => path.roles(identity.claims()),
            RoleSource::UserService(service) => {
                service.roles_for(identity).await.map_err(|e| {
                    tracing::warn!("{}", e);
                    AuthError::RoleLookupFailed
                })?
            }
        };

        let roles = roles.into_iter().filter(|r| !r.is_empty());
        let permissions = match &self.role_prefix {
            Some(prefix) => PermissionSet::new(
                roles.filter_map(|r| r.strip_prefix(prefix.as_str()).map(str::to_string)),
            ),
            None => PermissionSet::new(roles),
        };
        Ok(permissions)
    }
}
