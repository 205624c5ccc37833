//! Per-request access decisions over cancer studies.

use std::collections::BTreeSet;

/// Prefix of roles granting a single study.
pub const STUDY_ROLE_PREFIX: &str = "study_";

/// Role tokens derived from one request's identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    roles: BTreeSet<String>,
}

impl PermissionSet {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// The protected resource a request addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// `/api/studies`: results are filtered, never refused.
    StudyList,
    /// `/api/studies/{studyId}` and anything below it.
    Study(String),
    /// Any other protected path: authentication suffices.
    Other,
}

impl Resource {
    /// Derive the resource from a request path.
    pub fn from_path(path: &str) -> Self {
        let Some(rest) = path.strip_prefix("/api/studies") else {
            return Resource::Other;
        };
        if rest.is_empty() || rest == "/" {
            return Resource::StudyList;
        }
        let Some(rest) = rest.strip_prefix('/') else {
            // e.g. /api/studies-export
            return Resource::Other;
        };
        let raw = rest.split('/').next().unwrap_or_default();
        // Undecodable ids stay raw and therefore match no role.
        let id = urlencoding::decode(raw)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        Resource::Study(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Study access rule: wildcard role, or a role naming the study.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    all_studies_role: String,
}

impl AccessPolicy {
    pub fn new(all_studies_role: impl Into<String>) -> Self {
        Self {
            all_studies_role: all_studies_role.into(),
        }
    }

    pub fn can_read_study(&self, permissions: &PermissionSet, study_id: &str) -> bool {
        if permissions.contains(&self.all_studies_role) {
            return true;
        }
        // Roles are either `study_<id>` or the bare study id.
        permissions.contains(&format!("{}{}", STUDY_ROLE_PREFIX, study_id))
            || permissions.contains(study_id)
    }

    pub fn decide(&self, permissions: &PermissionSet, resource: &Resource) -> Decision {
        match resource {
            Resource::StudyList | Resource::Other => Decision::Allow,
            Resource::Study(id) if self.can_read_study(permissions, id) => Decision::Allow,
            Resource::Study(_) => Decision::Deny,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_from_path() {
        assert_eq!(Resource::from_path("/api/studies"), Resource::StudyList);
        assert_eq!(Resource::from_path("/api/studies/"), Resource::StudyList);
        assert_eq!(
            Resource::from_path("/api/studies/brca_tcga"),
            Resource::Study("brca_tcga".to_string())
        );
        assert_eq!(
            Resource::from_path("/api/studies/brca_tcga/patients"),
            Resource::Study("brca_tcga".to_string())
        );
        assert_eq!(
            Resource::from_path("/api/studies/brca%5Ftcga"),
            Resource::Study("brca_tcga".to_string())
        );
        assert_eq!(Resource::from_path("/api/studies-export"), Resource::Other);
        assert_eq!(Resource::from_path("/api/info"), Resource::Other);
    }

    #[test]
    fn test_study_role_grants_only_that_study() {
        let policy = AccessPolicy::new("ALL");
        let perms = PermissionSet::new(["study_x"]);
        assert!(policy.can_read_study(&perms, "x"));
        assert!(!policy.can_read_study(&perms, "y"));
        assert_eq!(
            policy.decide(&perms, &Resource::Study("y".into())),
            Decision::Deny
        );
    }

    #[test]
    fn test_bare_study_id_role() {
        let policy = AccessPolicy::new("ALL");
        let perms = PermissionSet::new(["study_tcga_pub"]);
        assert!(policy.can_read_study(&perms, "study_tcga_pub"));
        assert!(policy.can_read_study(&perms, "tcga_pub"));
    }

    #[test]
    fn test_wildcard_grants_everything() {
        let policy = AccessPolicy::new("ALL");
        let perms = PermissionSet::new(["ALL"]);
        for id in ["a", "b", "study_c"] {
            assert_eq!(
                policy.decide(&perms, &Resource::Study(id.into())),
                Decision::Allow
            );
        }
    }

    #[test]
    fn test_empty_permissions_deny_studies_but_allow_listing() {
        let policy = AccessPolicy::new("ALL");
        let perms = PermissionSet::default();
        assert_eq!(
            policy.decide(&perms, &Resource::Study("a".into())),
            Decision::Deny
        );
        assert_eq!(policy.decide(&perms, &Resource::StudyList), Decision::Allow);
    }

    #[test]
    fn test_role_matching_is_exact() {
        let policy = AccessPolicy::new("ALL");
        let perms = PermissionSet::new(["study_brca", "all"]);
        assert!(!policy.can_read_study(&perms, "brca_tcga"));
        assert!(!policy.can_read_study(&perms, "BRCA"));
    }
}
