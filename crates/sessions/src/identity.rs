//! Identity resolution — verified-token claims to `User`/`Organization`
//! rows (spec.md §6.1 `auth` handshake: "verify token, upsert user + org
//! membership").
//!
//! JWT verification itself is assumed to happen upstream (spec.md §1
//! Non-goals); this resolver takes already-verified claims and upserts the
//! corresponding identity rows, keyed by `(auth_provider, auth_subject)` for
//! users and `workos_org_id` for organizations.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use tf_domain::entities::{MembershipRole, Organization, OrganizationMembership, User};
use tf_domain::trace::TraceEvent;

/// Claims extracted from a verified auth token.
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    pub auth_provider: String,
    pub auth_subject: String,
    pub email: Option<String>,
    pub workos_org_id: Option<String>,
    pub org_name: Option<String>,
    pub role: MembershipRole,
}

/// Resolves verified claims to identity rows, upserting on first sight.
pub struct IdentityResolver {
    users: RwLock<HashMap<(String, String), User>>,
    orgs: RwLock<HashMap<String, Organization>>,
    memberships: RwLock<HashMap<(Uuid, Uuid), OrganizationMembership>>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            orgs: RwLock::new(HashMap::new()),
            memberships: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a user, an optional organization, and an optional membership
    /// from verified claims, upserting rows that don't exist yet.
    pub fn resolve(&self, claims: &VerifiedClaims) -> (User, Option<Organization>) {
        let user = self.resolve_user(claims);
        let org = claims
            .workos_org_id
            .as_ref()
            .map(|workos_org_id| self.resolve_org(workos_org_id, claims.org_name.as_deref()));

        if let Some(org) = &org {
            self.ensure_membership(user.id, org.id, claims.role);
            TraceEvent::IdentityResolved {
                user_id: user.id.to_string(),
                org_id: org.id.to_string(),
                auth_provider: claims.auth_provider.clone(),
            }
            .emit();
        }

        (user, org)
    }

    fn resolve_user(&self, claims: &VerifiedClaims) -> User {
        let key = (claims.auth_provider.clone(), claims.auth_subject.clone());
        if let Some(existing) = self.users.read().get(&key) {
            return existing.clone();
        }
        let user = User {
            id: Uuid::new_v4(),
            auth_provider: claims.auth_provider.clone(),
            auth_subject: claims.auth_subject.clone(),
            email: claims.email.clone(),
        };
        self.users.write().insert(key, user.clone());
        user
    }

    fn resolve_org(&self, workos_org_id: &str, name: Option<&str>) -> Organization {
        if let Some(existing) = self.orgs.read().get(workos_org_id) {
            return existing.clone();
        }
        let org = Organization {
            id: Uuid::new_v4(),
            workos_org_id: workos_org_id.to_string(),
            name: name.unwrap_or(workos_org_id).to_string(),
        };
        self.orgs.write().insert(workos_org_id.to_string(), org.clone());
        org
    }

    fn ensure_membership(&self, user_id: Uuid, org_id: Uuid, role: MembershipRole) {
        self.memberships
            .write()
            .entry((user_id, org_id))
            .or_insert_with(|| OrganizationMembership {
                user_id,
                org_id,
                role,
                permissions: vec![],
            });
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(subject: &str) -> VerifiedClaims {
        VerifiedClaims {
            auth_provider: "workos".into(),
            auth_subject: subject.into(),
            email: Some(format!("{subject}@example.com")),
            workos_org_id: Some("org_1".into()),
            org_name: Some("Acme".into()),
            role: MembershipRole::Member,
        }
    }

    #[test]
    fn resolving_the_same_subject_twice_returns_the_same_user_id() {
        let resolver = IdentityResolver::new();
        let (first, _) = resolver.resolve(&claims("user_1"));
        let (second, _) = resolver.resolve(&claims("user_1"));
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn resolving_with_an_org_id_upserts_the_organization_and_membership() {
        let resolver = IdentityResolver::new();
        let (user, org) = resolver.resolve(&claims("user_1"));
        let org = org.expect("org claim present");
        assert_eq!(org.workos_org_id, "org_1");
        assert!(resolver.memberships.read().contains_key(&(user.id, org.id)));
    }

    #[test]
    fn resolving_without_an_org_claim_skips_membership() {
        let resolver = IdentityResolver::new();
        let mut c = claims("user_2");
        c.workos_org_id = None;
        let (_, org) = resolver.resolve(&c);
        assert!(org.is_none());
    }
}
