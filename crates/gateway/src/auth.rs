//! Auth-token verification (spec.md §6.1 `auth` handshake).
//!
//! JWT issuance and signature verification are out of scope (spec.md §1
//! Non-goals) — tokens arrive already verified by the identity provider
//! sitting in front of this service in a real deployment. What's left for
//! the gateway is extracting the claims the rest of the system needs and
//! handing them to [`tf_sessions::IdentityResolver`].
//!
//! The wire format is `auth_provider:auth_subject[:org_id[:org_name]]`,
//! colon-separated. In `Environment::Development`, an empty token is
//! accepted and resolves to a fixed local dev identity (spec.md §6.3
//! "gates dev auth bypass").

use tf_domain::config::Environment;
use tf_domain::entities::MembershipRole;
use tf_sessions::VerifiedClaims;

pub struct AuthError {
    pub code: String,
    pub message: String,
}

const DEV_AUTH_PROVIDER: &str = "dev";
const DEV_AUTH_SUBJECT: &str = "local-dev-user";

/// Parse a raw `auth` token into verified claims, or fall back to the dev
/// identity when running in `Environment::Development` with an empty
/// token.
pub fn verify_token(token: &str, environment: Environment) -> Result<VerifiedClaims, AuthError> {
    if token.is_empty() {
        return match environment {
            Environment::Development => Ok(VerifiedClaims {
                auth_provider: DEV_AUTH_PROVIDER.to_string(),
                auth_subject: DEV_AUTH_SUBJECT.to_string(),
                email: None,
                workos_org_id: None,
                org_name: None,
                role: MembershipRole::Owner,
            }),
            Environment::Staging | Environment::Production => Err(AuthError {
                code: "NOT_AUTHENTICATED".to_string(),
                message: "empty auth token".to_string(),
            }),
        };
    }

    let mut parts = token.splitn(4, ':');
    let auth_provider = parts.next().unwrap_or_default();
    let auth_subject = parts.next().unwrap_or_default();
    let org_id = parts.next().filter(|s| !s.is_empty());
    let org_name = parts.next().filter(|s| !s.is_empty());

    if auth_provider.is_empty() || auth_subject.is_empty() {
        return Err(AuthError {
            code: "INVALID_PAYLOAD".to_string(),
            message: "malformed auth token".to_string(),
        });
    }

    Ok(VerifiedClaims {
        auth_provider: auth_provider.to_string(),
        auth_subject: auth_subject.to_string(),
        email: None,
        workos_org_id: org_id.map(str::to_string),
        org_name: org_name.map(str::to_string),
        role: MembershipRole::Member,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_resolves_dev_identity_in_development() {
        let claims = verify_token("", Environment::Development).unwrap();
        assert_eq!(claims.auth_provider, DEV_AUTH_PROVIDER);
    }

    #[test]
    fn empty_token_is_rejected_in_production() {
        assert!(verify_token("", Environment::Production).is_err());
    }

    #[test]
    fn well_formed_token_parses_provider_subject_and_org() {
        let claims = verify_token("workos:user_1:org_1:Acme", Environment::Production).unwrap();
        assert_eq!(claims.auth_provider, "workos");
        assert_eq!(claims.auth_subject, "user_1");
        assert_eq!(claims.workos_org_id.as_deref(), Some("org_1"));
        assert_eq!(claims.org_name.as_deref(), Some("Acme"));
    }

    #[test]
    fn token_without_a_subject_is_rejected() {
        assert!(verify_token("workos:", Environment::Production).is_err());
    }
}
