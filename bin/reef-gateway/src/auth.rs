//! Authentication and authorization seam.
//!
//! Signature verification and role evaluation live in an external
//! service; the gateway only needs the resolved identity and a yes/no per
//! action. Development mode derives identities from the login alone.

use async_trait::async_trait;
use axum::http::HeaderMap;
use reef_common::{Error, Result};
use uuid::Uuid;

/// A resolved caller identity
#[derive(Clone, Debug)]
pub struct Identity {
    /// Account UUID
    pub owner: Uuid,
    /// Login the request addressed
    pub login: String,
    /// Active role set
    pub roles: Vec<String>,
}

/// External authentication/authorization collaborator
#[async_trait]
pub trait AuthAgent: Send + Sync {
    /// Verify the request signature and resolve the addressed login to
    /// an owner UUID and role set
    async fn authenticate(&self, login: &str, headers: &HeaderMap) -> Result<Identity>;

    /// Decide whether `identity` may perform `action` on `resource`
    async fn authorize(&self, identity: &Identity, action: &str, resource: &str) -> Result<()>;
}

/// Development agent: no signature check, owner UUID derived from the
/// login so repeated requests agree.
pub struct StaticAuthAgent {
    allow_all: bool,
}

impl StaticAuthAgent {
    pub fn new(allow_all: bool) -> Self {
        Self { allow_all }
    }
}

#[async_trait]
impl AuthAgent for StaticAuthAgent {
    async fn authenticate(&self, login: &str, headers: &HeaderMap) -> Result<Identity> {
        if !self.allow_all && !headers.contains_key("authorization") {
            return Err(Error::Unauthenticated);
        }
        let owner = Uuid::from_bytes(md5::compute(login.as_bytes()).0);
        Ok(Identity {
            owner,
            login: login.to_string(),
            roles: Vec::new(),
        })
    }

    async fn authorize(&self, identity: &Identity, action: &str, resource: &str) -> Result<()> {
        // Owner-only model: the login in the URL is the account the
        // identity resolved from, so everything under it is permitted.
        if self.allow_all || resource.starts_with(&format!("/{}/", identity.login)) {
            return Ok(());
        }
        Err(Error::Forbidden {
            actor: identity.login.clone(),
            action: action.to_string(),
            resource: resource.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_agent_is_deterministic() {
        let agent = StaticAuthAgent::new(true);
        let headers = HeaderMap::new();
        let a = agent.authenticate("bob", &headers).await.unwrap();
        let b = agent.authenticate("bob", &headers).await.unwrap();
        assert_eq!(a.owner, b.owner);
        let c = agent.authenticate("alice", &headers).await.unwrap();
        assert_ne!(a.owner, c.owner);
    }

    #[tokio::test]
    async fn test_missing_authorization_rejected() {
        let agent = StaticAuthAgent::new(false);
        let err = agent
            .authenticate("bob", &HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 401);
    }

    #[tokio::test]
    async fn test_cross_account_forbidden() {
        let agent = StaticAuthAgent::new(false);
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Signature keyId=bob".parse().unwrap());
        let identity = agent.authenticate("bob", &headers).await.unwrap();
        let err = agent
            .authorize(&identity, "getobject", "/alice/buckets/b1")
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 403);
    }
}
