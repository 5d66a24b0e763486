//! Authorization seam.
//!
//! The dispatcher consults an [`Authorizer`] with the connection's bearer
//! credential before executing any handler. Credential issuance and
//! validation internals live with the collaborator behind this trait.

use async_trait::async_trait;

/// Authorization collaborator.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Validate the opaque credential presented during the handshake.
    async fn authenticate(&self, credential: &str) -> bool {
        let _ = credential;
        true
    }

    /// Whether the credential may invoke the named handler.
    async fn authorize(&self, credential: &str, handler: &str) -> bool;
}

/// Permits everything. The default for deployments that gate access at the
/// network layer instead.
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _credential: &str, _handler: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_permits() {
        assert!(AllowAll.authenticate("anything").await);
        assert!(AllowAll.authorize("anything", "echo").await);
    }
}
