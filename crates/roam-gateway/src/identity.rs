//! Bearer token -> user identity.
//!
//! Two resolvers: local HS256 JWT validation, and the external auth
//! service over HTTP.

use futures_util::future::BoxFuture;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{debug, warn};

use roam_types::api::{Claims, UserIdentity};

pub trait IdentityResolver: Send + Sync {
    /// `None` when the token does not map to a user.
    fn resolve<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Option<UserIdentity>>;
}

fn strip_bearer(token: &str) -> &str {
    token.strip_prefix("Bearer ").unwrap_or(token).trim()
}

pub struct JwtResolver {
    secret: String,
}

impl JwtResolver {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Mint a token for `identity`, valid for `ttl_days`.
    pub fn issue(&self, identity: &UserIdentity, ttl_days: i64) -> anyhow::Result<String> {
        let claims = Claims {
            sub: identity.id.to_string(),
            username: identity.username.clone(),
            discriminator: identity.discriminator.clone(),
            exp: (chrono::Utc::now() + chrono::Duration::days(ttl_days)).timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;

        Ok(token)
    }

    fn verify(&self, token: &str) -> Option<UserIdentity> {
        let data = decode::<Claims>(
            strip_bearer(token),
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| debug!("Rejected token: {}", e))
        .ok()?;

        let id = data.claims.sub.parse().ok()?;
        Some(UserIdentity {
            id,
            username: data.claims.username,
            discriminator: data.claims.discriminator,
        })
    }
}

impl IdentityResolver for JwtResolver {
    fn resolve<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Option<UserIdentity>> {
        Box::pin(async move { self.verify(token) })
    }
}

/// Resolves tokens against the external auth service.
///
/// `GET <url>` with the token in `Authorization`; a 2xx response with
/// `{"uid", "username", "discriminator"}` is a match, anything else
/// (including `{}`) is not.
pub struct HttpResolver {
    client: reqwest::Client,
    url: String,
}

impl HttpResolver {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl IdentityResolver for HttpResolver {
    fn resolve<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Option<UserIdentity>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(&self.url)
                .header(reqwest::header::AUTHORIZATION, token)
                .send()
                .await
                .map_err(|e| warn!("Auth service unreachable: {}", e))
                .ok()?;

            if !resp.status().is_success() {
                return None;
            }

            resp.json::<UserIdentity>().await.ok()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ada() -> UserIdentity {
        UserIdentity {
            id: 42,
            username: "ada".into(),
            discriminator: "0001".into(),
        }
    }

    #[tokio::test]
    async fn test_issued_token_resolves() {
        let resolver = JwtResolver::new("secret");
        let token = resolver.issue(&ada(), 1).unwrap();
        assert_eq!(resolver.resolve(&token).await, Some(ada()));
        let bearer = format!("Bearer {}", token);
        assert_eq!(resolver.resolve(&bearer).await, Some(ada()));
    }

    #[tokio::test]
    async fn test_foreign_or_garbage_token_rejected() {
        let token = JwtResolver::new("other").issue(&ada(), 1).unwrap();
        let resolver = JwtResolver::new("secret");
        assert_eq!(resolver.resolve(&token).await, None);
        assert_eq!(resolver.resolve("not-a-jwt").await, None);
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let resolver = JwtResolver::new("secret");
        let token = resolver.issue(&ada(), -2).unwrap();
        assert_eq!(resolver.resolve(&token).await, None);
    }
}
