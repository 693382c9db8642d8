//! Bearer-token user extraction and the per-network access check.

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::{EngineError, Result};

/// Checks whether a user may reach a network. Implemented by the hosting
/// platform; absent in single-tenant deployments, which means open access.
#[async_trait]
pub trait AccessChecker: Send + Sync {
    /// Returns whether `user` may access `network`.
    async fn check_if_user_has_access_to_network(
        &self,
        user: &str,
        network: &str,
    ) -> std::result::Result<bool, Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    id: String,
}

/// Extracts the user id from a request's bearer JWT.
///
/// Missing header yields [`EngineError::NoAuth`]; a token that fails to
/// parse or validate, or whose `id` claim is absent or empty, yields
/// [`EngineError::InvalidAuth`].
pub fn user_from_jwt(headers: &HeaderMap, key: &DecodingKey) -> Result<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(EngineError::NoAuth)?;
    let token = bearer.strip_prefix("Bearer ").ok_or(EngineError::NoAuth)?;

    let mut validation = Validation::new(Algorithm::HS256);
    // Expiry is enforced when the claim is present; tokens are minted by
    // the platform, which does not always stamp one.
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<Claims>(token, key, &validation)
        .map_err(|_| EngineError::InvalidAuth)?;

    if data.claims.id.is_empty() {
        return Err(EngineError::InvalidAuth);
    }
    Ok(data.claims.id)
}

#[cfg(any(test, feature = "mock"))]
pub mod mock {
    //! Access checker test double.

    use super::*;
    use std::sync::Mutex;

    /// An [`AccessChecker`] with a fixed verdict, recording every call.
    pub struct MockAccessChecker {
        /// Verdict returned for every check; `None` means "fail with error".
        pub allow: Option<bool>,

        /// Recorded (user, network) pairs.
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl MockAccessChecker {
        /// A checker that always answers with `allow`.
        pub fn returning(allow: bool) -> Self {
            Self {
                allow: Some(allow),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// A checker that always errors.
        pub fn failing() -> Self {
            Self {
                allow: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AccessChecker for MockAccessChecker {
        async fn check_if_user_has_access_to_network(
            &self,
            user: &str,
            network: &str,
        ) -> std::result::Result<bool, Box<dyn std::error::Error + Send + Sync>> {
            self.calls
                .lock()
                .unwrap()
                .push((user.to_string(), network.to_string()));
            match self.allow {
                Some(allow) => Ok(allow),
                None => Err("access backend unavailable".into()),
            }
        }
    }
}
