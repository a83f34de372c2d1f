//! Access tokens for private repositories.
//!
//! No credential means public-only access.

use std::collections::HashMap;
use std::fmt;

use url::Url;

use crate::model::{RepoId, TrackedRepository};

/// An access token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential").field("token", &"***").finish()
    }
}

/// Supplies an optional credential per repository.
pub trait CredentialProvider: Send + Sync {
    fn credential_for(&self, repo: &TrackedRepository) -> Option<Credential>;
}

/// Public repositories only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn credential_for(&self, _repo: &TrackedRepository) -> Option<Credential> {
        None
    }
}

/// Fixed tokens keyed by repository id.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    tokens: HashMap<RepoId, Credential>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, repo: RepoId, credential: Credential) -> Self {
        self.tokens.insert(repo, credential);
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn credential_for(&self, repo: &TrackedRepository) -> Option<Credential> {
        self.tokens.get(&repo.id).cloned()
    }
}

/// Tokens from the environment, chosen by the clone URL's host.
///
/// `GITHUB_TOKEN`, `GITLAB_TOKEN`, and `BITBUCKET_TOKEN` apply to their
/// hosts; `LOCTRAIL_GIT_TOKEN` applies to anything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl EnvCredentials {
    fn variable_for(url: &str) -> &'static str {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .unwrap_or_default();

        if host.contains("github") {
            "GITHUB_TOKEN"
        } else if host.contains("gitlab") {
            "GITLAB_TOKEN"
        } else if host.contains("bitbucket") {
            "BITBUCKET_TOKEN"
        } else {
            "LOCTRAIL_GIT_TOKEN"
        }
    }
}

impl CredentialProvider for EnvCredentials {
    fn credential_for(&self, repo: &TrackedRepository) -> Option<Credential> {
        std::env::var(Self::variable_for(&repo.clone_url))
            .ok()
            .filter(|token| !token.is_empty())
            .map(Credential::new)
    }
}
