use crate::error::AppError;
use axum::http::StatusCode;
use std::sync::{Arc, Mutex};

/// Header values shorter than this are client keys, not backend tokens.
pub const MIN_INLINE_TOKEN_LEN: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("missing or invalid API key format")]
    MissingBearer,
    #[error("API key invalid or CHAT_AUTHORIZATION not set")]
    EmptyPool,
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", err.to_string())
    }
}

/// Picks one backend token per request from a comma-separated pool.
///
/// The rotator remembers the token it handed out last and, when the pool
/// has more than one distinct token, never hands the same one out twice in
/// a row. Clones share the cursor.
#[derive(Clone, Debug, Default)]
pub struct CredentialRotator {
    fallback_pool: Option<String>,
    last: Arc<Mutex<Option<String>>>,
}

impl CredentialRotator {
    pub fn new(fallback_pool: Option<String>) -> Self {
        Self {
            fallback_pool: fallback_pool.filter(|pool| !pool.trim().is_empty()),
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Resolve the credential for an inbound `Authorization` header value.
    pub fn select_from_header(&self, header: Option<&str>) -> Result<String, CredentialError> {
        let tokens = header
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(CredentialError::MissingBearer)?;
        if tokens.len() < MIN_INLINE_TOKEN_LEN {
            let pool = self
                .fallback_pool
                .as_deref()
                .ok_or(CredentialError::EmptyPool)?;
            return self.select(pool);
        }
        self.select(tokens)
    }

    /// Like [`select_from_header`](Self::select_from_header) but falls back to
    /// the configured pool, and finally to no credential at all.
    pub fn select_optional(&self, header: Option<&str>) -> Option<String> {
        self.select_from_header(header).ok().or_else(|| {
            self.fallback_pool
                .as_deref()
                .and_then(|pool| self.select(pool).ok())
        })
    }

    pub fn select(&self, pool: &str) -> Result<String, CredentialError> {
        let tokens: Vec<&str> = pool
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .collect();
        if tokens.is_empty() {
            return Err(CredentialError::EmptyPool);
        }

        let mut last = self
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let fresh: Vec<&str> = match last.as_deref() {
            Some(previous) => tokens
                .iter()
                .copied()
                .filter(|token| *token != previous)
                .collect(),
            None => Vec::new(),
        };
        let candidates = if fresh.is_empty() { &tokens } else { &fresh };
        let picked = candidates[random_index(candidates.len())].to_string();
        *last = Some(picked.clone());
        Ok(picked)
    }
}

fn random_index(bound: usize) -> usize {
    if bound <= 1 {
        return 0;
    }
    let seed = uuid::Uuid::new_v4().as_u128() as u64;
    (seed % bound as u64) as usize
}
