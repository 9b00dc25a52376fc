use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::limits::{MAX_TOKENS_PER_IDENTITY, TOKEN_TTL};
use crate::model::Identity;
use crate::observability::{AUTH_FAILURES_TOTAL, SESSIONS_ACTIVE};

/// A login account as it appears in the seed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub secret: String,
    pub identity: Identity,
}

/// Token issued at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    pub token: String,
    pub identity: Identity,
}

struct Grant {
    identity: Identity,
    issued: Instant,
    /// Issue order, for evicting the oldest.
    serial: u64,
}

/// Accounts and live bearer tokens. Tokens are opaque ULID strings that
/// expire after a fixed lifetime; each identity holds a bounded number.
pub struct Directory {
    accounts: DashMap<String, Account>,
    tokens: DashMap<String, Grant>,
    token_ttl: Duration,
    issued: AtomicU64,
}

impl Default for Directory {
    fn default() -> Self {
        Self::with_token_ttl(TOKEN_TTL)
    }
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token_ttl(token_ttl: Duration) -> Self {
        Self {
            accounts: DashMap::new(),
            tokens: DashMap::new(),
            token_ttl,
            issued: AtomicU64::new(0),
        }
    }

    /// Add an account. Fails if the username is taken.
    pub fn add_account(&self, account: Account) -> Result<()> {
        if account.username.trim().is_empty() {
            return Err(Error::Validation("username is required".into()));
        }
        match self.accounts.entry(account.username.clone()) {
            Entry::Occupied(_) => Err(Error::AlreadyExists(format!("account {}", account.username))),
            Entry::Vacant(v) => {
                v.insert(account);
                Ok(())
            }
        }
    }

    pub fn login(&self, username: &str, secret: &str) -> Result<Login> {
        let identity = self
            .accounts
            .get(username)
            .filter(|a| a.secret == secret)
            .map(|a| a.identity.clone());
        let Some(identity) = identity else {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            tracing::info!(username, "login rejected");
            return Err(Error::Auth("invalid username or password".into()));
        };
        let login = self.issue(identity);
        tracing::info!(user = %login.identity.id, "login");
        Ok(login)
    }

    /// Revoke a token. Unknown tokens are ignored.
    pub fn logout(&self, token: &str) {
        if let Some((_, grant)) = self.tokens.remove(token) {
            tracing::info!(user = %grant.identity.id, "logout");
            self.record_sessions();
        }
    }

    pub fn resolve(&self, token: &str) -> Result<Identity> {
        let live = self
            .tokens
            .get(token)
            .map(|grant| (grant.identity.clone(), grant.issued.elapsed() < self.token_ttl));
        match live {
            Some((identity, true)) => Ok(identity),
            Some((_, false)) => {
                self.tokens.remove_if(token, |_, grant| grant.issued.elapsed() >= self.token_ttl);
                self.record_sessions();
                metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
                Err(Error::Unauthorized("token expired".into()))
            }
            None => {
                metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
                Err(Error::Unauthorized("invalid or expired token".into()))
            }
        }
    }

    /// Drop every expired token. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, grant| grant.issued.elapsed() < self.token_ttl);
        let swept = before.saturating_sub(self.tokens.len());
        if swept > 0 {
            tracing::debug!(swept, "expired tokens dropped");
            self.record_sessions();
        }
        swept
    }

    pub fn live_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Swap a live token for a fresh one.
    pub fn refresh(&self, token: &str) -> Result<Login> {
        let identity = self.resolve(token)?;
        self.tokens.remove(token);
        Ok(self.issue(identity))
    }

    fn issue(&self, identity: Identity) -> Login {
        let token = Ulid::new().to_string();
        self.tokens.insert(
            token.clone(),
            Grant {
                identity: identity.clone(),
                issued: Instant::now(),
                serial: self.issued.fetch_add(1, Ordering::Relaxed),
            },
        );
        self.evict_surplus(&identity);
        self.record_sessions();
        Login { token, identity }
    }

    /// Revoke the oldest tokens of `identity` beyond the per-identity cap.
    fn evict_surplus(&self, identity: &Identity) {
        let mut held: Vec<(u64, String)> = self
            .tokens
            .iter()
            .filter(|e| e.value().identity.id == identity.id)
            .map(|e| (e.value().serial, e.key().clone()))
            .collect();
        if held.len() <= MAX_TOKENS_PER_IDENTITY {
            return;
        }
        held.sort();
        let surplus = held.len() - MAX_TOKENS_PER_IDENTITY;
        for (_, token) in held.into_iter().take(surplus) {
            self.tokens.remove(&token);
        }
        tracing::info!(user = %identity.id, revoked = surplus, "oldest tokens revoked");
    }

    fn record_sessions(&self) {
        metrics::gauge!(SESSIONS_ACTIVE).set(self.tokens.len() as f64);
    }
}
