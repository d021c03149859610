use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{
        header::{HeaderName, AUTHORIZATION},
        request::Parts,
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};

use crate::entities::{Account, AccountId};
use crate::error::{Error, Result};
use crate::AppState;

/// Carries the session token in both directions.
pub const AUTH_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-auth-token");

const SESSION_SENTINEL: &str = "ok";

#[async_trait]
pub trait ValueSetter: Send + Sync {
    async fn set_value(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

#[async_trait]
pub trait ValueGetter: Send + Sync {
    /// `None` when the key does not exist or has expired.
    async fn get_value(&self, key: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait ExpirationSetter: Send + Sync {
    async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<()>;
}

/// Key/value cache with per-key expiry that holds live session tokens.
pub trait SessionStore: ValueSetter + ValueGetter + ExpirationSetter {}

impl<T: ValueSetter + ValueGetter + ExpirationSetter> SessionStore for T {}

#[async_trait]
pub trait AccountGetter: Send {
    /// `None` when no account has this username.
    async fn get_account(&mut self, username: &str) -> Result<Option<Account>>;
}

#[derive(Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub account_id: AccountId,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct TokenPolicy {
    /// Lifetime of a token, restarted on every successful use.
    pub ttl: Duration,
    /// Number of random bytes in the secret part of a token.
    pub secret_len: usize,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            secret_len: 20,
        }
    }
}

/// Tokens have the form `"1234:somesecret"`.
pub fn parse_account_id(token: &str) -> Option<AccountId> {
    let (prefix, _) = token.split_once(':')?;
    prefix.parse::<AccountId>().ok().filter(|id| *id >= 0)
}

/// Compares `password` with a stored PHC hash in constant time.
pub async fn check_password_with_hash(password: String, hash: String) -> Result<bool> {
    // `password_auth::verify_password()` is blocking, hence using `tokio::task::spawn_blocking()`
    tokio::task::spawn_blocking(move || {
        match password_auth::verify_password(password, &hash) {
            Ok(()) => Ok(true),
            Err(password_auth::VerifyError::PasswordInvalid) => Ok(false),
            Err(err) => Err(Error::Invariant(format!(
                "stored password hash is unusable: {err}"
            ))),
        }
    })
    .await?
}

#[derive(Debug, Clone, Default)]
pub struct Verifier {
    policy: TokenPolicy,
}

impl Verifier {
    pub fn new(policy: TokenPolicy) -> Self {
        Self { policy }
    }

    /// Resolves the caller's identity.
    ///
    /// With basic credentials the password is checked and a fresh token is
    /// issued. Otherwise `token` is looked up and its expiry pushed back by the
    /// full ttl. `Ok(None)` means the caller is not authenticated; `Err` is a
    /// failure of the store or repository.
    pub async fn verify<S, A>(
        &self,
        basic: Option<BasicCredentials>,
        token: &str,
        store: &S,
        accounts: &mut A,
    ) -> Result<Option<Identity>>
    where
        S: ValueSetter + ValueGetter + ExpirationSetter + ?Sized,
        A: AccountGetter + ?Sized,
    {
        match basic {
            Some(credentials) => self.verify_basic(credentials, store, accounts).await,
            None => self.verify_token(token, store).await,
        }
    }

    async fn verify_basic<S, A>(
        &self,
        credentials: BasicCredentials,
        store: &S,
        accounts: &mut A,
    ) -> Result<Option<Identity>>
    where
        S: ValueSetter + ?Sized,
        A: AccountGetter + ?Sized,
    {
        let Some(account) = accounts.get_account(&credentials.username).await? else {
            tracing::debug!(username = %credentials.username, "unknown username");
            return Ok(None);
        };

        if !check_password_with_hash(credentials.password, account.password_hash).await? {
            tracing::debug!(account_id = account.id, "password mismatch");
            return Ok(None);
        }

        let token = format!("{}:{}", account.id, self.generate_secret());
        store
            .set_value(&token, SESSION_SENTINEL, self.policy.ttl)
            .await?;

        tracing::info!(account_id = account.id, "issued session token");
        Ok(Some(Identity {
            account_id: account.id,
            token,
        }))
    }

    async fn verify_token<S>(&self, token: &str, store: &S) -> Result<Option<Identity>>
    where
        S: ValueGetter + ExpirationSetter + ?Sized,
    {
        let Some(value) = store.get_value(token).await? else {
            return Ok(None);
        };
        if value != SESSION_SENTINEL {
            return Ok(None);
        }

        store.set_expiration(token, self.policy.ttl).await?;

        let account_id = parse_account_id(token).ok_or_else(|| {
            Error::Invariant("session store holds a token without an account id".into())
        })?;

        Ok(Some(Identity {
            account_id,
            token: token.to_owned(),
        }))
    }

    fn generate_secret(&self) -> String {
        let mut secret = vec![0u8; self.policy.secret_len];
        OsRng.fill_bytes(&mut secret);
        BASE64.encode(secret)
    }
}

/// Reads `Authorization: Basic ...`; anything malformed counts as absent.
pub fn basic_credentials(headers: &HeaderMap) -> Option<BasicCredentials> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = String::from_utf8(BASE64.decode(encoded.trim()).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(BasicCredentials {
        username: username.to_owned(),
        password: password.to_owned(),
    })
}

/// Account id resolved by [`authenticated`], the only source handlers take it from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentAccount(pub AccountId);

impl<S> FromRequestParts<S> for CurrentAccount
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<CurrentAccount>().copied().ok_or_else(|| {
            Error::Invariant("handler reached without an authenticated account".into())
        })
    }
}

/// Authentication middleware: verifies the caller, hands the account id to the
/// handler and returns the current token in `X-Auth-Token`.
pub async fn authenticated(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let basic = basic_credentials(request.headers());
    let token = request
        .headers()
        .get(&AUTH_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    let mut accounts = state.repository.clone();
    let identity = state
        .verifier
        .verify(basic, &token, state.sessions.as_ref(), &mut accounts)
        .await?;

    let Some(identity) = identity else {
        tracing::warn!(method = %request.method(), uri = %request.uri(), "unauthenticated");
        return Err(Error::Unauthenticated);
    };

    let token_header = HeaderValue::from_str(&identity.token)
        .map_err(|_| Error::Invariant("session token is not a valid header value".into()))?;

    request
        .extensions_mut()
        .insert(CurrentAccount(identity.account_id));

    let mut response = next.run(request).await;
    response.headers_mut().insert(AUTH_TOKEN_HEADER, token_header);
    Ok(response)
}
