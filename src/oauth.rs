/// OAuth 2.0 authorization code flow orchestration
use crate::error::{ConfigError, OAuthError, Result, StorageError};
use crate::http::{self, HttpClient, HttpRequest, DEFAULT_TIMEOUT};
use crate::query;
use crate::storage::{AccessToken, AccountId, TokenStore};
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

pub const PINTEREST_AUTHORIZE_URL: &str = "https://api.pinterest.com/oauth/";
pub const PINTEREST_TOKEN_URL: &str = "https://api.pinterest.com/v1/oauth/token";
pub const PINTEREST_DEFAULT_SCOPE: &str = "read_public";

/// OAuth 2.0 provider configuration
#[derive(Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .finish()
    }
}

impl OAuthConfig {
    /// Pinterest endpoints with the `read_public` scope
    pub fn pinterest(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorization_endpoint: PINTEREST_AUTHORIZE_URL.to_string(),
            token_endpoint: PINTEREST_TOKEN_URL.to_string(),
            redirect_uri: redirect_uri.into(),
            scope: Some(PINTEREST_DEFAULT_SCOPE.to_string()),
        }
    }

    /// Load configuration from `PINAUTH_*` environment variables
    ///
    /// `PINAUTH_CLIENT_ID`, `PINAUTH_CLIENT_SECRET` and `PINAUTH_REDIRECT_URI`
    /// are required. `PINAUTH_AUTHORIZE_URL`, `PINAUTH_TOKEN_URL` and
    /// `PINAUTH_SCOPE` default to the Pinterest values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`OAuthConfig::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        let mut config = Self::pinterest(
            required("PINAUTH_CLIENT_ID")?,
            required("PINAUTH_CLIENT_SECRET")?,
            required("PINAUTH_REDIRECT_URI")?,
        );
        if let Some(url) = var("PINAUTH_AUTHORIZE_URL") {
            config.authorization_endpoint = url;
        }
        if let Some(url) = var("PINAUTH_TOKEN_URL") {
            config.token_endpoint = url;
        }
        if let Some(scope) = var("PINAUTH_SCOPE") {
            config.scope = Some(scope);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that every endpoint is an absolute URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
            ("redirect_uri", &self.redirect_uri),
        ] {
            Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
                name,
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Parameters of a single authorization attempt
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub authorize_url: Url,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: String,
}

impl fmt::Debug for AuthorizationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationRequest")
            .field("authorize_url", &self.authorize_url.as_str())
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl AuthorizationRequest {
    /// Build a request from configuration with a fresh random state
    pub fn from_config(config: &OAuthConfig) -> Result<Self, ConfigError> {
        let authorize_url =
            Url::parse(&config.authorization_endpoint).map_err(|e| ConfigError::InvalidUrl {
                name: "authorization_endpoint",
                reason: e.to_string(),
            })?;

        Ok(Self {
            authorize_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scope.clone(),
            state: random_state(),
        })
    }

    /// Replace the generated state value
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    /// The provider URL the user must visit
    pub fn authorization_url(&self) -> Url {
        let mut url = self.authorize_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("client_id", &self.client_id)
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", &self.redirect_uri);
            if let Some(scope) = &self.scope {
                pairs.append_pair("scope", scope);
            }
            pairs.append_pair("state", &self.state);
        }
        url
    }
}

fn random_state() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Authorization code extracted from the provider redirect
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationCode(String);

impl AuthorizationCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthorizationCode(..)")
    }
}

/// Observable phase of the current authorization attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    AwaitingRedirect { state: String },
    CodeReceived,
    Exchanging,
    Authorized { account: AccountId },
    Failed(OAuthError),
}

impl AuthState {
    pub fn name(&self) -> &'static str {
        match self {
            AuthState::Idle => "Idle",
            AuthState::AwaitingRedirect { .. } => "AwaitingRedirect",
            AuthState::CodeReceived => "CodeReceived",
            AuthState::Exchanging => "Exchanging",
            AuthState::Authorized { .. } => "Authorized",
            AuthState::Failed(_) => "Failed",
        }
    }

    /// Whether the attempt has finished, successfully or not
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthState::Authorized { .. } | AuthState::Failed(_))
    }
}

enum Attempt {
    Idle,
    AwaitingRedirect(AuthorizationRequest),
    CodeReceived {
        request: AuthorizationRequest,
        code: AuthorizationCode,
    },
    Exchanging,
    Authorized,
    Failed(OAuthError),
}

impl Attempt {
    fn name(&self) -> &'static str {
        match self {
            Attempt::Idle => "Idle",
            Attempt::AwaitingRedirect(_) => "AwaitingRedirect",
            Attempt::CodeReceived { .. } => "CodeReceived",
            Attempt::Exchanging => "Exchanging",
            Attempt::Authorized => "Authorized",
            Attempt::Failed(_) => "Failed",
        }
    }

    fn in_progress(&self) -> bool {
        matches!(
            self,
            Attempt::AwaitingRedirect(_) | Attempt::CodeReceived { .. } | Attempt::Exchanging
        )
    }
}

struct Machine {
    // Bumped whenever a new attempt starts or one is abandoned.
    generation: u64,
    attempt: Attempt,
}

/// Current attempt plus the channel its transitions are published on
struct Tracker {
    machine: Mutex<Machine>,
    events: watch::Sender<AuthState>,
    account: AccountId,
}

impl Tracker {
    fn transition(&self, machine: &mut Machine, next: Attempt) {
        let snapshot = match &next {
            Attempt::Idle => AuthState::Idle,
            Attempt::AwaitingRedirect(request) => AuthState::AwaitingRedirect {
                state: request.state.clone(),
            },
            Attempt::CodeReceived { .. } => AuthState::CodeReceived,
            Attempt::Exchanging => AuthState::Exchanging,
            Attempt::Authorized => AuthState::Authorized {
                account: self.account.clone(),
            },
            Attempt::Failed(err) => AuthState::Failed(err.clone()),
        };
        debug!(from = machine.attempt.name(), to = next.name(), "authorization state change");
        machine.attempt = next;
        self.events.send_replace(snapshot);
    }

    fn fail(&self, machine: &mut Machine, err: OAuthError) -> OAuthError {
        warn!(error = %err, "authorization attempt failed");
        self.transition(machine, Attempt::Failed(err.clone()));
        err
    }
}

/// Resets an in-flight exchange to `Idle` if its future is dropped
struct ExchangeGuard<'a> {
    tracker: &'a Tracker,
    generation: u64,
    armed: bool,
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut machine = self.tracker.machine.lock();
        if machine.generation == self.generation && matches!(machine.attempt, Attempt::Exchanging)
        {
            debug!("token exchange abandoned");
            machine.generation += 1;
            self.tracker.transition(&mut machine, Attempt::Idle);
        }
    }
}

/// OAuth 2.0 client
///
/// Drives one authorization code attempt at a time:
/// `begin_authorization` → `complete_authorization` → `exchange_code_for_token`.
/// A successful exchange persists the access token in the [`TokenStore`] under
/// the client's account.
pub struct OAuthClient<H: HttpClient, S: TokenStore + ?Sized> {
    config: OAuthConfig,
    http: Arc<H>,
    store: Arc<S>,
    timeout: Duration,
    tracker: Tracker,
}

impl<H: HttpClient, S: TokenStore + ?Sized> OAuthClient<H, S> {
    /// Create a client for the default account
    pub fn new(config: OAuthConfig, http: Arc<H>, store: Arc<S>) -> Self {
        let (events, _) = watch::channel(AuthState::Idle);
        Self {
            config,
            http,
            store,
            timeout: DEFAULT_TIMEOUT,
            tracker: Tracker {
                machine: Mutex::new(Machine {
                    generation: 0,
                    attempt: Attempt::Idle,
                }),
                events,
                account: AccountId::default(),
            },
        }
    }

    /// Store tokens under a specific account
    pub fn with_account(mut self, account: AccountId) -> Self {
        self.tracker.account = account;
        self
    }

    /// Bound for the token exchange request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub fn account(&self) -> &AccountId {
        &self.tracker.account
    }

    /// A request for a new attempt built from this client's configuration
    pub fn new_request(&self) -> Result<AuthorizationRequest, ConfigError> {
        AuthorizationRequest::from_config(&self.config)
    }

    /// Current phase of the authorization attempt
    pub fn state(&self) -> AuthState {
        self.tracker.events.borrow().clone()
    }

    /// Receive every state transition
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.tracker.events.subscribe()
    }

    /// Start an attempt and return the URL to present to the user
    ///
    /// Rejected with [`OAuthError::InvalidState`] while another attempt is
    /// still in progress; [`OAuthClient::abandon`] it first.
    pub fn begin_authorization(&self, request: AuthorizationRequest) -> Result<Url> {
        let mut machine = self.tracker.machine.lock();
        if machine.attempt.in_progress() {
            return Err(OAuthError::InvalidState {
                expected: "Idle",
                actual: machine.attempt.name(),
            });
        }

        let url = request.authorization_url();
        debug!(url = %request.authorize_url, state = %request.state, "beginning authorization");
        machine.generation += 1;
        self.tracker
            .transition(&mut machine, Attempt::AwaitingRedirect(request));
        Ok(url)
    }

    /// Accept the provider redirect and extract the authorization code
    ///
    /// Fails the attempt with `AuthorizationDenied` if the provider returned an
    /// `error`, `MissingCode` if there is no code, and `StateMismatch` if the
    /// `state` parameter differs from the one sent.
    pub fn complete_authorization(&self, redirect_url: &str) -> Result<()> {
        let mut machine = self.tracker.machine.lock();
        let request = match &machine.attempt {
            Attempt::AwaitingRedirect(request) => request.clone(),
            other => {
                return Err(OAuthError::InvalidState {
                    expected: "AwaitingRedirect",
                    actual: other.name(),
                })
            }
        };

        match verify_redirect(&request, redirect_url) {
            Ok(code) => {
                self.tracker
                    .transition(&mut machine, Attempt::CodeReceived { request, code });
                Ok(())
            }
            Err(err) => Err(self.tracker.fail(&mut machine, err)),
        }
    }

    /// Redeem the received code for an access token and persist it
    pub async fn exchange_code_for_token(&self) -> Result<AccessToken> {
        let (request, code, generation) = {
            let mut machine = self.tracker.machine.lock();
            let (request, code) = match &machine.attempt {
                Attempt::CodeReceived { request, code } => (request.clone(), code.clone()),
                other => {
                    return Err(OAuthError::InvalidState {
                        expected: "CodeReceived",
                        actual: other.name(),
                    })
                }
            };
            self.tracker.transition(&mut machine, Attempt::Exchanging);
            (request, code, machine.generation)
        };

        let mut guard = ExchangeGuard {
            tracker: &self.tracker,
            generation,
            armed: true,
        };
        let outcome = self.request_token(&request, &code).await;
        guard.armed = false;

        let mut machine = self.tracker.machine.lock();
        if machine.generation != generation {
            // Abandoned while the request was in flight; nothing is persisted.
            return Err(OAuthError::InvalidState {
                expected: "Exchanging",
                actual: machine.attempt.name(),
            });
        }

        let token = match outcome {
            Ok(token) => token,
            Err(err) => return Err(self.tracker.fail(&mut machine, err)),
        };
        if let Err(err) = self.store.put(&self.tracker.account, &token) {
            return Err(self.tracker.fail(&mut machine, err.into()));
        }

        info!(account = %self.tracker.account, token = %token.masked(), "authorization succeeded");
        self.tracker.transition(&mut machine, Attempt::Authorized);
        Ok(token)
    }

    async fn request_token(
        &self,
        request: &AuthorizationRequest,
        code: &AuthorizationCode,
    ) -> Result<AccessToken> {
        let token_request = HttpRequest::post_form(&self.config.token_endpoint)
            .param("grant_type", "authorization_code")
            .param("client_id", &request.client_id)
            .param("client_secret", &request.client_secret)
            .param("code", code.as_str());

        let response =
            http::send_with_timeout(self.http.as_ref(), token_request, self.timeout).await?;
        parse_access_token(&response).ok_or(OAuthError::MalformedTokenResponse)
    }

    /// Run a whole attempt
    ///
    /// `present` receives the authorization URL and resolves to the redirect
    /// URL the provider sent the user agent to (for example captured by a
    /// [`crate::callback::RedirectListener`]). A failure there fails the
    /// attempt with the same error.
    pub async fn authorize<F, Fut>(
        &self,
        request: AuthorizationRequest,
        present: F,
    ) -> Result<AccessToken>
    where
        F: FnOnce(Url) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let url = self.begin_authorization(request)?;
        let redirect_url = match present(url).await {
            Ok(redirect_url) => redirect_url,
            Err(err) => {
                let mut machine = self.tracker.machine.lock();
                if matches!(machine.attempt, Attempt::AwaitingRedirect(_)) {
                    return Err(self.tracker.fail(&mut machine, err));
                }
                return Err(err);
            }
        };
        self.complete_authorization(&redirect_url)?;
        self.exchange_code_for_token().await
    }

    /// Discard the current attempt and return to `Idle`
    pub fn abandon(&self) {
        let mut machine = self.tracker.machine.lock();
        machine.generation += 1;
        self.tracker.transition(&mut machine, Attempt::Idle);
    }

    /// The persisted token for this client's account, if any
    pub fn current_token(&self) -> Result<Option<AccessToken>, StorageError> {
        self.store.get(&self.tracker.account)
    }

    /// Remove the persisted token and reset to `Idle`
    pub fn sign_out(&self) -> Result<(), StorageError> {
        self.store.delete(&self.tracker.account)?;
        info!(account = %self.tracker.account, "signed out");
        self.abandon();
        Ok(())
    }
}

fn verify_redirect(
    request: &AuthorizationRequest,
    redirect_url: &str,
) -> Result<AuthorizationCode> {
    let code = query::extract_parameter(redirect_url, "code").filter(|c| !c.is_empty());
    let Some(code) = code else {
        if let Some(error) = query::extract_parameter(redirect_url, "error") {
            return Err(OAuthError::AuthorizationDenied {
                error,
                description: query::extract_parameter(redirect_url, "error_description"),
            });
        }
        return Err(OAuthError::MissingCode);
    };

    match query::extract_parameter(redirect_url, "state") {
        Some(state) if state == request.state => Ok(AuthorizationCode(code)),
        _ => Err(OAuthError::StateMismatch),
    }
}

fn parse_access_token(response: &Value) -> Option<AccessToken> {
    response
        .get("access_token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(AccessToken::new)
}
