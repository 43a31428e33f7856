//! Spotify OAuth (authorization-code flow) and the session value every
//! catalog request is authorized with.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::catalog::{CatalogError, Result};

const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Scopes needed to read a playlist and replace its contents.
pub const SCOPES: &str = "playlist-read-private playlist-modify-private playlist-modify-public";

/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Application credentials from the Spotify developer dashboard.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl Credentials {
    fn basic_auth_header(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", BASE64.encode(raw))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// An authenticated session. Acquired once at startup, refreshed when the
/// access token runs out, invalidated when the catalog rejects it.
#[derive(Debug, Clone)]
pub struct Session {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
    valid: bool,
}

impl Session {
    /// Exchange an authorization code for a session.
    pub fn acquire(agent: &ureq::Agent, creds: &Credentials, code: &str) -> Result<Self> {
        let token = request_token(
            agent,
            creds,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", creds.redirect_uri.as_str()),
            ],
        )?;
        log::info!("Acquired access token (expires in {}s)", token.expires_in);
        Ok(Self::from_token(token, None, Utc::now()))
    }

    /// Build a session from an already-issued access token (no refresh).
    pub fn from_access_token(access_token: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.to_string(),
            refresh_token: None,
            expires_at,
            valid: true,
        }
    }

    fn from_token(
        token: TokenResponse,
        previous_refresh: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: token.access_token,
            refresh_token: token.refresh_token.or(previous_refresh),
            expires_at: now + Duration::seconds(token.expires_in),
            valid: true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.expires_at
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> Result<String> {
        if !self.valid {
            return Err(CatalogError::Authentication(
                "session was invalidated; re-authenticate".to_string(),
            ));
        }
        Ok(format!("Bearer {}", self.access_token))
    }

    /// Refresh the access token if it is about to expire.
    pub fn ensure_fresh(&mut self, agent: &ureq::Agent, creds: &Credentials) -> Result<()> {
        self.refresh_with(Utc::now(), |refresh| {
            request_token(
                agent,
                creds,
                &[("grant_type", "refresh_token"), ("refresh_token", refresh)],
            )
        })
    }

    /// Refresh through `exchange` when the token expires around `now`.
    /// Any failure leaves the session invalidated.
    fn refresh_with<F>(&mut self, now: DateTime<Utc>, exchange: F) -> Result<()>
    where
        F: FnOnce(&str) -> Result<TokenResponse>,
    {
        if !self.valid || !self.needs_refresh(now) {
            return Ok(());
        }
        let Some(refresh) = self.refresh_token.clone() else {
            self.invalidate();
            return Err(CatalogError::Authentication(
                "access token expired and no refresh token is available".to_string(),
            ));
        };

        log::debug!("Refreshing access token");
        let token = exchange(&refresh).inspect_err(|_| self.invalidate())?;
        *self = Self::from_token(token, Some(refresh), now);
        Ok(())
    }

    pub fn invalidate(&mut self) {
        if self.valid {
            log::warn!("Session invalidated");
        }
        self.valid = false;
    }
}

fn request_token(
    agent: &ureq::Agent,
    creds: &Credentials,
    form: &[(&str, &str)],
) -> Result<TokenResponse> {
    let mut response = agent
        .post(TOKEN_URL)
        .header("Authorization", creds.basic_auth_header())
        .send_form(form.iter().copied())?;

    let status = response.status().as_u16();
    let body = response.body_mut().read_to_string()?;

    if status != 200 {
        let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(e) => match e.error_description {
                Some(desc) => format!("{} ({desc})", e.error),
                None => e.error,
            },
            Err(_) => format!("token endpoint returned {status}"),
        };
        return Err(CatalogError::Authentication(reason));
    }

    serde_json::from_str(&body).map_err(|e| CatalogError::Decode {
        endpoint: TOKEN_URL.to_string(),
        message: e.to_string(),
    })
}

/// Random value tying the authorize request to the redirect it produces.
pub fn new_state() -> String {
    Uuid::new_v4().simple().to_string()
}

/// The URL the operator opens in a browser to grant access.
pub fn authorize_url(creds: &Credentials, state: &str) -> String {
    format!(
        "{AUTHORIZE_URL}?client_id={}&response_type=code&redirect_uri={}&scope={}&state={}",
        urlencoding::encode(&creds.client_id),
        urlencoding::encode(&creds.redirect_uri),
        urlencoding::encode(SCOPES),
        urlencoding::encode(state),
    )
}

/// Pull the authorization code out of the URL the browser was redirected
/// to. A bare code is accepted as-is; a full URL must carry the state
/// `authorize_url` was built with.
pub fn extract_code(redirected: &str, expected_state: &str) -> Result<String> {
    let redirected = redirected.trim();
    let url = match Url::parse(redirected) {
        Ok(url) => url,
        Err(_) if is_bare_code(redirected) => return Ok(redirected.to_string()),
        Err(_) => return Err(auth_error("no authorization code in the pasted URL")),
    };

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Err(auth_error(&format!("authorization was denied: {value}"))),
            _ => {}
        }
    }

    match state {
        Some(state) if state == expected_state => {}
        Some(_) => return Err(auth_error("state mismatch in redirect URL")),
        None => return Err(auth_error("redirect URL carries no state")),
    }

    code.filter(|c| !c.is_empty())
        .ok_or_else(|| auth_error("no authorization code in the pasted URL"))
}

fn is_bare_code(s: &str) -> bool {
    !s.is_empty() && !s.contains(|c: char| matches!(c, '/' | '?' | '&' | '=' | ':'))
}

fn auth_error(message: &str) -> CatalogError {
    CatalogError::Authentication(message.to_string())
}
