use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use tokio::sync::Mutex;
use tracing::warn;
use zeroize::Zeroize;

use crate::customer::{validate_id, Customer};
use crate::settings::SettingsStore;
use crate::RolodexError;

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const API_BASE: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Fixed scope: only files this application created.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Fixed loopback redirect for the installed-app flow; the user copies
/// the `code` query parameter back by hand.
pub const REDIRECT_URI: &str = "http://127.0.0.1:8973/";

/// Bounded timeout for all Drive calls so a stalled sync cannot hang a
/// backup pass indefinitely.
const HTTP_TIMEOUT_SECS: u64 = 30;

/// Persisted OAuth token set.
#[derive(Debug, Clone, Serialize, Deserialize, Zeroize)]
pub struct GoogleTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[zeroize(skip)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl GoogleTokens {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Utc::now() >= at,
            None => false,
        }
    }
}

/// OAuth client credentials plus redirect target.
#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl DriveConfig {
    pub fn from_env() -> crate::Result<Self> {
        let client_id = std::env::var("GOOGLE_CLIENT_ID").map_err(|_| {
            RolodexError::Configuration("Missing GOOGLE_CLIENT_ID environment variable".to_string())
        })?;
        let client_secret = std::env::var("GOOGLE_CLIENT_SECRET").map_err(|_| {
            RolodexError::Configuration(
                "Missing GOOGLE_CLIENT_SECRET environment variable".to_string(),
            )
        })?;
        Ok(Self {
            client_id,
            client_secret,
            redirect_uri: REDIRECT_URI.to_string(),
        })
    }

    /// Credentials from the environment, or an unconfigured placeholder
    /// so local-only commands work without any Google setup. Drive
    /// authorization reports the missing credentials when attempted.
    pub fn from_env_or_default() -> Self {
        Self::from_env().unwrap_or_else(|_| Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: REDIRECT_URI.to_string(),
        })
    }
}

// Drive's search grammar quotes string values with single quotes;
// backslash and the quote itself must be backslash-escaped inside.
fn escape_query_term(term: &str) -> String {
    term.replace('\\', "\\\\").replace('\'', "\\'")
}

/// An authorization flow that has produced a URL but not yet a code.
struct PendingAuth {
    verifier: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

/// Google Drive sync client. List and save operations are scoped to the
/// folder id held in settings; tokens persist in settings as well so an
/// authorized client survives restarts.
pub struct DriveClient {
    http: reqwest::Client,
    config: DriveConfig,
    settings: Arc<SettingsStore>,
    pending: Mutex<Option<PendingAuth>>,
}

impl DriveClient {
    pub fn new(config: DriveConfig, settings: Arc<SettingsStore>) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            config,
            settings,
            pending: Mutex::new(None),
        })
    }

    pub fn from_env(settings: Arc<SettingsStore>) -> crate::Result<Self> {
        Self::new(DriveConfig::from_env()?, settings)
    }

    /// Whether a token set is on file. Says nothing about validity; an
    /// expired access token is refreshed on first use.
    pub fn is_authorized(&self) -> bool {
        matches!(self.settings.google_tokens(), Ok(Some(_)))
    }

    /// Whether a remote folder has been chosen to scope sync operations.
    pub fn is_configured(&self) -> bool {
        matches!(self.settings.drive_folder_id(), Ok(Some(_)))
    }

    // PKCE per RFC 7636: URL-safe random verifier, S256 challenge.
    fn generate_verifier() -> String {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    pub(crate) fn code_challenge(verifier: &str) -> String {
        let hash = sha2::Sha256::digest(verifier.as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash)
    }

    /// Build the consent URL for the user to open in a browser. The PKCE
    /// verifier is retained for the matching `exchange_code` call.
    pub async fn authorize_url(&self) -> crate::Result<String> {
        if self.config.client_id.is_empty() {
            return Err(RolodexError::Configuration(
                "Google client credentials not set (GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET)"
                    .to_string(),
            ));
        }
        let verifier = Self::generate_verifier();
        let challenge = Self::code_challenge(&verifier);
        let state = uuid::Uuid::new_v4().to_string();

        let url = reqwest::Url::parse_with_params(
            AUTH_ENDPOINT,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", DRIVE_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| RolodexError::Drive(e.to_string()))?;

        let mut pending = self.pending.lock().await;
        *pending = Some(PendingAuth { verifier });
        Ok(url.into())
    }

    /// Complete the flow with the code the user pasted back. Tokens are
    /// persisted to settings.
    pub async fn exchange_code(&self, code: &str) -> crate::Result<()> {
        let pending = self
            .pending
            .lock()
            .await
            .take()
            .ok_or_else(|| RolodexError::Drive("no authorization flow in progress".to_string()))?;

        let resp = self
            .http
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
                ("code_verifier", pending.verifier.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RolodexError::Drive(format!(
                "token exchange failed ({}): {}",
                status, body
            )));
        }

        let token: TokenResponse = resp.json().await?;
        self.settings.set_google_tokens(Self::to_tokens(token, None))?;
        Ok(())
    }

    fn to_tokens(resp: TokenResponse, previous_refresh: Option<String>) -> GoogleTokens {
        GoogleTokens {
            access_token: resp.access_token,
            // A refresh response may omit the refresh token; keep the old one.
            refresh_token: resp.refresh_token.or(previous_refresh),
            expires_at: resp
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs.max(60) - 60)),
        }
    }

    /// Current access token, refreshing through the token endpoint when
    /// the stored one has expired.
    async fn access_token(&self) -> crate::Result<String> {
        let tokens = self
            .settings
            .google_tokens()?
            .ok_or(RolodexError::NotAuthorized)?;

        if !tokens.is_expired() {
            return Ok(tokens.access_token.clone());
        }

        let refresh = tokens
            .refresh_token
            .clone()
            .ok_or(RolodexError::NotAuthorized)?;

        let resp = self
            .http
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RolodexError::Drive(format!(
                "token refresh failed ({}): {}",
                status, body
            )));
        }

        let token: TokenResponse = resp.json().await?;
        let tokens = Self::to_tokens(token, Some(refresh));
        let access = tokens.access_token.clone();
        self.settings.set_google_tokens(tokens)?;
        Ok(access)
    }

    /// Persist the remote folder that scopes all list/save operations.
    pub fn set_remote_folder(&self, folder_id: &str) -> crate::Result<()> {
        if folder_id.is_empty() {
            return Err(RolodexError::InvalidInput("empty folder id".to_string()));
        }
        self.settings.set_drive_folder_id(folder_id)
    }

    /// Fetch every customer JSON in the configured folder. Unauthorized
    /// or unconfigured is a normal empty result, not an error.
    pub async fn list_customers(&self) -> crate::Result<Vec<Customer>> {
        let folder = match self.settings.drive_folder_id()? {
            Some(folder) => folder,
            None => return Ok(Vec::new()),
        };
        if !self.is_authorized() {
            return Ok(Vec::new());
        }
        let token = self.access_token().await?;

        let query = format!(
            "'{}' in parents and mimeType='application/json' and trashed=false",
            escape_query_term(&folder)
        );
        let resp = self
            .http
            .get(format!("{}/files", API_BASE))
            .bearer_auth(&token)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id,name)"),
                ("pageSize", "1000"),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(RolodexError::Drive(format!(
                "file listing failed: {}",
                resp.status()
            )));
        }

        let listing: FileList = resp.json().await?;
        let mut customers = Vec::new();
        for file in listing.files {
            match self.fetch_customer(&token, &file.id).await {
                Ok(customer) => customers.push(customer),
                Err(e) => {
                    // Skip unreadable remote files, same policy as the local store.
                    warn!("Skipping drive file {}: {}", file.name, e);
                }
            }
        }
        Ok(customers)
    }

    async fn fetch_customer(&self, token: &str, file_id: &str) -> crate::Result<Customer> {
        let resp = self
            .http
            .get(format!("{}/files/{}", API_BASE, file_id))
            .bearer_auth(token)
            .query(&[("alt", "media")])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(RolodexError::Drive(format!(
                "content fetch failed: {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    /// Mirror one customer into the configured folder. Searches for an
    /// existing `<id>.json` first and updates it in place; a new remote
    /// file is created only when none exists, so repeated saves of the
    /// same customer never accumulate duplicates.
    pub async fn save_customer(&self, customer: &Customer) -> crate::Result<()> {
        validate_id(&customer.id)?;
        let folder = self
            .settings
            .drive_folder_id()?
            .ok_or(RolodexError::NotConfigured)?;
        let token = self.access_token().await?;

        let file_name = format!("{}.json", customer.id);
        let body = serde_json::to_vec(customer)?;

        match self.find_file_id(&token, &file_name, &folder).await? {
            Some(file_id) => self.update_content(&token, &file_id, body).await,
            None => self.create_file(&token, &file_name, &folder, body).await,
        }
    }

    async fn find_file_id(
        &self,
        token: &str,
        name: &str,
        folder: &str,
    ) -> crate::Result<Option<String>> {
        let query = format!(
            "name='{}' and '{}' in parents and trashed=false",
            escape_query_term(name),
            escape_query_term(folder)
        );
        let resp = self
            .http
            .get(format!("{}/files", API_BASE))
            .bearer_auth(token)
            .query(&[("q", query.as_str()), ("fields", "files(id,name)")])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(RolodexError::Drive(format!(
                "file lookup failed: {}",
                resp.status()
            )));
        }
        let listing: FileList = resp.json().await?;
        Ok(listing.files.into_iter().next().map(|f| f.id))
    }

    async fn update_content(
        &self,
        token: &str,
        file_id: &str,
        body: Vec<u8>,
    ) -> crate::Result<()> {
        let resp = self
            .http
            .patch(format!(
                "{}/files/{}?uploadType=media",
                UPLOAD_BASE, file_id
            ))
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(RolodexError::Drive(format!(
                "content update failed: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    // Create in two steps: metadata first (name, parent, mime type), then
    // the JSON content against the new file id.
    async fn create_file(
        &self,
        token: &str,
        name: &str,
        folder: &str,
        body: Vec<u8>,
    ) -> crate::Result<()> {
        #[derive(Serialize)]
        struct Metadata<'a> {
            name: &'a str,
            parents: Vec<&'a str>,
            #[serde(rename = "mimeType")]
            mime_type: &'a str,
        }

        let resp = self
            .http
            .post(format!("{}/files", API_BASE))
            .bearer_auth(token)
            .json(&Metadata {
                name,
                parents: vec![folder],
                mime_type: "application/json",
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(RolodexError::Drive(format!(
                "file creation failed: {}",
                resp.status()
            )));
        }

        let created: DriveFile = resp.json().await?;
        self.update_content(token, &created.id, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_client(tmp_dir: &TempDir) -> (DriveClient, Arc<SettingsStore>) {
        let settings =
            Arc::new(SettingsStore::with_path(tmp_dir.path().join("settings.json")).unwrap());
        let config = DriveConfig {
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
            redirect_uri: REDIRECT_URI.to_string(),
        };
        let client = DriveClient::new(config, settings.clone()).unwrap();
        (client, settings)
    }

    #[test]
    fn test_query_terms_escape_quotes_and_backslashes() {
        // Ids like o'brien are legal filenames; the quote must not end
        // the quoted string early.
        assert_eq!(escape_query_term("o'brien.json"), "o\\'brien.json");
        assert_eq!(escape_query_term(r"a\b"), r"a\\b");
        // An embedded clause stays inert once escaped.
        assert_eq!(
            escape_query_term("x' or name contains '"),
            "x\\' or name contains \\'"
        );
        assert_eq!(escape_query_term("plain-id"), "plain-id");
    }

    #[test]
    fn test_code_challenge_rfc7636_vector() {
        // Appendix B of RFC 7636.
        let challenge = DriveClient::code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[tokio::test]
    async fn test_authorize_url_contents() {
        let tmp_dir = TempDir::new().unwrap();
        let (client, _settings) = test_client(&tmp_dir);

        let url = client.authorize_url().await.unwrap();
        assert!(url.starts_with(AUTH_ENDPOINT));
        assert!(url.contains("client_id=test-client"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("drive.file"));
        assert!(url.contains("access_type=offline"));
    }

    #[tokio::test]
    async fn test_list_unconfigured_is_empty_not_error() {
        let tmp_dir = TempDir::new().unwrap();
        let (client, _settings) = test_client(&tmp_dir);

        // No folder, no tokens: normal empty result, no network touched.
        let customers = client.list_customers().await.unwrap();
        assert!(customers.is_empty());
    }

    #[tokio::test]
    async fn test_list_with_folder_but_no_tokens_is_empty() {
        let tmp_dir = TempDir::new().unwrap();
        let (client, settings) = test_client(&tmp_dir);
        settings.set_drive_folder_id("folder-1").unwrap();

        let customers = client.list_customers().await.unwrap();
        assert!(customers.is_empty());
    }

    #[tokio::test]
    async fn test_save_without_folder_reports_unconfigured() {
        let tmp_dir = TempDir::new().unwrap();
        let (client, _settings) = test_client(&tmp_dir);

        let err = client
            .save_customer(&Customer::new("c1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RolodexError::NotConfigured));
    }

    #[tokio::test]
    async fn test_exchange_without_pending_flow_fails() {
        let tmp_dir = TempDir::new().unwrap();
        let (client, _settings) = test_client(&tmp_dir);

        let err = client.exchange_code("abc").await.unwrap_err();
        assert!(matches!(err, RolodexError::Drive(_)));
    }

    #[test]
    fn test_token_expiry() {
        let fresh = GoogleTokens {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now() + chrono::Duration::minutes(10)),
        };
        assert!(!fresh.is_expired());

        let stale = GoogleTokens {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now() - chrono::Duration::minutes(10)),
        };
        assert!(stale.is_expired());

        let unbounded = GoogleTokens {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_at: None,
        };
        assert!(!unbounded.is_expired());
    }
}
