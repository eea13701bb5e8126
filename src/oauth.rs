//! Interactive OAuth authorization / 交互式 OAuth 授权
//!
//! A short-lived local listener receives the provider redirect and hands the
//! `code`/`state` pair over a channel. The caller waits with a deadline and the
//! listener is shut down in every outcome.

use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Router,
};
use reqwest::Client;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use crate::config::SectionReader;
use crate::error::{Result, ServiceError};
use crate::storage::ConfigItem;

const DEFAULT_AUTH_HOST: &str = "localhost";
const DEFAULT_AUTH_PORT: u16 = 8080;
const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 300;

/// Callback listener settings / 本地回调设置
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_AUTH_HOST.to_string(),
            port: DEFAULT_AUTH_PORT,
            timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
        }
    }
}

impl AuthSettings {
    pub fn from_reader(reader: &mut SectionReader<'_>) -> Self {
        Self {
            host: reader.string_or("local_auth_ip", DEFAULT_AUTH_HOST),
            port: reader.number("local_auth_port", DEFAULT_AUTH_PORT),
            timeout: Duration::from_secs(
                reader.number("auth_timeout_secs", DEFAULT_AUTH_TIMEOUT_SECS),
            ),
        }
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }

    pub fn config_items() -> Vec<ConfigItem> {
        vec![
            ConfigItem::new("local_auth_ip", "string")
                .default(DEFAULT_AUTH_HOST)
                .help("Host of the local authorization callback listener"),
            ConfigItem::new("local_auth_port", "number")
                .default("8080")
                .help("Port of the local authorization callback listener"),
            ConfigItem::new("auth_timeout_secs", "number")
                .default("300")
                .help("How long to wait for the browser authorization"),
        ]
    }
}

/// Query parameters of the provider redirect / 回调参数
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Token endpoint response (Google and Box share the shape) / 令牌响应
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

async fn callback(
    State(tx): State<mpsc::Sender<CallbackParams>>,
    Query(params): Query<CallbackParams>,
) -> impl IntoResponse {
    // browsers also ask for /favicon.ico and the like
    if params.code.is_none() && params.error.is_none() {
        return (
            [(header::CONNECTION, "close")],
            "Waiting for the authorization redirect.",
        );
    }

    let _ = tx.try_send(params);
    (
        [(header::CONNECTION, "close")],
        "Authorization received. You can close this window.",
    )
}

/// Serve redirects on `listener` until one arrives or `timeout` elapses.
pub async fn wait_for_callback(listener: TcpListener, timeout: Duration) -> Result<CallbackParams> {
    let (tx, mut rx) = mpsc::channel::<CallbackParams>(1);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let app = Router::new().fallback(callback).with_state(tx);
    let server = tokio::spawn(async move {
        let shutdown = async {
            let _ = stop_rx.await;
        };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            tracing::warn!("Authorization listener stopped with error: {}", e);
        }
    });

    let received = tokio::time::timeout(timeout, rx.recv()).await;

    let _ = stop_tx.send(());
    if tokio::time::timeout(Duration::from_secs(5), server).await.is_err() {
        tracing::warn!("Authorization listener did not stop in time");
    }

    match received {
        Ok(Some(params)) => Ok(params),
        Ok(None) => Err(ServiceError::Authorization(
            "callback listener closed unexpectedly".to_string(),
        )),
        Err(_) => Err(ServiceError::Authorization(format!(
            "no authorization redirect within {}s",
            timeout.as_secs()
        ))),
    }
}

/// Validate a redirect against the state we issued and return its code.
pub fn check_callback(params: CallbackParams, expected_state: &str) -> Result<String> {
    if let Some(error) = params.error {
        let detail = params.error_description.unwrap_or_default();
        let message = format!("provider refused: {} {}", error, detail);
        return Err(ServiceError::Authorization(message.trim_end().to_string()));
    }
    if params.state.as_deref() != Some(expected_state) {
        return Err(ServiceError::Authorization(
            "state mismatch in authorization redirect".to_string(),
        ));
    }
    params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            ServiceError::Authorization("redirect carried no authorization code".to_string())
        })
}

/// OAuth client registration for one provider / OAuth 应用
#[derive(Debug, Clone)]
pub struct OAuthApp {
    pub provider: &'static str,
    pub authorize_endpoint: &'static str,
    pub token_endpoint: &'static str,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<&'static str>,
    /// Additional authorize-URL parameters (e.g. offline access)
    pub extra_params: &'static [(&'static str, &'static str)],
}

impl OAuthApp {
    pub fn google(client_id: String, client_secret: String) -> Self {
        Self {
            provider: "GoogleDrive",
            authorize_endpoint: "https://accounts.google.com/o/oauth2/v2/auth",
            token_endpoint: "https://oauth2.googleapis.com/token",
            client_id,
            client_secret,
            scope: Some("https://www.googleapis.com/auth/drive.readonly"),
            extra_params: &[("access_type", "offline"), ("prompt", "consent")],
        }
    }

    pub fn box_app(client_id: String, client_secret: String) -> Self {
        Self {
            provider: "Box",
            authorize_endpoint: "https://account.box.com/api/oauth2/authorize",
            token_endpoint: "https://api.box.com/oauth2/token",
            client_id,
            client_secret,
            scope: None,
            extra_params: &[],
        }
    }

    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        let mut url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&state={}",
            self.authorize_endpoint,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state)
        );
        if let Some(scope) = self.scope {
            url.push_str(&format!("&scope={}", urlencoding::encode(scope)));
        }
        for (key, value) in self.extra_params {
            url.push_str(&format!("&{}={}", key, urlencoding::encode(value)));
        }
        url
    }

    async fn token_request(&self, client: &Client, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let resp = client
            .post(self.token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                ServiceError::Authorization(format!(
                    "{} token request failed: {}",
                    self.provider, e
                ))
            })?;

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| {
                ServiceError::Authorization(format!(
                    "{} token response unreadable: {}",
                    self.provider, e
                ))
            })?;

        if let Some(error) = &token.error {
            let detail = token.error_description.as_deref().unwrap_or(error);
            return Err(ServiceError::Authorization(format!("{}: {}", self.provider, detail)));
        }
        if token.access_token.is_none() {
            return Err(ServiceError::Authorization(format!(
                "{} returned no access_token",
                self.provider
            )));
        }
        Ok(token)
    }

    /// 用授权码换取令牌
    pub async fn exchange_code(
        &self,
        client: &Client,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        self.token_request(
            client,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
            ],
        )
        .await
    }

    /// 刷新访问令牌
    pub async fn refresh(&self, client: &Client, refresh_token: &str) -> Result<TokenResponse> {
        self.token_request(
            client,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ],
        )
        .await
    }

    /// Full browser round trip: listen, log the URL, wait, verify, exchange.
    pub async fn authorize_interactive(
        &self,
        client: &Client,
        settings: &AuthSettings,
    ) -> Result<TokenResponse> {
        let listener = TcpListener::bind((settings.host.as_str(), settings.port))
            .await
            .map_err(|e| {
                ServiceError::Authorization(format!(
                    "cannot listen on {}:{}: {}",
                    settings.host, settings.port, e
                ))
            })?;

        let redirect_uri = settings.redirect_uri();
        let state = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            "Open this URL in a browser to authorize {}: {}",
            self.provider,
            self.authorize_url(&redirect_uri, &state)
        );

        let params = wait_for_callback(listener, settings.timeout).await?;
        let code = check_callback(params, &state)?;
        let token = self.exchange_code(client, &code, &redirect_uri).await?;
        tracing::info!("{} authorization completed", self.provider);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSection;

    #[test]
    fn test_settings_from_section() {
        let section =
            ConfigSection::new("Box", [("local_auth_port", "9191"), ("auth_timeout_secs", "10")]);
        let mut reader = section.reader();
        let settings = AuthSettings::from_reader(&mut reader);
        reader.finish().unwrap();

        assert_eq!(settings.host, "localhost");
        assert_eq!(settings.port, 9191);
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert_eq!(settings.redirect_uri(), "http://localhost:9191/");
    }

    #[test]
    fn test_authorize_url() {
        let app = OAuthApp::google("id 1".to_string(), "secret".to_string());
        let url = app.authorize_url("http://localhost:8080/", "xyz");
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?response_type=code"));
        assert!(url.contains("client_id=id%201"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2F"));
        assert!(url.contains("state=xyz"));
        assert!(url.contains("access_type=offline"));
        assert!(!url.contains("secret"));
    }

    #[test]
    fn test_check_callback() {
        let ok = CallbackParams {
            code: Some("c0de".into()),
            state: Some("s1".into()),
            ..Default::default()
        };
        assert_eq!(check_callback(ok.clone(), "s1").unwrap(), "c0de");
        assert!(matches!(check_callback(ok, "other"), Err(ServiceError::Authorization(_))));

        let denied = CallbackParams {
            error: Some("access_denied".into()),
            state: Some("s1".into()),
            ..Default::default()
        };
        let err = check_callback(denied, "s1").unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[tokio::test]
    async fn test_callback_delivers_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let browser = tokio::spawn(async move {
            let client = Client::new();
            let _ = client.get(format!("http://{}/favicon.ico", addr)).send().await;
            client
                .get(format!("http://{}/?code=abc&state=s1", addr))
                .send()
                .await
                .unwrap()
                .status()
        });

        let params = wait_for_callback(listener, Duration::from_secs(10)).await.unwrap();
        assert_eq!(params.code.as_deref(), Some("abc"));
        assert_eq!(check_callback(params, "s1").unwrap(), "abc");
        assert!(browser.await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_abandoned_flow_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let err = wait_for_callback(listener, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Authorization(_)));
    }
}
