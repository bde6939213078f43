use crate::config::GeoSettings;
use crate::error::{AuthError, UpstreamError};
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const LOGIN_PATH: &str = "usersservice/v2/login";
pub const DEVICE_DETAILS_PATH: &str = "api/userapi/v2/user/detail-systems?systemDetails=true";

/// An authenticated Geotogether session bound to one smart-meter system.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub device_id: String,
    pub system_name: String,
}

/// Owns the single upstream session. Logs in lazily and keeps the token until
/// a caller reports a failed request through [`GeoSession::invalidate`].
pub struct GeoSession {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
    session: Option<Session>,
}

impl GeoSession {
    pub fn new(settings: &GeoSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: settings.base_url.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            client,
            session: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Forgets the cached session so the next call logs in again.
    pub fn invalidate(&mut self) {
        if self.session.take().is_some() {
            debug!("Geotogether session dropped, next request logs in again");
        }
    }

    /// Returns the cached session, logging in first if there is none.
    pub async fn ensure_session(&mut self) -> Result<&Session, AuthError> {
        let session = match self.session.take() {
            Some(session) => session,
            None => self.login().await?,
        };
        Ok(self.session.insert(session))
    }

    /// Drops any cached session and logs in immediately.
    pub async fn reconnect(&mut self) -> Result<&Session, AuthError> {
        self.invalidate();
        self.ensure_session().await
    }

    async fn login(&self) -> Result<Session, AuthError> {
        let url = self.url(LOGIN_PATH);
        debug!("call login to Geo API. url: {url}");
        let request = self.client.post(&url).json(&LoginRequest {
            identity: &self.username,
            password: &self.password,
        });
        let login: LoginResponse = send_json(request).await.map_err(|e| {
            warn!("Geotogether-domo login failed: {e}");
            AuthError::LoginRejected(e.to_string())
        })?;
        let token = login
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                warn!("Geotogether-domo login token not found");
                AuthError::LoginRejected("response has no access token".into())
            })?;

        let url = self.url(DEVICE_DETAILS_PATH);
        debug!("call deviceID to Geo API. url: {url}");
        let details: DeviceDetailsResponse = send_json(self.client.get(&url).bearer_auth(&token))
            .await
            .map_err(|e| {
                warn!("Geotogether-domo deviceID failed: {e}");
                AuthError::DeviceLookupFailed(e.to_string())
            })?;
        let device_id = details
            .system_roles
            .into_iter()
            .next()
            .and_then(|role| role.system_id)
            .ok_or_else(|| {
                warn!("Geotogether-domo deviceID not found");
                AuthError::DeviceLookupFailed("response has no systemRoles[0].systemId".into())
            })?;
        let system_name = details
            .system_details
            .into_iter()
            .next()
            .and_then(|detail| detail.name)
            .unwrap_or_default();

        info!("Geotogether-domo login success. DeviceID: {device_id} System name: {system_name}");
        Ok(Session {
            token,
            device_id,
            system_name,
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Sends a request and decodes a JSON body, treating any non-2xx status as a failure.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, UpstreamError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(UpstreamError::Status(status));
    }
    let body = response.text().await?;
    debug!("Geo API replied: {body}");
    serde_json::from_str(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    identity: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceDetailsResponse {
    #[serde(default)]
    system_roles: Vec<SystemRole>,
    #[serde(default)]
    system_details: Vec<SystemDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SystemRole {
    system_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SystemDetail {
    name: Option<String>,
}


#[cfg(test)]
mod tests {
    use super::mock_geo::*;
    use super::*;
    use mockito::Matcher;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_login_caches_session() {
        let mut server = mockito::Server::new_async().await;
        let login = mock_login(&mut server, 1).await;
        let details = mock_device_details(&mut server, 1).await;

        let mut geo = GeoSession::new(&settings(&server)).unwrap();
        assert!(!geo.is_connected());

        let session = geo.ensure_session().await.unwrap().clone();
        assert_eq!(session.token, TOKEN);
        assert_eq!(session.device_id, DEVICE_ID);
        assert_eq!(session.system_name, SYSTEM_NAME);

        // Second call must reuse the cached token
        assert_ok!(geo.ensure_session().await);
        assert!(geo.is_connected());

        login.assert_async().await;
        details.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_rejected_on_401() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/usersservice/v2/login")
            .with_status(401)
            .with_body(r#"{"error": "unauthorized"}"#)
            .create_async()
            .await;
        let details = mock_device_details(&mut server, 0).await;

        let mut geo = GeoSession::new(&settings(&server)).unwrap();
        let result = geo.ensure_session().await;

        assert!(matches!(result, Err(AuthError::LoginRejected(_))));
        assert!(geo.session().is_none());
        login.assert_async().await;
        details.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_without_token_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/usersservice/v2/login")
            .with_status(200)
            .with_body(r#"{"username": "me", "validated": true}"#)
            .create_async()
            .await;

        let mut geo = GeoSession::new(&settings(&server)).unwrap();
        let result = geo.ensure_session().await;

        assert!(matches!(result, Err(AuthError::LoginRejected(_))));
        assert!(!geo.is_connected());
    }

    #[tokio::test]
    async fn test_login_accepts_any_2xx_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/usersservice/v2/login")
            .with_status(201)
            .with_body(LOGIN_BODY)
            .create_async()
            .await;
        mock_device_details(&mut server, 1).await;

        let mut geo = GeoSession::new(&settings(&server)).unwrap();

        assert_ok!(geo.ensure_session().await);
    }

    #[tokio::test]
    async fn test_device_lookup_failures() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server, 2).await;
        let failing = server
            .mock(
                "GET",
                Matcher::Regex(r"^/api/userapi/v2/user/detail-systems".into()),
            )
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let mut geo = GeoSession::new(&settings(&server)).unwrap();
        let result = geo.ensure_session().await;
        assert!(matches!(result, Err(AuthError::DeviceLookupFailed(_))));
        assert!(!geo.is_connected());
        failing.assert_async().await;
        failing.remove_async().await;

        // A 200 without any system role is just as unusable
        server
            .mock(
                "GET",
                Matcher::Regex(r"^/api/userapi/v2/user/detail-systems".into()),
            )
            .with_status(200)
            .with_body(r#"{"systemRoles": [], "systemDetails": []}"#)
            .create_async()
            .await;
        let result = geo.ensure_session().await;
        assert!(matches!(result, Err(AuthError::DeviceLookupFailed(_))));
        assert!(!geo.is_connected());
    }

    #[tokio::test]
    async fn test_invalidate_forces_exactly_one_new_login() {
        let mut server = mockito::Server::new_async().await;
        let login = mock_login(&mut server, 2).await;
        let details = mock_device_details(&mut server, 2).await;

        let mut geo = GeoSession::new(&settings(&server)).unwrap();
        assert_ok!(geo.ensure_session().await);

        geo.invalidate();
        assert!(!geo.is_connected());

        assert_ok!(geo.ensure_session().await);
        assert_ok!(geo.ensure_session().await);

        login.assert_async().await;
        details.assert_async().await;
    }

    #[tokio::test]
    async fn test_reconnect_logs_in_again() {
        let mut server = mockito::Server::new_async().await;
        let login = mock_login(&mut server, 2).await;
        mock_device_details(&mut server, 2).await;

        let mut geo = GeoSession::new(&settings(&server)).unwrap();
        assert_ok!(geo.ensure_session().await);
        assert_ok!(geo.reconnect().await);

        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_api() {
        let geo_settings = GeoSettings {
            base_url: "http://127.0.0.1:1".into(),
            username: "me@example.com".into(),
            password: "secret".into(),
            timeout_secs: 1,
        };

        let mut geo = GeoSession::new(&geo_settings).unwrap();

        assert_err!(geo.ensure_session().await);
        assert!(!geo.is_connected());
    }

    #[test]
    fn test_url_joins_base_and_path() {
        let mut geo_settings = GeoSettings::default();
        let geo = GeoSession::new(&geo_settings).unwrap();
        assert_eq!(
            geo.url(LOGIN_PATH),
            "https://api.geotogether.com/usersservice/v2/login"
        );

        geo_settings.base_url = "http://localhost:8080".into();
        let geo = GeoSession::new(&geo_settings).unwrap();
        assert_eq!(
            geo.url(DEVICE_DETAILS_PATH),
            "http://localhost:8080/api/userapi/v2/user/detail-systems?systemDetails=true"
        );
    }
}
