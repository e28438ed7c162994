//! reqwest-backed remote authority client.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{RemoteAuthority, RemoteError, RemoteResult};
use crate::error::{Error, Result};
use crate::models::{
    AlertPayload, EmergencyContact, GroupAction, GroupMembership, MapSnapshot, StatusPayload,
};
use crate::util::is_http_url;

/// Per-call timeouts; anything slower is treated as a transient failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteTimeouts {
    /// Calls a user is waiting on (reachability check, contact fetch)
    pub interactive: Duration,
    /// Queue flushes and other background delivery
    pub background: Duration,
}

impl Default for RemoteTimeouts {
    fn default() -> Self {
        Self {
            interactive: Duration::from_millis(800),
            background: Duration::from_millis(3_000),
        }
    }
}

#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    access_token: String,
    timeouts: RemoteTimeouts,
    client: Client,
}

impl fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn new(
        base_url: impl AsRef<str>,
        access_token: impl Into<String>,
        timeouts: RemoteTimeouts,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url.as_ref())?;
        let access_token = access_token.into().trim().to_string();
        if access_token.is_empty() {
            return Err(Error::InvalidInput(
                "Remote access token must not be empty".to_string(),
            ));
        }
        let client = Client::builder()
            .build()
            .map_err(|error| Error::InvalidInput(format!("Failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url,
            access_token,
            timeouts,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    fn authorized(&self, request: RequestBuilder, timeout: Duration) -> RequestBuilder {
        request
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
            .timeout(timeout)
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status, &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<T> {
        let response = self.send(request).await?;
        let status = response.status().as_u16();
        response
            .json::<T>()
            .await
            .map_err(|error| RemoteError::Rejected {
                status,
                message: format!("unreadable response body: {error}"),
            })
    }
}

impl RemoteAuthority for HttpRemote {
    async fn post_status(&self, payload: &StatusPayload) -> RemoteResult<()> {
        let request = self.authorized(
            self.client.post(self.url("/status")).json(payload),
            self.timeouts.background,
        );
        self.send(request).await?;
        Ok(())
    }

    async fn post_alert(&self, alert: &AlertPayload) -> RemoteResult<String> {
        let request = self.authorized(
            self.client.post(self.url("/alerts")).json(alert),
            self.timeouts.background,
        );
        let created: CreatedAlertResponse = self.send_json(request).await?;
        created.into_id().ok_or_else(|| RemoteError::Rejected {
            status: 200,
            message: "alert response did not include an id".to_string(),
        })
    }

    async fn post_group_action(&self, action: &GroupAction) -> RemoteResult<()> {
        let route = format!(
            "/groups/{}/actions",
            urlencoding::encode(&action.group_id)
        );
        let request = self.authorized(
            self.client.post(self.url(&route)).json(action),
            self.timeouts.background,
        );
        self.send(request).await?;
        Ok(())
    }

    async fn post_map_snapshot(&self, alert_id: &str, snapshot: &MapSnapshot) -> RemoteResult<()> {
        let route = format!("/alerts/{}/map", urlencoding::encode(alert_id));
        let request = self.authorized(
            self.client.post(self.url(&route)).json(snapshot),
            self.timeouts.background,
        );
        self.send(request).await?;
        Ok(())
    }

    async fn fetch_contacts(&self) -> RemoteResult<Vec<EmergencyContact>> {
        let request = self.authorized(
            self.client.get(self.url("/contacts/sync")),
            self.timeouts.interactive,
        );
        let payload: ContactsResponse = self.send_json(request).await?;
        Ok(payload.into_contacts())
    }

    async fn push_contacts(&self, contacts: &[EmergencyContact]) -> RemoteResult<()> {
        let request = self.authorized(
            self.client
                .post(self.url("/contacts/sync"))
                .json(&serde_json::json!({ "contacts": contacts })),
            self.timeouts.background,
        );
        self.send(request).await?;
        Ok(())
    }

    async fn fetch_group_memberships(&self) -> RemoteResult<Vec<GroupMembership>> {
        let request = self.authorized(
            self.client.get(self.url("/groups/memberships")),
            self.timeouts.interactive,
        );
        let payload: MembershipsResponse = self.send_json(request).await?;
        Ok(payload.into_memberships())
    }

    async fn ping(&self) -> RemoteResult<()> {
        let request = self.authorized(
            self.client.head(self.url("/status")),
            self.timeouts.interactive,
        );
        match self.send(request).await {
            // Any answer from the server proves reachability.
            Ok(_) | Err(RemoteError::Rejected { .. } | RemoteError::NotYetAvailable(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }
}

pub fn normalize_base_url(raw: &str) -> Result<String> {
    let base = raw.trim().trim_end_matches('/').to_string();
    if base.is_empty() {
        return Err(Error::InvalidInput(
            "API base URL must not be empty".to_string(),
        ));
    }
    if !is_http_url(&base) {
        return Err(Error::InvalidInput(
            "API base URL must include http:// or https://".to_string(),
        ));
    }
    Ok(base)
}

#[derive(Debug, Deserialize)]
struct CreatedAlertResponse {
    id: Option<serde_json::Value>,
    alert: Option<CreatedAlert>,
}

#[derive(Debug, Deserialize)]
struct CreatedAlert {
    id: serde_json::Value,
}

impl CreatedAlertResponse {
    fn into_id(self) -> Option<String> {
        self.id
            .or_else(|| self.alert.map(|alert| alert.id))
            .and_then(|value| match value {
                serde_json::Value::String(id) if !id.trim().is_empty() => Some(id),
                serde_json::Value::Number(id) => Some(id.to_string()),
                _ => None,
            })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContactsResponse {
    Wrapped { contacts: Vec<EmergencyContact> },
    Bare(Vec<EmergencyContact>),
}

impl ContactsResponse {
    fn into_contacts(self) -> Vec<EmergencyContact> {
        match self {
            Self::Wrapped { contacts } | Self::Bare(contacts) => contacts,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MembershipsResponse {
    Wrapped { memberships: Vec<GroupMembership> },
    Bare(Vec<GroupMembership>),
}

impl MembershipsResponse {
    fn into_memberships(self) -> Vec<GroupMembership> {
        match self {
            Self::Wrapped { memberships } | Self::Bare(memberships) => memberships,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url("").is_err());
        assert!(normalize_base_url("api.example.com").is_err());
        assert_eq!(
            normalize_base_url(" https://api.example.com/ ").unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn debug_redacts_access_token() {
        let remote = HttpRemote::new(
            "https://api.example.com",
            "secret-bearer",
            RemoteTimeouts::default(),
        )
        .unwrap();
        let rendered = format!("{remote:?}");
        assert!(!rendered.contains("secret-bearer"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(HttpRemote::new("https://api.example.com", "  ", RemoteTimeouts::default()).is_err());
    }

    #[test]
    fn alert_id_is_read_from_either_shape() {
        let flat: CreatedAlertResponse = serde_json::from_str(r#"{"id":"a-1"}"#).unwrap();
        assert_eq!(flat.into_id().as_deref(), Some("a-1"));

        let nested: CreatedAlertResponse =
            serde_json::from_str(r#"{"alert":{"id":42}}"#).unwrap();
        assert_eq!(nested.into_id().as_deref(), Some("42"));

        let missing: CreatedAlertResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.into_id(), None);
    }

    #[test]
    fn contacts_response_accepts_bare_and_wrapped_lists() {
        let bare: ContactsResponse = serde_json::from_str("[]").unwrap();
        assert!(bare.into_contacts().is_empty());

        let wrapped: ContactsResponse = serde_json::from_str(
            r#"{"contacts":[{"id":"c","name":"Ana","phone":"1","updatedAt":"2026-01-01T00:00:00Z"}]}"#,
        )
        .unwrap();
        assert_eq!(wrapped.into_contacts()[0].name, "Ana");
    }
}
