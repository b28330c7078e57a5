//! Hue REST v2 control-plane client
//!
//! A thin HTTPS client against one hub's local REST surface. Hubs serve a
//! certificate from a private CA, so the client starts strict and falls back
//! to disabled certificate verification on the first connect failure, once,
//! with a warning. A strict-only mode is available for deployments that
//! provision the CA.

use reqwest::{Client, Method, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

use crate::error::{BridgeError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const APPLICATION_KEY_HEADER: &str = "hue-application-key";
const APPLICATION_ID_HEADER: &str = "hue-application-id";

/// An entertainment configuration as reported by the hub, mirrored read-only.
#[derive(Debug, Clone)]
pub struct EntertainmentConfiguration {
    pub id: String,
    pub name: Option<String>,
    pub channel_ids: Vec<u8>,
}

// V2 API structures

#[derive(Deserialize, Debug)]
struct V2Response<T> {
    data: Vec<T>,
}

#[derive(Deserialize, Debug)]
struct V2EntertainmentConfig {
    id: String,
    #[serde(default)]
    metadata: Option<V2Metadata>,
    #[serde(default)]
    channels: Vec<V2Channel>,
}

#[derive(Deserialize, Debug)]
struct V2Metadata {
    name: Option<String>,
}

#[derive(Deserialize, Debug)]
struct V2Channel {
    #[serde(default)]
    channel_id: Option<serde_json::Number>,
}

impl V2EntertainmentConfig {
    fn into_configuration(self) -> EntertainmentConfiguration {
        // channel_id filtered to finite integers in the u8 range
        let channel_ids = self
            .channels
            .iter()
            .filter_map(|c| c.channel_id.as_ref())
            .filter_map(|n| n.as_u64())
            .filter_map(|n| u8::try_from(n).ok())
            .collect();
        EntertainmentConfiguration {
            id: self.id,
            name: self.metadata.and_then(|m| m.name),
            channel_ids,
        }
    }
}

/// HTTPS client for one hub
pub struct HubApiClient {
    host: String,
    app_key: String,
    strict: Client,
    insecure: Client,
    verify_disabled: AtomicBool,
    allow_fallback: bool,
}

impl HubApiClient {
    /// Build a client for `host`, authenticating with `app_key`.
    ///
    /// With `strict_only` set the insecure fallback is never taken and TLS
    /// failures surface to the caller.
    pub fn new(host: &str, app_key: &str, strict_only: bool) -> Result<Self> {
        let strict = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let insecure = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            host: host.to_string(),
            app_key: app_key.to_string(),
            strict,
            insecure,
            verify_disabled: AtomicBool::new(false),
            allow_fallback: !strict_only,
        })
    }

    /// Resolve the DTLS PSK identity for this application key.
    ///
    /// The hub returns it in the `hue-application-id` response header of
    /// GET /auth/v1; when the header is missing the stored key itself is the
    /// identity.
    pub async fn resolve_application_id(&self) -> Result<String> {
        let resp = self.send(Method::GET, "/auth/v1", None).await?;
        let resp = self.ensure_success("GET", "/auth/v1", resp).await?;

        let app_id = resp
            .headers()
            .get(APPLICATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        // Drain the body so the connection can be reused
        let _ = resp.bytes().await;

        Ok(app_id.unwrap_or_else(|| self.app_key.clone()))
    }

    /// List the hub's entertainment configurations with their channel ids.
    pub async fn list_entertainment_configurations(
        &self,
    ) -> Result<Vec<EntertainmentConfiguration>> {
        let path = "/clip/v2/resource/entertainment_configuration";
        let resp = self.send(Method::GET, path, None).await?;
        let resp = self.ensure_success("GET", path, resp).await?;

        let parsed: V2Response<V2EntertainmentConfig> = resp.json().await?;
        Ok(parsed
            .data
            .into_iter()
            .map(V2EntertainmentConfig::into_configuration)
            .collect())
    }

    /// Put the configuration into streaming mode.
    pub async fn start_entertainment_configuration(&self, id: &str) -> Result<()> {
        self.set_streaming(id, "start").await
    }

    /// Take the configuration out of streaming mode.
    pub async fn stop_entertainment_configuration(&self, id: &str) -> Result<()> {
        self.set_streaming(id, "stop").await
    }

    async fn set_streaming(&self, id: &str, action: &str) -> Result<()> {
        let path = format!("/clip/v2/resource/entertainment_configuration/{}", id);
        let body = json!({ "action": action });
        let resp = self.send(Method::PUT, &path, Some(body)).await?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        // The v2 API reports some failures with a 2xx status and an error
        // array in the body
        if !status.is_success() || text.contains("\"error\"") {
            return Err(BridgeError::Http {
                method: "PUT",
                path,
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(())
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let first = self
            .request(self.current_client(), method.clone(), path, body.clone())
            .await;

        match first {
            Ok(resp) => Ok(resp),
            Err(e)
                if e.is_connect()
                    && self.allow_fallback
                    && !self.verify_disabled.load(Ordering::Relaxed) =>
            {
                warn!(
                    "HTTPS to {} failed ({}); retrying with certificate verification disabled",
                    self.host, e
                );
                self.verify_disabled.store(true, Ordering::Relaxed);
                Ok(self.request(&self.insecure, method, path, body).await?)
            }
            // Strict-only mode surfaces certificate problems instead of
            // falling back
            Err(e) if e.is_connect() && !self.allow_fallback => {
                Err(BridgeError::Tls(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn current_client(&self) -> &Client {
        if self.verify_disabled.load(Ordering::Relaxed) {
            &self.insecure
        } else {
            &self.strict
        }
    }

    async fn request(
        &self,
        client: &Client,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> std::result::Result<Response, reqwest::Error> {
        let url = format!("https://{}{}", self.host, path);
        let mut request = client
            .request(method, &url)
            .header(APPLICATION_KEY_HEADER, &self.app_key);
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await
    }

    async fn ensure_success(
        &self,
        method: &'static str,
        path: &str,
        resp: Response,
    ) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(BridgeError::Http {
            method,
            path: path.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_v2_entertainment_config() {
        let json = json!({
            "data": [{
                "id": "1a8d99cc-967b-44f2-9202-43f976c0fa6b",
                "type": "entertainment_configuration",
                "metadata": { "name": "Entertainment area 1" },
                "status": "inactive",
                "channels": [
                    { "channel_id": 0, "position": { "x": -0.6, "y": 0.8, "z": 0.0 } },
                    { "channel_id": 1, "position": { "x": 0.6, "y": 0.8, "z": 0.0 } }
                ]
            }]
        });

        let parsed: V2Response<V2EntertainmentConfig> = serde_json::from_value(json).unwrap();
        let configs: Vec<_> = parsed
            .data
            .into_iter()
            .map(V2EntertainmentConfig::into_configuration)
            .collect();

        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].id, "1a8d99cc-967b-44f2-9202-43f976c0fa6b");
        assert_eq!(configs[0].name.as_deref(), Some("Entertainment area 1"));
        assert_eq!(configs[0].channel_ids, vec![0, 1]);
    }

    #[test]
    fn test_parse_filters_non_integer_channel_ids() {
        let json = json!({
            "data": [{
                "id": "1a8d99cc-967b-44f2-9202-43f976c0fa6b",
                "channels": [
                    { "channel_id": 2 },
                    { "channel_id": 3.5 },
                    { "channel_id": 999 },
                    { "position": { "x": 0.0, "y": 0.0, "z": 0.0 } }
                ]
            }]
        });

        let parsed: V2Response<V2EntertainmentConfig> = serde_json::from_value(json).unwrap();
        let config = parsed.data.into_iter().next().unwrap().into_configuration();
        assert_eq!(config.channel_ids, vec![2]);
    }

    #[test]
    fn test_parse_tolerates_missing_metadata() {
        let json = json!({
            "data": [{ "id": "x", "channels": [] }]
        });
        let parsed: V2Response<V2EntertainmentConfig> = serde_json::from_value(json).unwrap();
        let config = parsed.data.into_iter().next().unwrap().into_configuration();
        assert!(config.name.is_none());
        assert!(config.channel_ids.is_empty());
    }
}
