//! HTTP API of the streaming host.
//!
//! Two endpoints matter to the session layer:
//!
//! ```text
//! POST /offer        {sdp, type}      → {sdp, type}
//! POST /api/quality  {quality: "2k"}  → acknowledged
//! ```
//!
//! Any non-2xx status is a failure of the corresponding step.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::GamelinkError;
use crate::quality::QualityLevel;

pub const OFFER_PATH: &str = "/offer";
pub const QUALITY_PATH: &str = "/api/quality";

// ── SessionDescription ───────────────────────────────────────────

/// Negotiation payload exchanged with the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: "offer".into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: "answer".into(),
        }
    }

    pub fn is_answer(&self) -> bool {
        self.kind == "answer"
    }
}

#[derive(Debug, Serialize)]
struct QualityRequest {
    quality: QualityLevel,
}

// ── HostApi ──────────────────────────────────────────────────────

/// The host endpoints the session layer depends on.
#[async_trait]
pub trait HostApi: Send + Sync {
    /// Submit a local offer and receive the host's answer.
    async fn post_offer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, GamelinkError>;

    /// Tell the host to prepare the encode pipeline for `level`.
    async fn set_quality(&self, level: QualityLevel) -> Result<(), GamelinkError>;
}

// ── HttpHost ─────────────────────────────────────────────────────

/// `reqwest`-backed [`HostApi`].
pub struct HttpHost {
    base_url: String,
    client: reqwest::Client,
}

impl HttpHost {
    /// Create a client for the host at `base_url`
    /// (e.g. `http://192.168.1.20:8080`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GamelinkError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        if base_url.is_empty() {
            return Err(GamelinkError::Http("host url cannot be empty".into()));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(GamelinkError::Http(format!(
                "host url must start with http:// or https://, got: {base_url}"
            )));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl HostApi for HttpHost {
    async fn post_offer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, GamelinkError> {
        debug!(url = %self.url(OFFER_PATH), "submitting offer");
        let response = self
            .client
            .post(self.url(OFFER_PATH))
            .json(offer)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GamelinkError::Host {
                endpoint: OFFER_PATH,
                status: status.as_u16(),
            });
        }

        let answer: SessionDescription = response.json().await?;
        Ok(answer)
    }

    async fn set_quality(&self, level: QualityLevel) -> Result<(), GamelinkError> {
        let response = self
            .client
            .post(self.url(QUALITY_PATH))
            .json(&QualityRequest { quality: level })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GamelinkError::Host {
                endpoint: QUALITY_PATH,
                status: status.as_u16(),
            });
        }

        info!(quality = %level, "host acknowledged quality change");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned HTTP response on a local port. The task yields
    /// the raw request it received.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (url, task)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        body.len() >= length
    }

    #[test]
    fn description_uses_type_key() {
        let text = serde_json::to_string(&SessionDescription::offer("v=0")).unwrap();
        assert_eq!(text, r#"{"sdp":"v=0","type":"offer"}"#);

        let answer: SessionDescription =
            serde_json::from_str(r#"{"sdp":"v=0","type":"answer"}"#).unwrap();
        assert!(answer.is_answer());
    }

    #[test]
    fn quality_request_body() {
        let text = serde_json::to_string(&QualityRequest {
            quality: QualityLevel::High,
        })
        .unwrap();
        assert_eq!(text, r#"{"quality":"2k"}"#);
    }

    #[test]
    fn rejects_bad_base_url() {
        assert!(HttpHost::new("", Duration::from_secs(1)).is_err());
        assert!(HttpHost::new("ftp://host", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn trims_trailing_slash() {
        let host = HttpHost::new("http://127.0.0.1:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(host.base_url(), "http://127.0.0.1:8080");
        assert_eq!(host.url(OFFER_PATH), "http://127.0.0.1:8080/offer");
    }

    #[tokio::test]
    async fn offer_rejected_by_host_reports_status() {
        let (url, server) = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#).await;
        let host = HttpHost::new(url, Duration::from_secs(5)).unwrap();

        let err = host
            .post_offer(&SessionDescription::offer("v=0"))
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                GamelinkError::Host {
                    endpoint: "/offer",
                    status: 500
                }
            ),
            "{err:?}"
        );
        assert!(err.is_user_visible());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /offer HTTP/1.1"));
    }

    #[tokio::test]
    async fn offer_answer_is_parsed() {
        let (url, server) =
            serve_once("200 OK", r#"{"sdp":"v=0 answer","type":"answer"}"#).await;
        let host = HttpHost::new(url, Duration::from_secs(5)).unwrap();

        let answer = host
            .post_offer(&SessionDescription::offer("v=0 offer"))
            .await
            .unwrap();
        assert_eq!(answer, SessionDescription::answer("v=0 answer"));

        let request = server.await.unwrap();
        assert!(request.ends_with(r#"{"sdp":"v=0 offer","type":"offer"}"#));
    }

    #[tokio::test]
    async fn quality_rejected_by_host_reports_status() {
        let (url, server) = serve_once("503 Service Unavailable", "{}").await;
        let host = HttpHost::new(url, Duration::from_secs(5)).unwrap();

        let err = host.set_quality(QualityLevel::Ultra).await.unwrap_err();
        assert!(matches!(
            err,
            GamelinkError::Host {
                endpoint: "/api/quality",
                status: 503
            }
        ));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/quality HTTP/1.1"));
        assert!(request.ends_with(r#"{"quality":"4k"}"#));
    }

    #[tokio::test]
    async fn unreachable_host_is_an_error() {
        // Port 9 (discard) on localhost is not expected to serve HTTP.
        let host = HttpHost::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = host
            .post_offer(&SessionDescription::offer("v=0"))
            .await
            .unwrap_err();
        assert!(matches!(err, GamelinkError::Http(_)));
    }
}
