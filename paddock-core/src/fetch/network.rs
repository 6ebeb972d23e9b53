use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::redirect::Policy;

use crate::config::FetchSection;

use super::error::{FetchError, FetchOutcome};

#[derive(Debug, Clone)]
pub struct NetworkResponse {
    pub status: u16,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: String,
    pub elapsed: Duration,
}

impl NetworkResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Plain HTTP access without script execution.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn get(&self, url: &str) -> FetchOutcome<NetworkResponse>;
}

#[derive(Debug, Clone)]
pub struct ReqwestNetworkClient {
    client: reqwest::Client,
}

impl ReqwestNetworkClient {
    pub fn new(config: &FetchSection) -> FetchOutcome<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .redirect(Policy::limited(config.max_redirects))
            .build()
            .map_err(|err| FetchError::Network {
                url: String::new(),
                message: format!("failed to build http client: {err}"),
            })?;
        Ok(Self { client })
    }
}

fn map_transport(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(format!("GET {url}"))
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl NetworkClient for ReqwestNetworkClient {
    async fn get(&self, url: &str) -> FetchOutcome<NetworkResponse> {
        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(|err| map_transport(url, err))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|err| map_transport(url, err))?;
        Ok(NetworkResponse {
            status,
            final_url,
            content_type,
            body,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sends_bot_identity_and_reads_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendar"))
            .and(header("user-agent", "PaddockBot/1.0 (+schedule data collector)"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string("<html><body>Round 1</body></html>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ReqwestNetworkClient::new(&FetchSection::default()).unwrap();
        let response = client
            .get(&format!("{}/calendar", server.uri()))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert!(response.is_success());
        assert_eq!(
            response.content_type.as_deref(),
            Some("text/html; charset=utf-8")
        );
        assert!(response.body.contains("Round 1"));
    }

    #[tokio::test]
    async fn follows_redirects_to_final_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", "/new"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;

        let client = ReqwestNetworkClient::new(&FetchSection::default()).unwrap();
        let response = client.get(&format!("{}/old", server.uri())).await.unwrap();
        assert_eq!(response.final_url, format!("{}/new", server.uri()));
        assert_eq!(response.body, "moved");
    }

    #[tokio::test]
    async fn slow_responses_surface_as_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let config = FetchSection {
            timeout_seconds: 1,
            ..FetchSection::default()
        };
        let client = ReqwestNetworkClient::new(&config).unwrap();
        let err = client.get(&server.uri()).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
    }
}
