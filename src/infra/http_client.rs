use crate::app::ports::{HttpClientPort, HttpResponse};
use crate::error::Result;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("qol_pipeline/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn into_response(resp: reqwest::Response) -> std::result::Result<HttpResponse, String> {
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp.bytes().await.map_err(redact)?.to_vec();
        Ok(HttpResponse { status, bytes, content_type })
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn get(&self, url: &str) -> std::result::Result<HttpResponse, String> {
        let resp = self.client.get(url).send().await.map_err(redact)?;
        Self::into_response(resp).await
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> std::result::Result<HttpResponse, String> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(redact)?;
        Self::into_response(resp).await
    }
}

/// Request URLs carry API keys, so they are stripped from error text.
fn redact(err: reqwest::Error) -> String {
    err.without_url().to_string()
}
