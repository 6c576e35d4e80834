use anyhow::Context;
use std::future::Future;
use std::time::Duration;
use wplacer_protocol::{HttpRequest, HttpResponse};

/// The unmodified network path.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, req: HttpRequest) -> impl Future<Output = anyhow::Result<HttpResponse>> + Send;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    cookie: Option<String>,
}

impl ReqwestTransport {
    pub fn new(cookie: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build http client")?;
        Ok(Self { client, cookie })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, req: HttpRequest) -> anyhow::Result<HttpResponse> {
        let method = reqwest::Method::from_bytes(req.method.as_bytes())
            .with_context(|| format!("bad method {:?}", req.method))?;
        let mut builder = self.client.request(method, &req.url);

        let mut has_cookie = false;
        for (name, value) in &req.headers {
            has_cookie |= name.eq_ignore_ascii_case("cookie");
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let (false, Some(cookie)) = (has_cookie, &self.cookie) {
            builder = builder.header("cookie", cookie.as_str());
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let resp = builder
            .send()
            .await
            .with_context(|| format!("{} {}", req.method, req.url))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Ok(HttpResponse { status, body })
    }
}
