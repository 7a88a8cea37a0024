use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use url::Url;

use super::{MediaStore, StagedFile};

/// Object storage reached over HTTP: `PUT {endpoint}/{key}` uploads,
/// `DELETE {endpoint}/{key}` removes. Authenticated with a bearer key.
pub struct HttpMediaStore {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    public_base_url: String,
}

impl HttpMediaStore {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        public_base_url: String,
    ) -> anyhow::Result<Self> {
        // A trailing slash makes `join` append instead of replacing the last segment.
        let endpoint = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{}/", endpoint)
        };
        Ok(Self {
            client: Client::new(),
            endpoint: Url::parse(&endpoint).context("invalid media endpoint")?,
            api_key,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, key: &str) -> anyhow::Result<Url> {
        self.endpoint
            .join(key)
            .with_context(|| format!("invalid storage key: {}", key))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[async_trait]
impl MediaStore for HttpMediaStore {
    async fn put(&self, file: &StagedFile, key: &str) -> anyhow::Result<String> {
        let body = tokio::fs::read(&file.path)
            .await
            .with_context(|| format!("reading staged file {}", file.path.display()))?;

        let req = self
            .client
            .put(self.object_url(key)?)
            .header(header::CONTENT_TYPE, file.content_type.as_str())
            .body(body);

        self.authorize(req)
            .send()
            .await
            .context("media upload request failed")?
            .error_for_status()
            .context("media store rejected upload")?;

        Ok(format!("{}/{}", self.public_base_url, key))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let req = self.client.delete(self.object_url(key)?);
        let response = self
            .authorize(req)
            .send()
            .await
            .context("media delete request failed")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        response
            .error_for_status()
            .context("media store rejected delete")?;
        Ok(())
    }
}
