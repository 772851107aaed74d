use crate::error::{DistCheckError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;

/// Stream of body chunks, as produced by [`DistFetcher::fetch_stream`].
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Abstraction over fetching distribution content by URL.
#[async_trait]
pub trait DistFetcher: Send + Sync {
    /// Fetch the complete body at `url`.
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes>;

    /// Open the body at `url` as a stream of chunks.
    async fn fetch_stream(&self, url: &str) -> Result<ByteStream>;
}

/// Builder for [`HttpDistClient`].
#[derive(Default)]
pub struct HttpDistClientBuilder {
    client: Option<Client>,
    user_agent: Option<String>,
}

impl HttpDistClientBuilder {
    /// Provide a custom reqwest client instance.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Override the user agent of the default client.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<HttpDistClient> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(
                    self.user_agent
                        .unwrap_or_else(|| format!("distcheck/{}", env!("CARGO_PKG_VERSION"))),
                )
                .build()?,
        };

        Ok(HttpDistClient { client })
    }
}

/// Plain HTTP(S) fetcher for distribution servers.
#[derive(Clone)]
pub struct HttpDistClient {
    client: Client,
}

impl HttpDistClient {
    /// Create a new builder.
    pub fn builder() -> HttpDistClientBuilder {
        HttpDistClientBuilder::default()
    }
}

#[async_trait]
impl DistFetcher for HttpDistClient {
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?)
    }

    async fn fetch_stream(&self, url: &str) -> Result<ByteStream> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes_stream().map_err(DistCheckError::from).boxed())
    }
}

/// Join a base URL and a relative path with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn join_url_avoids_duplicate_slashes() {
        assert_eq!(
            join_url("https://iojs.org/dist/", "/v1.2.0"),
            "https://iojs.org/dist/v1.2.0"
        );
        assert_eq!(
            join_url("https://iojs.org/dist", "index.json"),
            "https://iojs.org/dist/index.json"
        );
    }

    #[tokio::test]
    async fn http_client_fetches_bytes_and_streams() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/dist/index.json");
                then.status(200).body(r#"[{"version":"v1.0.0"}]"#);
            })
            .await;

        let client = HttpDistClient::builder().build().unwrap();
        let url = server.url("/dist/index.json");

        let body = client.fetch_bytes(&url).await.unwrap();
        assert_eq!(&body[..], br#"[{"version":"v1.0.0"}]"#);

        let chunks: Vec<Bytes> = client
            .fetch_stream(&url)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), body.to_vec());
    }

    #[tokio::test]
    async fn http_client_rejects_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(404);
            })
            .await;

        let client = HttpDistClient::builder().build().unwrap();
        let err = client
            .fetch_bytes(&server.url("/missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, DistCheckError::Fetch(_)));
    }
}
