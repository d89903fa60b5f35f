use std::sync::Arc;

use futures::{AsyncReadExt, FutureExt, future::BoxFuture};
use http_client::{AsyncBody, HttpClient, HttpRequestExt, RedirectPolicy};

pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_excerpt(&self) -> String {
        String::from_utf8_lossy(&self.body)
            .chars()
            .take(200)
            .collect()
    }
}

/// A single HTTP GET. Implementations never retry; the fetcher owns the
/// fallback policy.
pub trait Transport: Send + Sync {
    fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> BoxFuture<'static, Result<TransportResponse, String>>;
}

pub struct HttpTransport {
    http_client: Arc<dyn HttpClient>,
}

impl HttpTransport {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self { http_client }
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self, String> {
        let client = reqwest_client::ReqwestClient::user_agent(user_agent)
            .map_err(|error| format!("Failed to build HTTP client: {error}"))?;
        Ok(Self::new(Arc::new(client)))
    }
}

impl Transport for HttpTransport {
    fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> BoxFuture<'static, Result<TransportResponse, String>> {
        let mut builder =
            http_client::Request::get(url).follow_redirects(RedirectPolicy::FollowAll);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = builder.body(AsyncBody::empty());
        let http_client = self.http_client.clone();

        async move {
            let request = request.map_err(|error| format!("Failed to build request: {error}"))?;
            let mut response = http_client
                .send(request)
                .await
                .map_err(|error| format!("HTTP request failed: {error}"))?;

            let status = response.status().as_u16();
            let mut body = Vec::new();
            response
                .body_mut()
                .read_to_end(&mut body)
                .await
                .map_err(|error| format!("Failed to read response body: {error}"))?;

            Ok(TransportResponse { status, body })
        }
        .boxed()
    }
}

#[cfg(test)]
pub mod fake {
    use std::sync::Mutex;

    use super::*;

    #[derive(Clone)]
    pub enum FakeReply {
        Status(u16, String),
        Error(String),
        Hang,
    }

    /// Scripted transport: the first route whose prefix matches the URL
    /// answers. Every call is recorded.
    #[derive(Default)]
    pub struct FakeTransport {
        routes: Vec<(String, FakeReply)>,
        calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(mut self, prefix: &str, reply: FakeReply) -> Self {
            self.routes.push((prefix.into(), reply));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls
                .lock()
                .map(|calls| calls.iter().map(|(url, _)| url.clone()).collect())
                .unwrap_or_default()
        }

        pub fn headers_of_call(&self, index: usize) -> Vec<(String, String)> {
            self.calls
                .lock()
                .ok()
                .and_then(|calls| calls.get(index).map(|(_, headers)| headers.clone()))
                .unwrap_or_default()
        }
    }

    impl Transport for FakeTransport {
        fn get(
            &self,
            url: &str,
            headers: &[(String, String)],
        ) -> BoxFuture<'static, Result<TransportResponse, String>> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((url.to_string(), headers.to_vec()));
            }
            let reply = self
                .routes
                .iter()
                .find(|(prefix, _)| url.starts_with(prefix.as_str()))
                .map(|(_, reply)| reply.clone())
                .unwrap_or_else(|| FakeReply::Error(format!("no route for {url}")));

            match reply {
                FakeReply::Status(status, body) => futures::future::ready(Ok(TransportResponse {
                    status,
                    body: body.into_bytes(),
                }))
                .boxed(),
                FakeReply::Error(message) => futures::future::ready(Err(message)).boxed(),
                FakeReply::Hang => futures::future::pending().boxed(),
            }
        }
    }
}
