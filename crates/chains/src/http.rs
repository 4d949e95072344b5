//! Shared HTTP plumbing. Every explorer and RPC call in the crate goes through
//! one `HttpClient` so the request timeout is applied uniformly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AdapterError, AdapterResult};

const USER_AGENT: &str = concat!("donation-watch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a, P> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: P,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcErrorBody {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl JsonRpcResponse {
    /// Converts the envelope into `T`. A `null` result only deserializes into
    /// types that accept it, such as `Option<_>`.
    pub fn into_result<T: DeserializeOwned>(self) -> AdapterResult<T> {
        if let Some(error) = self.error {
            if error.code == 429 || error.message.to_ascii_lowercase().contains("rate limit") {
                return Err(AdapterError::RateLimited);
            }
            return Err(AdapterError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(serde_json::from_value(self.result)?)
    }
}

#[derive(Debug)]
pub struct HttpClient {
    inner: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> AdapterResult<Self> {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| AdapterError::Transport(err.to_string()))?;
        Ok(Self {
            inner,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.inner.get(url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.inner.post(url)
    }

    /// Sends the request and decodes a JSON body, mapping non-success statuses
    /// onto `AdapterError`.
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> AdapterResult<T> {
        let response = request.send().await?;
        let status = response.status();
        check_status(status)?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(AdapterError::from)
    }

    /// Like `send_json` but treats 400 and 404 as "not found".
    pub async fn send_json_opt<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> AdapterResult<Option<T>> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            return Ok(None);
        }
        check_status(status)?;
        let bytes = response.bytes().await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> AdapterResult<T> {
        self.send_json(self.get(url)).await
    }

    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> AdapterResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(self.post(url).json(body)).await
    }

    /// Performs a JSON-RPC 2.0 call.
    pub async fn json_rpc<P, T>(&self, url: &str, method: &str, params: P) -> AdapterResult<T>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let response: JsonRpcResponse = self.post_json(url, &request).await?;
        response.into_result()
    }
}

fn check_status(status: StatusCode) -> AdapterResult<()> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(AdapterError::RateLimited);
    }
    if !status.is_success() {
        return Err(AdapterError::Status(status.as_u16()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client() -> HttpClient {
        HttpClient::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn json_rpc_unwraps_result() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_blockNumber"})))
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#)
            .create_async()
            .await;

        let height: String = client()
            .json_rpc(&server.url(), "eth_blockNumber", json!([]))
            .await
            .unwrap();
        assert_eq!(height, "0x10");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn json_rpc_null_result_is_none() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
            .create_async()
            .await;

        let tx: Option<Value> = client()
            .json_rpc(&server.url(), "eth_getTransactionByHash", json!(["0x1"]))
            .await
            .unwrap();
        assert!(tx.is_none());
    }

    #[tokio::test]
    async fn json_rpc_error_is_reported() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"header not found"}}"#)
            .create_async()
            .await;

        let err = client()
            .json_rpc::<_, String>(&server.url(), "eth_blockNumber", json!([]))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AdapterError::Rpc {
                code: -32000,
                message: "header not found".into()
            }
        );
        assert!(err.is_provider_failure());
    }

    #[tokio::test]
    async fn statuses_map_to_errors() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/limited")
            .with_status(429)
            .create_async()
            .await;
        server
            .mock("GET", "/broken")
            .with_status(503)
            .create_async()
            .await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let http = client();
        let limited = http
            .get_json::<Value>(&format!("{}/limited", server.url()))
            .await
            .unwrap_err();
        assert_eq!(limited, AdapterError::RateLimited);

        let broken = http
            .get_json::<Value>(&format!("{}/broken", server.url()))
            .await
            .unwrap_err();
        assert_eq!(broken, AdapterError::Status(503));

        let missing: Option<Value> = http
            .send_json_opt(http.get(&format!("{}/missing", server.url())))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_failure() {
        let err = client()
            .get_json::<Value>("http://127.0.0.1:9/unreachable")
            .await
            .unwrap_err();
        assert!(err.is_provider_failure());
    }
}
