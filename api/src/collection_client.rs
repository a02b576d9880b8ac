use anyhow::{Context, Result};
use filter_query::CompiledQuery;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client for the external collection-manager service.
///
/// Every storage operation is an RPC-over-HTTP call: `POST {base}/<method>`
/// with a JSON body. The service answers 200 with a result envelope whose
/// `code` carries the operation outcome; any other HTTP status is an
/// infrastructure failure.
pub struct CollectionClient {
    base_url: String,
    client: reqwest::Client,
}

/// Result envelope returned by every collection-manager operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_list: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Envelope {
    /// Envelope for errors raised by the gateway itself, so clients see one
    /// response shape regardless of where the failure happened.
    pub fn error(code: u16, message: String) -> Self {
        Self {
            code,
            doc: None,
            doc_list: None,
            total_count: None,
            count: None,
            message: Some(message),
        }
    }
}

/// One entry of an `update_many` request.
#[derive(Debug, Serialize)]
pub struct UpdateRequest {
    pub query: Value,
    pub set: Value,
}

impl CollectionClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, method: &str, body: Value) -> Result<Envelope> {
        let url = format!("{}/{}", self.base_url, method);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to collection manager", method))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Collection manager error ({}): {}",
                status,
                body
            ));
        }

        response
            .json::<Envelope>()
            .await
            .with_context(|| format!("Failed to parse {} response envelope", method))
    }

    pub async fn insert_one(&self, doc: Value) -> Result<Envelope> {
        self.call("insert_one", serde_json::json!({ "doc": doc }))
            .await
    }

    pub async fn insert_many(&self, doc_list: Vec<Value>) -> Result<Envelope> {
        self.call("insert_many", serde_json::json!({ "doc_list": doc_list }))
            .await
    }

    pub async fn get_one(&self, doc_id: &str) -> Result<Envelope> {
        self.call("get_one", serde_json::json!({ "doc_id": doc_id }))
            .await
    }

    /// Runs a filtered, sorted, paginated listing. The compiled filter
    /// document is embedded opaquely; the client never interprets it.
    pub async fn get_many(
        &self,
        query: &CompiledQuery,
        projection: Option<&Value>,
        sort: &[String],
        page_size: Option<i64>,
        page_num: Option<i64>,
    ) -> Result<Envelope> {
        self.call(
            "get_many",
            serde_json::json!({
                "query": query,
                "projection": projection,
                "sort": sort,
                "page_size": page_size,
                "page_num": page_num,
            }),
        )
        .await
    }

    /// Fetches distinct values of the given fields among documents matching
    /// the filter.
    pub async fn get_tag(&self, field_list: &[String], query: &CompiledQuery) -> Result<Envelope> {
        self.call(
            "get_tag",
            serde_json::json!({ "field_list": field_list, "query": query }),
        )
        .await
    }

    pub async fn update_one(&self, query: Value, set: Value) -> Result<Envelope> {
        self.call("update_one", serde_json::json!({ "query": query, "set": set }))
            .await
    }

    pub async fn update_many(&self, update_req_list: Vec<UpdateRequest>) -> Result<Envelope> {
        self.call(
            "update_many",
            serde_json::json!({ "update_req_list": update_req_list }),
        )
        .await
    }

    pub async fn delete_one(&self, query: Value) -> Result<Envelope> {
        self.call("delete_one", serde_json::json!({ "query": query }))
            .await
    }

    pub async fn delete_many(&self, query: Value) -> Result<Envelope> {
        self.call("delete_many", serde_json::json!({ "query": query }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_one_returns_envelope() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("POST", "/insert_one")
            .match_body(mockito::Matcher::JsonString(
                r#"{"doc":{"name":"widget"}}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code": 201, "doc_id": "abc123", "doc": {"_id": "abc123"}}"#)
            .create_async()
            .await;

        let client = CollectionClient::new(&server.url());
        let envelope = client
            .insert_one(serde_json::json!({"name": "widget"}))
            .await
            .unwrap();

        assert_eq!(envelope.code, 201);
        assert_eq!(
            envelope.doc,
            Some(serde_json::json!({"_id": "abc123"}))
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_many_passes_filter_through() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("POST", "/get_many")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"query": {"age": {"gte": 18.0, "lte": 65.0}}, "page_size": 20, "page_num": 1}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code": 200, "doc_list": [], "total_count": 0}"#)
            .create_async()
            .await;

        let client = CollectionClient::new(&server.url());
        let filter = filter_query::compile(["age>=18", "age<=65"]).unwrap();
        let envelope = client
            .get_many(&filter, None, &[], Some(20), Some(1))
            .await
            .unwrap();

        assert_eq!(envelope.code, 200);
        assert_eq!(envelope.total_count, Some(0));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_in_band_error_code_is_passed_through() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("POST", "/get_one")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code": 404, "message": "document not found"}"#)
            .create_async()
            .await;

        let client = CollectionClient::new(&server.url());
        let envelope = client.get_one("missing").await.unwrap();

        assert_eq!(envelope.code, 404);
        assert_eq!(envelope.message, Some("document not found".to_string()));
    }

    #[tokio::test]
    async fn test_transport_failure_is_an_error() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("POST", "/delete_one")
            .with_status(503)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        let client = CollectionClient::new(&server.url());
        let err = client
            .delete_one(serde_json::json!({"_id": "abc"}))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = CollectionClient::new("http://localhost:9000/");
        assert_eq!(client.base_url, "http://localhost:9000");
    }
}
