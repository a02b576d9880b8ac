use crate::collection_client::{CollectionClient, Envelope, UpdateRequest};
use crate::projection_cache::ProjectionCache;
use filter_query::CompiledQuery;
use poem::http::{header, StatusCode};
use poem::{
    handler,
    web::{Data, Json, Query},
    Request, Response,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    success: bool,
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct DocIdParams {
    pub doc_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocIdList {
    pub doc_id_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DocUpdateOneRequest {
    pub doc_id: String,
    pub set: Value,
}

#[derive(Debug, Deserialize)]
pub struct DocUpdateRequest {
    pub doc_id_list: Vec<String>,
    pub set: Value,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub projection: Option<String>,
    pub page_size: Option<i64>,
    pub page_num: Option<i64>,
}

/// Collects every occurrence of a repeated query parameter, percent-decoded
/// once. Filter expressions stay encoded one more level underneath; the
/// compiler performs its own decoding pass.
fn query_params(req: &Request, name: &str) -> Vec<String> {
    req.uri()
        .query()
        .unwrap_or_default()
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .filter(|(key, _)| *key == name)
        .map(|(_, value)| {
            let value = value.replace('+', " ");
            let bytes = urlencoding::decode_binary(value.as_bytes());
            String::from_utf8_lossy(&bytes).into_owned()
        })
        .collect()
}

/// Compiles the request's `query` expressions, turning a malformed
/// expression into a client error instead of a server fault.
fn compile_filter(req: &Request) -> Result<CompiledQuery, Response> {
    let expressions = query_params(req, "query");
    filter_query::compile(&expressions).map_err(|e| error_response(400, e.to_string()))
}

fn json_response(code: u16, body: &impl Serialize) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
}

/// The store's in-band `code` becomes the HTTP status of the response.
fn envelope_response(envelope: &Envelope) -> Response {
    json_response(envelope.code, envelope)
}

/// Successful single-document responses carry the document alone; anything
/// else returns the whole envelope.
fn doc_response(envelope: Envelope) -> Response {
    if envelope.code / 100 == 2 {
        if let Some(doc) = &envelope.doc {
            return json_response(envelope.code, doc);
        }
    }
    envelope_response(&envelope)
}

fn error_response(code: u16, message: String) -> Response {
    envelope_response(&Envelope::error(code, message))
}

fn bad_gateway(err: anyhow::Error) -> Response {
    tracing::error!("collection manager request failed: {:#}", err);
    error_response(502, err.to_string())
}

fn id_query(doc_id: &str) -> Value {
    serde_json::json!({ "_id": doc_id })
}

fn id_list_query(doc_id_list: &[String]) -> Value {
    serde_json::json!({ "_id": { "in": doc_id_list } })
}

#[handler]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        message: "Collection API gateway is running".to_string(),
    })
}

// ============ Insert ============

#[handler]
pub async fn insert_doc(
    client: Data<&Arc<CollectionClient>>,
    Json(doc): Json<Value>,
) -> Response {
    match client.insert_one(doc).await {
        Ok(envelope) => envelope_response(&envelope),
        Err(e) => bad_gateway(e),
    }
}

#[handler]
pub async fn insert_doc_list(
    client: Data<&Arc<CollectionClient>>,
    Json(doc_list): Json<Vec<Value>>,
) -> Response {
    match client.insert_many(doc_list).await {
        Ok(envelope) => envelope_response(&envelope),
        Err(e) => bad_gateway(e),
    }
}

// ============ Read ============

#[handler]
pub async fn get_doc(
    client: Data<&Arc<CollectionClient>>,
    Query(params): Query<DocIdParams>,
) -> Response {
    match client.get_one(&params.doc_id).await {
        Ok(envelope) => doc_response(envelope),
        Err(e) => bad_gateway(e),
    }
}

#[handler]
pub async fn get_doc_list(
    req: &Request,
    client: Data<&Arc<CollectionClient>>,
    projections: Data<&Arc<ProjectionCache>>,
    Query(params): Query<ListParams>,
) -> Response {
    let filter = match compile_filter(req) {
        Ok(filter) => filter,
        Err(resp) => return resp,
    };

    let projection = match params.projection.as_deref() {
        Some(name) => match projections.get(name) {
            Some(projection) => Some(projection),
            None => return error_response(400, format!("unknown projection model: {}", name)),
        },
        None => None,
    };

    let sort = query_params(req, "sort");

    match client
        .get_many(
            &filter,
            projection.as_ref(),
            &sort,
            params.page_size,
            params.page_num,
        )
        .await
    {
        Ok(envelope) => envelope_response(&envelope),
        Err(e) => bad_gateway(e),
    }
}

#[handler]
pub async fn get_doc_tag(req: &Request, client: Data<&Arc<CollectionClient>>) -> Response {
    let fields = query_params(req, "fields");
    if fields.is_empty() {
        return error_response(400, "at least one fields parameter is required".to_string());
    }

    let filter = match compile_filter(req) {
        Ok(filter) => filter,
        Err(resp) => return resp,
    };

    match client.get_tag(&fields, &filter).await {
        Ok(envelope) => doc_response(envelope),
        Err(e) => bad_gateway(e),
    }
}

// ============ Update ============

#[handler]
pub async fn update_doc(
    client: Data<&Arc<CollectionClient>>,
    Json(req_body): Json<DocUpdateOneRequest>,
) -> Response {
    match client.update_one(id_query(&req_body.doc_id), req_body.set).await {
        Ok(envelope) => envelope_response(&envelope),
        Err(e) => bad_gateway(e),
    }
}

#[handler]
pub async fn update_doc_many(
    client: Data<&Arc<CollectionClient>>,
    Json(req_body): Json<DocUpdateRequest>,
) -> Response {
    let update_req_list = vec![UpdateRequest {
        query: id_list_query(&req_body.doc_id_list),
        set: req_body.set,
    }];

    match client.update_many(update_req_list).await {
        Ok(envelope) => envelope_response(&envelope),
        Err(e) => bad_gateway(e),
    }
}

// ============ Delete ============

#[handler]
pub async fn delete_doc(
    client: Data<&Arc<CollectionClient>>,
    Query(params): Query<DocIdParams>,
) -> Response {
    match client.delete_one(id_query(&params.doc_id)).await {
        Ok(envelope) => envelope_response(&envelope),
        Err(e) => bad_gateway(e),
    }
}

#[handler]
pub async fn delete_doc_many(
    client: Data<&Arc<CollectionClient>>,
    Json(req_body): Json<DocIdList>,
) -> Response {
    match client.delete_many(id_list_query(&req_body.doc_id_list)).await {
        Ok(envelope) => envelope_response(&envelope),
        Err(e) => bad_gateway(e),
    }
}
