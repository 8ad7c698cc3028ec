use actix_cors::Cors;
use actix_web::http::{Method, header};
use actix_web::{HttpRequest, HttpResponse, web};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::classifier::classify_value;
use crate::config::ServerConfig;
use crate::error::{FieldError, GatewayError};
use crate::executor::Executor;
use crate::normalizer::QueryData;

pub struct AppState {
    pub executor: Executor,
}

impl AppState {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }
}

/// Request body for `/api/query/execute`.
///
/// Fields are kept as raw JSON so a wrongly typed `query` can be reported as
/// invalid input instead of a deserialization failure.
#[derive(Debug, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: Option<JsonValue>,
    #[serde(default, rename = "assignmentId")]
    pub assignment_id: Option<JsonValue>,
}

impl QueryRequest {
    /// Structural checks on the body, returning the submitted statement value.
    pub fn validate(&self) -> Result<&JsonValue, GatewayError> {
        let mut errors = Vec::new();

        let query = match &self.query {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(sql)) if sql.is_empty() => None,
            Some(value) => Some(value),
        };
        if query.is_none() {
            errors.push(FieldError::new("query", "Query is required"));
        }

        if let Some(id) = &self.assignment_id {
            if !id.is_string() && !id.is_null() {
                errors.push(FieldError::new("assignmentId", "assignmentId must be a string"));
            }
        }

        match query {
            Some(value) if errors.is_empty() => Ok(value),
            _ => Err(GatewayError::Validation(errors)),
        }
    }

    pub fn assignment_id(&self) -> Option<&str> {
        self.assignment_id.as_ref().and_then(JsonValue::as_str)
    }
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    pub data: QueryData,
}

pub async fn execute_handler(
    state: web::Data<AppState>,
    body: web::Json<QueryRequest>,
) -> Result<HttpResponse, GatewayError> {
    let request = body.into_inner();
    let raw = request.validate()?;
    let statement = classify_value(raw)?;

    if let Some(assignment_id) = request.assignment_id() {
        debug!("Executing query for assignment {}", assignment_id);
    }

    let data = state.executor.execute(statement).await?;

    Ok(HttpResponse::Ok().json(QueryResponse {
        success: true,
        data,
    }))
}

pub async fn health_handler() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "message": "Query gateway is running"
    }))
}

/// JSON extractor settings: body limit, and malformed bodies reported in the
/// gateway's own error shape.
pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(|err, _req: &HttpRequest| {
            debug!("Rejected request body: {}", err);
            GatewayError::MalformedBody(err.to_string()).into()
        })
}

/// Cross-origin policy for browser clients. An empty origin list admits any
/// origin.
pub fn cors(config: &ServerConfig) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods([Method::GET, Method::POST])
        .allowed_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(3600);

    if config.cors_origins.is_empty() {
        cors = cors.allow_any_origin();
        debug!("CORS: allowing any origin");
    } else {
        for origin in &config.cors_origins {
            cors = cors.allowed_origin(origin);
        }
        debug!("CORS: allowed origins {:?}", config.cors_origins);
    }

    cors
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health_handler))
            .route("/query/execute", web::post().to(execute_handler)),
    );
}
