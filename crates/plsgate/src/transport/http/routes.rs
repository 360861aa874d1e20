//! HTTP route handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version, header},
    response::{IntoResponse, Json, Response},
    routing::{any, get},
};
use futures::StreamExt;
use tokio_util::io::ReaderStream;

use crate::cgi::RequestInfo;
use crate::error::GatewayError;
use crate::response::{DEFAULT_CONTENT_TYPE, ResponseBody, ShapedResponse};
use crate::service::{GatewayService, HealthSnapshot, ProcedureRequest};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const PLAIN_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// How failed calls are rendered to the client.
#[derive(Debug, Clone)]
pub struct ErrorPages {
    /// Send the error message itself instead of the error page.
    pub show_errors: bool,
    pub error_page: String,
}

#[derive(Clone)]
struct AppState {
    service: Arc<GatewayService>,
    errors: Arc<ErrorPages>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthSnapshot> {
    Json(state.service.health())
}

/// Query pairs, then body pairs for urlencoded forms. Submission order kept.
fn form_params(query: Option<&str>, headers: &HeaderMap, body: &[u8]) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE))
        .unwrap_or(false);
    if is_form {
        params.extend(url::form_urlencoded::parse(body).into_owned());
    }
    params
}

#[allow(clippy::too_many_arguments)]
async fn call_procedure(
    State(state): State<AppState>,
    Path(procedure): Path<String>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = ProcedureRequest {
        params: form_params(uri.query(), &headers, &body),
        info: RequestInfo {
            method: method.to_string(),
            script_name: procedure.clone(),
            query: uri.query().map(str::to_string),
            headers,
            client_addr: client.ip(),
            protocol: format!("{version:?}"),
            scheme: uri.scheme_str().unwrap_or("http").to_string(),
        },
        procedure,
    };

    match state.service.call(request).await {
        Ok(shaped) => shaped_response(shaped),
        Err(e) => error_response(&state.errors, &e),
    }
}

fn shaped_response(shaped: ShapedResponse) -> Response {
    let ShapedResponse { head, body } = shaped;
    let has_body = !matches!(body, ResponseBody::Empty);
    let body = match body {
        ResponseBody::Empty => Body::empty(),
        ResponseBody::Bytes(bytes) => Body::from(bytes),
        ResponseBody::Spooled { prefix, file } => {
            let first = futures::stream::once(async move { Ok::<_, std::io::Error>(Bytes::from(prefix)) });
            let rest = ReaderStream::new(tokio::fs::File::from_std(file));
            Body::from_stream(first.chain(rest))
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::from_u16(head.status).unwrap_or_else(|_| {
        tracing::warn!(status = head.status, "Generated status out of range, using 200");
        StatusCode::OK
    });

    let headers = response.headers_mut();
    if has_body && let Ok(value) = HeaderValue::from_str(&head.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    for (name, value) in head.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping generated header that is not valid HTTP"),
        }
    }
    response
}

fn error_response(errors: &ErrorPages, err: &GatewayError) -> Response {
    let status = match err {
        GatewayError::Authorization { .. } => StatusCode::FORBIDDEN,
        GatewayError::PoolExhausted { .. } | GatewayError::PoolClosed => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "Procedure call failed");
    } else {
        tracing::warn!(status = status.as_u16(), error = %err, "Procedure call rejected");
    }

    if errors.show_errors {
        (status, [(header::CONTENT_TYPE, PLAIN_CONTENT_TYPE)], err.to_string()).into_response()
    } else {
        (
            status,
            [(header::CONTENT_TYPE, DEFAULT_CONTENT_TYPE)],
            errors.error_page.clone(),
        )
            .into_response()
    }
}

async fn not_found(uri: Uri) -> Response {
    tracing::debug!(path = %uri.path(), "No route for request");
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, DEFAULT_CONTENT_TYPE)],
        format!("Not Found: {}", uri.path()),
    )
        .into_response()
}

/// Routes for one DAD. `dad_path` is the normalised `/{prefix}/{dad}/`.
pub fn routes(service: Arc<GatewayService>, dad_path: &str, errors: ErrorPages) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route(&format!("{dad_path}{{procedure}}"), any(call_procedure))
        .fallback(not_found)
        .with_state(AppState {
            service,
            errors: Arc::new(errors),
        })
}
