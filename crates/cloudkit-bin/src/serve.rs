use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    body::Bytes,
    extract::{OriginalUri, RawQuery, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response as AxumResponse},
    routing::any,
};
use cloudkit::{RequestOptions, StoreEngine, implementations::postgres::PostgresBackend};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

const REMOTE_USER_HEADER: &str = "x-remote-user";

#[derive(Clone)]
struct AppState {
    engine: Arc<StoreEngine<PostgresBackend>>,
}

/// Builds the router and serves it on `bind_addr` until the process receives a
/// shutdown signal.
pub(crate) async fn serve_default(
    bind_addr: std::net::SocketAddr,
    engine: StoreEngine<PostgresBackend>,
) -> anyhow::Result<()> {
    let state = AppState { engine: Arc::new(engine) };
    let router = Router::new()
        .fallback(any(dispatch))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind to address: {bind_addr}"))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with an error")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

fn request_options(headers: &HeaderMap, query: Option<&str>, body: &str) -> RequestOptions {
    let mut options = RequestOptions::default();

    options.remote_user = headers
        .get(REMOTE_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    options.etag = headers
        .get(axum::http::header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_matches('"').to_string());

    if !body.is_empty() {
        options.json = Some(body.to_string());
    }

    for (key, value) in form_urlencoded_pairs(query.unwrap_or_default()) {
        match key.as_str() {
            "limit" => options.limit = value.parse().ok(),
            "offset" => options.offset = value.parse().ok(),
            "remote_user" if options.remote_user.is_none() => options.remote_user = Some(value),
            _ => {
                options.filters.insert(key, value);
            }
        }
    }

    options
}

fn form_urlencoded_pairs(query: &str) -> impl Iterator<Item = (String, String)> + '_ {
    query.split('&').filter(|pair| !pair.is_empty()).filter_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        let value = parts.next().unwrap_or_default();
        Some((urlencoding_decode(key), urlencoding_decode(value)))
    })
}

fn urlencoding_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(&s.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> AxumResponse {
    let path = uri.path();
    let body = String::from_utf8_lossy(&body).into_owned();
    let options = request_options(&headers, query.as_deref(), &body);

    tracing::info!(method = %method, uri = %path, "handling request");

    let result = match method {
        Method::GET => state.engine.get(path, &options).await,
        Method::HEAD => state.engine.head(path, &options).await,
        Method::PUT => state.engine.put(path, &options).await,
        Method::POST => state.engine.post(path, &options).await,
        Method::DELETE => state.engine.delete(path, &options).await,
        Method::OPTIONS => Ok(state.engine.options(path)),
        _ => Err(cloudkit::StoreError::method_not_allowed(vec![])),
    };

    match result {
        Ok(response) => store_response_into_axum(response),
        Err(error) => {
            tracing::warn!(error = %error, uri = %path, "request failed");
            store_response_into_axum(error.to_response())
        }
    }
}

fn store_response_into_axum(response: cloudkit::Response) -> AxumResponse {
    let (status, headers, content) = response.to_parts();
    let mut builder = AxumResponse::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR));
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder.body(axum::body::Body::from(content)).unwrap_or_else(|_| {
        (StatusCode::INTERNAL_SERVER_ERROR, "failed to build response").into_response()
    })
}
