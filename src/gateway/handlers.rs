//! HTTP handlers. They only negotiate languages and shape responses; every
//! lookup goes through the orchestrator.

use crate::caching::key_generator::normalize_lang;
use crate::caching::{CacheKey, OutputMode};
use crate::core::error::{ServiceError, ServiceResult};
use crate::gateway::AppState;
use crate::origin::{parse_accept_language, parse_language_tags, pick_language, upstream_spelling};
use crate::webhook::{self, RebuildSummary, SIGNATURE_HEADER};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{debug, info, warn};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Debug, Default, Deserialize)]
pub struct TranslationsQuery {
    pub nested: Option<String>,
}

pub async fn healthz() -> &'static str {
    "ok"
}

/// Verify the signature, then rebuild the whole project. A body that cannot be
/// read (including one past the body limit) cannot be verified and answers 401.
pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> ServiceResult<Json<RebuildSummary>> {
    let body = body.map_err(|rejection| {
        warn!(status = %rejection.status(), error = %rejection, "webhook body unreadable");
        ServiceError::auth(rejection.body_text())
    })?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    state.verifier.authenticate(signature, &body)?;

    info!(app = %state.app_key, "webhook accepted, rebuilding");
    let summary = webhook::rebuild(&state.orchestrator, &state.app_key).await;
    Ok(Json(summary))
}

pub async fn languages(State(state): State<AppState>) -> Response {
    let payload = state
        .orchestrator
        .get(&CacheKey::languages(state.app_key.as_str()))
        .await;
    json_response(StatusCode::OK, payload, None)
}

pub async fn translations(
    State(state): State<AppState>,
    Path(lang): Path<String>,
    Query(query): Query<TranslationsQuery>,
    headers: HeaderMap,
) -> Response {
    let mode = OutputMode::from_nested(query.nested.as_deref().and_then(parse_bool).unwrap_or(false));
    let target = negotiate(&state, Some(&lang), &headers).await;

    let resolved = state
        .orchestrator
        .get_translations(&state.app_key, &target, mode, &state.fallback_language)
        .await;
    json_response(StatusCode::OK, resolved.payload, Some(&resolved.lang))
}

/// Unknown paths answer 404 with the flat payload of the negotiated language
pub async fn not_found(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    let target = negotiate(&state, None, &headers).await;
    let resolved = state
        .orchestrator
        .get_translations(&state.app_key, &target, OutputMode::Flat, &state.fallback_language)
        .await;

    debug!(path = %uri.path(), lang = %resolved.lang, "unknown path");
    json_response(StatusCode::NOT_FOUND, resolved.payload, Some(&resolved.lang))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Requested tag when the project has it, else the best `Accept-Language`
/// match, else the fallback language. Returned in the project's own spelling
/// when the project lists it.
async fn negotiate(state: &AppState, requested: Option<&str>, headers: &HeaderMap) -> String {
    let languages = state
        .orchestrator
        .get(&CacheKey::languages(state.app_key.as_str()))
        .await;
    let listed = parse_language_tags(&languages).unwrap_or_default();
    let available: Vec<String> = listed.iter().map(|tag| normalize_lang(tag)).collect();
    let preferred = headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|value| value.to_str().ok())
        .map(parse_accept_language)
        .unwrap_or_default();

    let target = resolve_target(requested, &preferred, &available, &state.fallback_language);
    upstream_spelling(&listed, &target)
        .map(str::to_string)
        .unwrap_or(target)
}

pub(crate) fn resolve_target(
    requested: Option<&str>,
    preferred: &[String],
    available: &[String],
    fallback: &str,
) -> String {
    let requested = requested.map(normalize_lang).unwrap_or_default();
    if !requested.is_empty() && available.contains(&requested) {
        return requested;
    }

    let target = pick_language(preferred, available)
        .unwrap_or_else(|| normalize_lang(fallback));
    debug!(requested = %requested, target = %target, available = ?available, "language negotiated");
    target
}

/// Boolean query values in the forms `1`, `t`, `true` and `0`, `f`, `false`
pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn json_response(status: StatusCode, payload: Bytes, lang: Option<&str>) -> Response {
    let mut response = (status, payload).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    if let Some(value) = lang.and_then(|lang| HeaderValue::from_str(lang).ok()) {
        headers.insert(header::CONTENT_LANGUAGE, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn test_requested_language_wins_when_available() {
        let available = tags(&["en", "de"]);
        assert_eq!(resolve_target(Some("DE"), &tags(&["en"]), &available, "en"), "de");
    }

    #[test]
    fn test_unavailable_language_uses_accept_language() {
        let available = tags(&["en", "pt"]);
        assert_eq!(resolve_target(Some("fr"), &tags(&["pt-br"]), &available, "en"), "pt");
        assert_eq!(resolve_target(None, &tags(&["pt"]), &available, "en"), "pt");
    }

    #[test]
    fn test_fallback_language_is_last_resort() {
        assert_eq!(resolve_target(Some("fr"), &[], &tags(&["de"]), "EN"), "en");
        assert_eq!(resolve_target(Some("de"), &[], &[], "en"), "en");
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("F"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }
}
