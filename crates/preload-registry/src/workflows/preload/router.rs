use std::convert::Infallible;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::domain::{normalize_domain, DomainState};
use super::reconcile::UpdateError;
use super::repository::DomainStore;
use super::scanner::EligibilityScanner;
use super::service::PreloadRegistry;
use super::source::PreloadListSource;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json; charset=utf-8";

/// Router builder exposing the registry's HTTP surface.
pub fn registry_router<S, C, L>(registry: Arc<PreloadRegistry<S, C, L>>) -> Router
where
    S: DomainStore + 'static,
    C: EligibilityScanner + 'static,
    L: PreloadListSource + 'static,
{
    let mut router = Router::new()
        .route(
            "/preloadable",
            get(preloadable_handler::<S, C, L>).fallback(requires_get),
        )
        .route(
            "/removable",
            get(removable_handler::<S, C, L>).fallback(requires_get),
        )
        .route(
            "/status",
            get(status_handler::<S, C, L>).fallback(requires_get),
        )
        .route(
            "/submit",
            post(submit_handler::<S, C, L>).fallback(requires_post),
        )
        .route(
            "/remove",
            post(remove_handler::<S, C, L>).fallback(requires_post),
        )
        .route(
            "/pending",
            get(pending_handler::<S, C, L>).fallback(requires_get),
        )
        .route(
            "/pending-removal",
            get(pending_removal_handler::<S, C, L>).fallback(requires_get),
        )
        .route(
            "/pending-automated-removal",
            get(pending_automated_removal_handler::<S, C, L>).fallback(requires_get),
        )
        .route(
            "/update",
            get(update_handler::<S, C, L>).fallback(requires_get),
        );

    if registry.debug_endpoints() {
        router = router
            .route(
                "/debug/all-states",
                get(all_states_handler::<S, C, L>).fallback(requires_get),
            )
            .route(
                "/debug/set-preloaded",
                post(set_preloaded_handler::<S, C, L>).fallback(requires_post),
            );
    }

    router.with_state(registry)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DomainQuery {
    domain: Option<String>,
}

impl DomainQuery {
    fn normalized(&self) -> Result<String, Response> {
        let raw = self.domain.as_deref().unwrap_or_default();
        if raw.is_empty() {
            return Err(text_response(
                StatusCode::BAD_REQUEST,
                "Domain not specified.\n",
            ));
        }
        normalize_domain(raw).map_err(|err| {
            text_response(StatusCode::BAD_REQUEST, format!("Invalid domain. ({err})\n"))
        })
    }
}

pub(crate) fn text_response(status: StatusCode, body: impl Into<String>) -> Response {
    (status, [(header::CONTENT_TYPE, TEXT_PLAIN)], body.into()).into_response()
}

fn internal_error(err: impl fmt::Display) -> Response {
    text_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Internal error: {err}\n"),
    )
}

fn json_response<T: Serialize>(value: &T) -> Response {
    match serde_json::to_string_pretty(value) {
        Ok(mut body) => {
            body.push('\n');
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, APPLICATION_JSON)],
                body,
            )
                .into_response()
        }
        Err(err) => internal_error(format_args!("could not format JSON. ({err})")),
    }
}

/// One JSON value per line, the layout list maintainers paste from.
fn json_lines_response(lines: &[String]) -> Response {
    let mut body = String::from("[\n");
    for (index, line) in lines.iter().enumerate() {
        let comma = if index + 1 == lines.len() { "" } else { "," };
        let _ = writeln!(body, "    {line}{comma}");
    }
    body.push_str("]\n");
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, APPLICATION_JSON)],
        body,
    )
        .into_response()
}

fn quoted(name: &str) -> String {
    serde_json::Value::String(name.to_string()).to_string()
}

fn pending_line(state: &DomainState) -> String {
    format!(
        "{{ \"name\": {}, \"policy\": \"bulk-1-year\", \"mode\": \"force-https\", \"include_subdomains\": true }}",
        quoted(&state.name)
    )
}

fn wrong_method(required: Method) -> Response {
    text_response(
        StatusCode::METHOD_NOT_ALLOWED,
        format!("Wrong method. Requires {required}.\n"),
    )
}

async fn requires_get() -> Response {
    wrong_method(Method::GET)
}

async fn requires_post() -> Response {
    wrong_method(Method::POST)
}

pub(crate) async fn preloadable_handler<S, C, L>(
    State(registry): State<Arc<PreloadRegistry<S, C, L>>>,
    Query(query): Query<DomainQuery>,
) -> Response
where
    S: DomainStore + 'static,
    C: EligibilityScanner + 'static,
    L: PreloadListSource + 'static,
{
    let domain = match query.normalized() {
        Ok(domain) => domain,
        Err(response) => return response,
    };
    json_response(&registry.preloadable(&domain).await)
}

pub(crate) async fn removable_handler<S, C, L>(
    State(registry): State<Arc<PreloadRegistry<S, C, L>>>,
    Query(query): Query<DomainQuery>,
) -> Response
where
    S: DomainStore + 'static,
    C: EligibilityScanner + 'static,
    L: PreloadListSource + 'static,
{
    let domain = match query.normalized() {
        Ok(domain) => domain,
        Err(response) => return response,
    };
    match registry.removable(&domain).await {
        Ok(issues) => json_response(&issues),
        Err(err) => internal_error(err),
    }
}

pub(crate) async fn status_handler<S, C, L>(
    State(registry): State<Arc<PreloadRegistry<S, C, L>>>,
    Query(query): Query<DomainQuery>,
) -> Response
where
    S: DomainStore + 'static,
    C: EligibilityScanner + 'static,
    L: PreloadListSource + 'static,
{
    let domain = match query.normalized() {
        Ok(domain) => domain,
        Err(response) => return response,
    };
    match registry.status(&domain).await {
        Ok(view) => json_response(&view),
        Err(err) => internal_error(err),
    }
}

pub(crate) async fn submit_handler<S, C, L>(
    State(registry): State<Arc<PreloadRegistry<S, C, L>>>,
    Query(query): Query<DomainQuery>,
) -> Response
where
    S: DomainStore + 'static,
    C: EligibilityScanner + 'static,
    L: PreloadListSource + 'static,
{
    let domain = match query.normalized() {
        Ok(domain) => domain,
        Err(response) => return response,
    };
    match registry.submit(&domain).await {
        Ok(issues) => json_response(&issues),
        Err(err) => internal_error(err),
    }
}

pub(crate) async fn remove_handler<S, C, L>(
    State(registry): State<Arc<PreloadRegistry<S, C, L>>>,
    Query(query): Query<DomainQuery>,
) -> Response
where
    S: DomainStore + 'static,
    C: EligibilityScanner + 'static,
    L: PreloadListSource + 'static,
{
    let domain = match query.normalized() {
        Ok(domain) => domain,
        Err(response) => return response,
    };
    match registry.remove(&domain).await {
        Ok(issues) => json_response(&issues),
        Err(err) => internal_error(err),
    }
}

pub(crate) async fn pending_handler<S, C, L>(
    State(registry): State<Arc<PreloadRegistry<S, C, L>>>,
) -> Response
where
    S: DomainStore + 'static,
    C: EligibilityScanner + 'static,
    L: PreloadListSource + 'static,
{
    match registry.pending().await {
        Ok(states) => {
            let lines: Vec<String> = states.iter().map(pending_line).collect();
            json_lines_response(&lines)
        }
        Err(err) => internal_error(err),
    }
}

pub(crate) async fn pending_removal_handler<S, C, L>(
    State(registry): State<Arc<PreloadRegistry<S, C, L>>>,
) -> Response
where
    S: DomainStore + 'static,
    C: EligibilityScanner + 'static,
    L: PreloadListSource + 'static,
{
    match registry.pending_removal().await {
        Ok(names) => {
            let lines: Vec<String> = names.iter().map(|name| quoted(name)).collect();
            json_lines_response(&lines)
        }
        Err(err) => internal_error(err),
    }
}

pub(crate) async fn pending_automated_removal_handler<S, C, L>(
    State(registry): State<Arc<PreloadRegistry<S, C, L>>>,
) -> Response
where
    S: DomainStore + 'static,
    C: EligibilityScanner + 'static,
    L: PreloadListSource + 'static,
{
    match registry.pending_automated_removal().await {
        Ok(names) => {
            let lines: Vec<String> = names.iter().map(|name| quoted(name)).collect();
            json_lines_response(&lines)
        }
        Err(err) => internal_error(err),
    }
}

/// Streams reconciliation progress as plain text.
///
/// Failures before the first byte become a 500. Once the summary is out the
/// status is fixed, so later failures are appended to the body instead.
pub(crate) async fn update_handler<S, C, L>(
    State(registry): State<Arc<PreloadRegistry<S, C, L>>>,
) -> Response
where
    S: DomainStore + 'static,
    C: EligibilityScanner + 'static,
    L: PreloadListSource + 'static,
{
    let plan = match registry.plan_update().await {
        Ok(plan) => plan,
        Err(err) => return internal_error(err),
    };

    let (sender, receiver) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let mut progress = |args: fmt::Arguments<'_>| {
            let _ = sender.send(args.to_string());
        };
        plan.write_summary(&mut progress);
        let outcome = registry.apply_update(&plan, &mut progress).await;
        if let Err(
            err @ UpdateError::Write {
                progress_written: false,
                ..
            },
        ) = outcome
        {
            progress(format_args!("Internal error: {err}\n"));
        }
    });

    let body = futures::stream::unfold(receiver, |mut receiver| async move {
        receiver
            .recv()
            .await
            .map(|chunk| (Ok::<_, Infallible>(chunk), receiver))
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, TEXT_PLAIN)],
        Body::from_stream(body),
    )
        .into_response()
}

pub(crate) async fn all_states_handler<S, C, L>(
    State(registry): State<Arc<PreloadRegistry<S, C, L>>>,
) -> Response
where
    S: DomainStore + 'static,
    C: EligibilityScanner + 'static,
    L: PreloadListSource + 'static,
{
    match registry.all_states().await {
        Ok(states) => json_response(&states),
        Err(err) => internal_error(err),
    }
}

pub(crate) async fn set_preloaded_handler<S, C, L>(
    State(registry): State<Arc<PreloadRegistry<S, C, L>>>,
    Query(query): Query<DomainQuery>,
) -> Response
where
    S: DomainStore + 'static,
    C: EligibilityScanner + 'static,
    L: PreloadListSource + 'static,
{
    let domain = match query.normalized() {
        Ok(domain) => domain,
        Err(response) => return response,
    };
    json_response(&registry.set_preloaded(&domain).await)
}
