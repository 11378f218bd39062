use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{Extension, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::Serialize;
use tenantgate_core::{
    CompletedOperation, Outcome, ResolutionResult, ResolveRequest, SharedResolver, TenantRecord,
    UsageGate, telemetry_metadata,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

pub const TENANT_OVERRIDE_HEADER: &str = "x-tenant-override";

const BODY_CHANNEL_CAPACITY: usize = 32;

/// Body of every resolution failure, whatever the cause.
pub const NOT_FOUND_BODY: &str = r#"{"error":"not_found"}"#;

#[derive(Clone)]
pub struct TenantState {
    pub resolver: SharedResolver,
    pub usage: UsageGate,
}

/// Request extension carrying the tenant the request was resolved to.
#[derive(Debug, Clone)]
pub struct ResolvedTenant(pub TenantRecord);

/// Response extension set by handlers that ran a billable operation.
///
/// `failure` pins the outcome when the handler already knows why the
/// operation did not succeed (for example an upstream timeout). Otherwise the
/// outcome is derived from the response status and `complete`. The outcome is
/// only decided once the response body has been fully handed on; a body that
/// errors or is dropped early counts as `StreamAborted`.
#[derive(Debug, Clone)]
pub struct UsageReport {
    pub model_identifier: String,
    pub input_units: i64,
    pub output_units: i64,
    pub complete: bool,
    pub failure: Option<Outcome>,
}

impl UsageReport {
    pub fn completed(model_identifier: impl Into<String>, input_units: i64, output_units: i64) -> Self {
        Self {
            model_identifier: model_identifier.into(),
            input_units,
            output_units,
            complete: true,
            failure: None,
        }
    }
}

/// Wraps `app` so every request is resolved to a tenant first, and adds
/// `GET /_tenant`.
pub fn tenant_router(state: TenantState, app: Router) -> Router {
    app.route("/_tenant", get(current_tenant))
        .layer(middleware::from_fn_with_state(state, resolve_tenant))
}

async fn resolve_tenant(State(state): State<TenantState>, mut req: Request, next: Next) -> Response {
    let started = Instant::now();
    let resolved = {
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| req.uri().authority().map(|authority| authority.as_str()));
        let override_token = req
            .headers()
            .get(TENANT_OVERRIDE_HEADER)
            .and_then(|value| value.to_str().ok());
        state
            .resolver
            .resolve(&ResolveRequest {
                host,
                override_token,
            })
            .await
    };

    let tenant = match resolved {
        Ok(ResolutionResult::Resolved(tenant)) => tenant,
        Ok(ResolutionResult::NotFound) => {
            debug!(event = "tenant_not_found", path = %req.uri().path());
            return not_found();
        }
        Err(err) => {
            warn!(
                event = "tenant_resolution_failed",
                kind = err.kind(),
                error = %err
            );
            return not_found();
        }
    };

    req.extensions_mut().insert(ResolvedTenant(tenant.clone()));
    let mut response = next.run(req).await;

    match response.extensions_mut().remove::<UsageReport>() {
        Some(report) => observe_body(response, report, tenant, state.usage, started),
        None => response,
    }
}

/// Forwards the response body through a channel and settles usage once the
/// body ends. The gate runs before the final frame (or end of stream) reaches
/// the caller.
fn observe_body(
    response: Response,
    mut report: UsageReport,
    tenant: TenantRecord,
    usage: UsageGate,
    started: Instant,
) -> Response {
    let (parts, body) = response.into_parts();
    let status = parts.status;
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, axum::Error>>(BODY_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut stream = body.into_data_stream();
        let mut failed = None;
        let mut delivered = true;
        loop {
            let item = tokio::select! {
                item = stream.next() => item,
                _ = tx.closed() => {
                    delivered = false;
                    break;
                }
            };
            let Some(item) = item else {
                break;
            };
            match item {
                Ok(chunk) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        delivered = false;
                        break;
                    }
                }
                Err(err) => {
                    failed = Some(err);
                    break;
                }
            }
        }

        if failed.is_some() || !delivered {
            debug!(
                event = "response_body_aborted",
                tenant_id = %tenant.tenant_id,
                caller_gone = !delivered
            );
            report.complete = false;
        }
        let operation = CompletedOperation {
            outcome: classify_outcome(status, &report),
            model_identifier: report.model_identifier,
            input_units: report.input_units,
            output_units: report.output_units,
            latency: started.elapsed(),
        };
        usage.observe(&tenant, &operation);

        if let Some(err) = failed {
            let _ = tx.send(Err(err)).await;
        }
    });

    Response::from_parts(parts, Body::from_stream(ReceiverStream::new(rx)))
}

/// Maps the final response of an operation to its outcome.
pub fn classify_outcome(status: StatusCode, report: &UsageReport) -> Outcome {
    if let Some(failure) = report.failure {
        return failure;
    }
    if status.is_success() {
        return if report.complete {
            Outcome::Succeeded
        } else {
            Outcome::StreamAborted
        };
    }
    if status == StatusCode::GATEWAY_TIMEOUT || status == StatusCode::REQUEST_TIMEOUT {
        Outcome::Timeout
    } else if status == StatusCode::BAD_GATEWAY || status == StatusCode::SERVICE_UNAVAILABLE {
        Outcome::TransportFailure
    } else if status.is_client_error() {
        Outcome::Rejected
    } else {
        Outcome::InternalError
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "application/json")],
        NOT_FOUND_BODY,
    )
        .into_response()
}

#[derive(Serialize)]
struct TenantView {
    tenant_key: String,
    tier: String,
    #[serde(flatten)]
    metadata: std::collections::BTreeMap<&'static str, String>,
}

async fn current_tenant(Extension(ResolvedTenant(tenant)): Extension<ResolvedTenant>) -> Response {
    Json(TenantView {
        metadata: telemetry_metadata(&tenant),
        tenant_key: tenant.tenant_key,
        tier: tenant.tier,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(complete: bool) -> UsageReport {
        UsageReport {
            complete,
            ..UsageReport::completed("llama-3-8b", 1, 2)
        }
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_outcome(StatusCode::OK, &report(true)), Outcome::Succeeded);
        assert_eq!(classify_outcome(StatusCode::OK, &report(false)), Outcome::StreamAborted);
        assert_eq!(
            classify_outcome(StatusCode::GATEWAY_TIMEOUT, &report(true)),
            Outcome::Timeout
        );
        assert_eq!(
            classify_outcome(StatusCode::BAD_GATEWAY, &report(true)),
            Outcome::TransportFailure
        );
        assert_eq!(
            classify_outcome(StatusCode::UNPROCESSABLE_ENTITY, &report(true)),
            Outcome::Rejected
        );
        assert_eq!(
            classify_outcome(StatusCode::INTERNAL_SERVER_ERROR, &report(true)),
            Outcome::InternalError
        );
    }

    #[test]
    fn explicit_failure_wins_over_status() {
        let mut report = report(true);
        report.failure = Some(Outcome::Timeout);
        assert_eq!(classify_outcome(StatusCode::OK, &report), Outcome::Timeout);
    }
}
