use crate::api::AppState;
use crate::error::AppError;
use crate::middleware::error::success_response;
use crate::services::payment_orchestrator::{
    InitiatePaymentRequest, RefundPaymentRequest, RequestContext, VerifyPaymentRequest,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

/// Attaches the request id so it shows up in the error body
fn tagged(err: AppError, ctx: &RequestContext) -> AppError {
    match ctx.request_id.as_deref() {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

fn parse_payment_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::validation("id", "must be a UUID"))
}

/// POST /payment/initiate
pub async fn initiate_payment(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Response, AppError> {
    info!(
        booking_id = ?request.booking_id,
        gateway = ?request.gateway,
        amount = %request.amount,
        "payment initiation requested"
    );

    let payment = state
        .orchestrator
        .initiate_payment(request, &ctx)
        .await
        .map_err(|e| tagged(e, &ctx))?;

    let status = if payment.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, success_response(payment)).into_response())
}

/// POST /payment/initiate/async
pub async fn initiate_payment_async(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Response, AppError> {
    let queued = state
        .intake
        .enqueue(request, ctx.clone())
        .map_err(|e| tagged(e.into(), &ctx))?;
    Ok((StatusCode::ACCEPTED, success_response(queued)).into_response())
}

/// POST /payment/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<Response, AppError> {
    let verified = state
        .orchestrator
        .verify_payment(request, &ctx)
        .await
        .map_err(|e| tagged(e, &ctx))?;
    Ok(success_response(verified).into_response())
}

/// GET /payment/{id}
pub async fn payment_status(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let payment_id = parse_payment_id(&id).map_err(|e| tagged(e, &ctx))?;
    let view = state
        .orchestrator
        .get_payment_status(payment_id)
        .await
        .map_err(|e| tagged(e, &ctx))?;
    Ok(success_response(view).into_response())
}

/// GET /payment/booking/{booking_id}
pub async fn payments_for_booking(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(booking_id): Path<String>,
) -> Result<Response, AppError> {
    let payments = state
        .orchestrator
        .get_payments_for_booking(&booking_id)
        .await
        .map_err(|e| tagged(e, &ctx))?;
    Ok(success_response(payments).into_response())
}

/// POST /payment/{id}/refund
pub async fn refund_payment(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    body: Option<Json<RefundPaymentRequest>>,
) -> Result<Response, AppError> {
    let payment_id = parse_payment_id(&id).map_err(|e| tagged(e, &ctx))?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let result = state
        .orchestrator
        .initiate_refund(payment_id, request, &ctx)
        .await
        .map_err(|e| tagged(e, &ctx))?;
    Ok(success_response(result).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SelectGatewayQuery {
    pub country: Option<String>,
    pub currency: Option<String>,
    pub amount: Option<String>,
}

/// GET /payment/gateways/select?country=&currency=&amount=
pub async fn select_gateway(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<SelectGatewayQuery>,
) -> Result<Response, AppError> {
    let country = query.country.unwrap_or_default();
    let currency = query.currency.unwrap_or_default();
    let amount = match query.amount.as_deref() {
        Some(raw) => BigDecimal::from_str(raw.trim())
            .map_err(|_| tagged(AppError::validation("amount", "must be a decimal"), &ctx))?,
        None => return Err(tagged(AppError::validation("amount", "is required"), &ctx)),
    };

    let selection = state
        .orchestrator
        .select_gateway_for_region(&country, &currency, &amount)
        .map_err(|e| tagged(e, &ctx))?;
    Ok(success_response(selection).into_response())
}
