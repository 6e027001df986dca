//! Payment Orchestrator Service
//!
//! Coordinates gateway adapters, the payment store and the booking service for the
//! initiate, verify, status, refund and gateway-selection operations.

use crate::config::PaymentsConfig;
use crate::database::models::{
    GatewayLogEntry, NewPayment, PartyType, PaymentPurpose, PaymentRecord, PaymentStatus,
    RefundEntry,
};
use crate::database::repository::PaymentStore;
use crate::error::{AppError, AppResult, DomainError};
use crate::payments::factory::GatewayRegistry;
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    decimal_amount, CreateOrderRequest, CustomerDetails, GatewayName, Money, NormalizedStatus,
    RefundRequest, StatusQuery,
};
use crate::services::booking_client::BookingService;
use crate::services::notification::PaymentNotifier;
use crate::services::payment_state::{GatewayOutcome, PaymentReconciler, ReconcileOutcome};
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// Request / Response Types
// ============================================================================

/// Caller identity carried into every operation
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Bearer token forwarded to the booking service
    pub auth_token: Option<String>,
    pub actor: String,
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn system(actor: impl Into<String>) -> Self {
        Self {
            auth_token: None,
            actor: actor.into(),
            request_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatePaymentRequest {
    #[serde(default)]
    pub purpose: PaymentPurpose,
    pub booking_id: Option<String>,
    #[serde(with = "decimal_amount")]
    pub amount: BigDecimal,
    pub currency: Option<String>,
    /// Explicit gateway; otherwise chosen by region
    pub gateway: Option<String>,
    pub country: Option<String>,
    #[serde(default)]
    pub customer: CustomerDetails,
    pub payer_ref: Option<String>,
    pub payer_type: Option<PartyType>,
    pub receiver_ref: Option<String>,
    pub receiver_type: Option<PartyType>,
    pub return_url: Option<String>,
    pub notify_url: Option<String>,
    pub metadata: Option<JsonValue>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiatedPayment {
    pub payment_id: Uuid,
    pub order_ref: String,
    pub status: PaymentStatus,
    pub gateway: GatewayName,
    pub gateway_order_id: String,
    #[serde(with = "decimal_amount")]
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_link: Option<String>,
    pub checkout_token: Option<String>,
    pub checkout_key: Option<String>,
    /// True when an earlier request with the same idempotency key is returned
    pub replayed: bool,
}

impl InitiatedPayment {
    fn from_record(record: &PaymentRecord, checkout_key: Option<String>, replayed: bool) -> Self {
        Self {
            payment_id: record.id,
            order_ref: record.order_ref.clone(),
            status: record.status,
            gateway: record.gateway,
            gateway_order_id: record.gateway_order_id.clone(),
            amount: record.amount.clone(),
            currency: record.currency.clone(),
            payment_link: record.payment_link.clone(),
            checkout_token: record.checkout_token.clone(),
            checkout_key,
            replayed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPaymentRequest {
    pub gateway: Option<String>,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
    pub booking_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifiedPayment {
    pub payment: PaymentRecord,
    pub booking_updated: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefundPaymentRequest {
    #[serde(default, with = "decimal_amount::option")]
    pub amount: Option<BigDecimal>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundResult {
    pub payment: PaymentRecord,
    pub refund: RefundEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatusView {
    pub payment: PaymentRecord,
    /// `cache` for terminal records, `gateway` when the gateway was polled
    pub source: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewaySelection {
    pub gateway: GatewayName,
    pub priority: u32,
    pub candidates: Vec<GatewayName>,
}

// ============================================================================
// Main Payment Orchestrator
// ============================================================================

pub struct PaymentOrchestrator {
    gateways: Arc<GatewayRegistry>,
    store: Arc<dyn PaymentStore>,
    booking: Arc<dyn BookingService>,
    reconciler: PaymentReconciler,
    notifier: PaymentNotifier,
    config: PaymentsConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        gateways: Arc<GatewayRegistry>,
        store: Arc<dyn PaymentStore>,
        booking: Arc<dyn BookingService>,
        config: PaymentsConfig,
    ) -> Self {
        Self {
            reconciler: PaymentReconciler::new(store.clone()),
            notifier: PaymentNotifier::new(booking.clone()),
            gateways,
            store,
            booking,
            config,
        }
    }

    pub fn gateways(&self) -> &Arc<GatewayRegistry> {
        &self.gateways
    }

    pub fn store(&self) -> &Arc<dyn PaymentStore> {
        &self.store
    }

    pub fn reconciler(&self) -> &PaymentReconciler {
        &self.reconciler
    }

    pub fn notifier(&self) -> &PaymentNotifier {
        &self.notifier
    }

    // =========================================================================
    // Initiation
    // =========================================================================

    pub async fn initiate_payment(
        &self,
        request: InitiatePaymentRequest,
        ctx: &RequestContext,
    ) -> AppResult<InitiatedPayment> {
        let currency = request
            .currency
            .clone()
            .unwrap_or_else(|| self.config.default_currency.clone());
        let money = Money::new(request.amount.clone(), currency);
        money.validate_positive("amount")?;

        if let Some(key) = request.idempotency_key.as_deref() {
            if key.trim().is_empty() {
                return Err(AppError::validation("idempotency_key", "must not be blank"));
            }
            if let Some(existing) = self.store.find_by_idempotency_key(key).await? {
                info!(
                    payment_id = %existing.id,
                    idempotency_key = %key,
                    "returning payment for repeated idempotency key"
                );
                return Ok(self.replay(&existing));
            }
        }

        let booking_id = match (request.purpose, request.booking_id.as_deref()) {
            (PaymentPurpose::Booking, None) => {
                return Err(AppError::validation(
                    "booking_id",
                    "is required for booking payments",
                ))
            }
            (_, Some(id)) if id.trim().is_empty() => {
                return Err(AppError::validation("booking_id", "must not be blank"))
            }
            (_, id) => id.map(str::to_string),
        };

        if request.purpose == PaymentPurpose::Booking {
            if let Some(booking_id) = booking_id.as_deref() {
                self.check_booking_amount(booking_id, &money, ctx).await?;
            }
        }

        let gateway = self.choose_gateway(&request, &money)?;
        let order_ref = format!("pay_{}", Uuid::new_v4().simple());

        let order = gateway
            .create_order(CreateOrderRequest {
                order_ref: order_ref.clone(),
                amount: money.clone(),
                customer: request.customer.clone(),
                return_url: request.return_url.clone(),
                notify_url: request.notify_url.clone(),
                metadata: request.metadata.clone(),
            })
            .await?;

        let new_payment = NewPayment {
            order_ref: order_ref.clone(),
            purpose: request.purpose,
            booking_id,
            amount: money.amount.clone(),
            currency: money.currency.clone(),
            payer_ref: request.payer_ref.clone().or_else(|| request.customer.id.clone()),
            payer_type: request.payer_type,
            receiver_ref: request.receiver_ref.clone(),
            receiver_type: request.receiver_type,
            gateway: order.gateway,
            gateway_order_id: order.gateway_order_id.clone(),
            idempotency_key: request.idempotency_key.clone(),
            payment_link: order.payment_link.clone(),
            checkout_token: order.checkout_token.clone(),
            metadata: request.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
            created_by: ctx.actor.clone(),
        };
        let initial_entry = GatewayLogEntry::new(
            None,
            "order.created",
            NormalizedStatus::Pending,
            order.raw_response.clone(),
        );

        let record = match self.store.create_payment(new_payment, initial_entry).await {
            Ok((record, _)) => record,
            Err(e) if e.is_unique_violation() && request.idempotency_key.is_some() => {
                // A concurrent request with the same key won the insert.
                let key = request.idempotency_key.as_deref().unwrap_or_default();
                match self.store.find_by_idempotency_key(key).await? {
                    Some(existing) => return Ok(self.replay(&existing)),
                    None => return Err(e.into()),
                }
            }
            Err(e) => {
                error!(
                    order_ref = %order_ref,
                    gateway = %order.gateway,
                    gateway_order_id = %order.gateway_order_id,
                    error = %e,
                    "gateway order created but payment could not be stored"
                );
                return Err(e.into());
            }
        };

        info!(
            payment_id = %record.id,
            order_ref = %record.order_ref,
            booking_id = ?record.booking_id,
            gateway = %record.gateway,
            gateway_order_id = %record.gateway_order_id,
            amount = %record.amount,
            currency = %record.currency,
            "payment initiated"
        );

        Ok(InitiatedPayment::from_record(&record, order.checkout_key, false))
    }

    fn replay(&self, record: &PaymentRecord) -> InitiatedPayment {
        let checkout_key = self
            .gateways
            .get(record.gateway)
            .and_then(|g| checkout_key(g.as_ref()));
        InitiatedPayment::from_record(record, checkout_key, true)
    }

    async fn check_booking_amount(
        &self,
        booking_id: &str,
        money: &Money,
        ctx: &RequestContext,
    ) -> AppResult<()> {
        let booking = self
            .booking
            .get_booking(booking_id, ctx.auth_token.as_deref())
            .await?;

        if booking.total_amount != money.amount {
            warn!(
                booking_id = %booking_id,
                expected = %booking.total_amount,
                received = %money.amount,
                "payment amount does not match booking"
            );
            return Err(AppError::domain(DomainError::AmountMismatch {
                expected: booking.total_amount.to_string(),
                received: money.amount.to_string(),
            }));
        }
        if let Some(currency) = booking.currency.as_deref() {
            if !currency.eq_ignore_ascii_case(&money.currency) {
                return Err(AppError::validation(
                    "currency",
                    format!("booking is priced in {}", currency),
                ));
            }
        }
        Ok(())
    }

    fn choose_gateway(
        &self,
        request: &InitiatePaymentRequest,
        money: &Money,
    ) -> AppResult<Arc<dyn PaymentGateway>> {
        if let Some(name) = request.gateway.as_deref() {
            return self
                .gateways
                .resolve(name)
                .filter(|g| g.config().enabled)
                .ok_or_else(|| {
                    AppError::domain(DomainError::GatewayNotFound {
                        gateway: name.to_string(),
                    })
                });
        }

        let country = request
            .country
            .clone()
            .unwrap_or_else(|| self.config.default_region.clone());
        self.gateways
            .select_for_region(&country, &money.currency, &money.amount)
            .ok_or_else(|| {
                AppError::domain(DomainError::NoGatewayAvailable {
                    country,
                    currency: money.currency.clone(),
                    amount: money.amount.to_string(),
                })
            })
    }

    // =========================================================================
    // Verification
    // =========================================================================

    pub async fn verify_payment(
        &self,
        request: VerifyPaymentRequest,
        ctx: &RequestContext,
    ) -> AppResult<VerifiedPayment> {
        if request.gateway_order_id.trim().is_empty() {
            return Err(AppError::validation("gateway_order_id", "is required"));
        }
        if request.gateway_payment_id.trim().is_empty() {
            return Err(AppError::validation("gateway_payment_id", "is required"));
        }

        let record = self
            .find_by_gateway_order(request.gateway.as_deref(), &request.gateway_order_id)
            .await?;
        if let Some(booking_id) = request.booking_id.as_deref() {
            if record.booking_id.as_deref() != Some(booking_id) {
                return Err(AppError::validation(
                    "booking_id",
                    "does not belong to this payment",
                ));
            }
        }

        let gateway = self.adapter(record.gateway)?;
        if !gateway.verify_checkout_signature(
            &request.gateway_order_id,
            &request.gateway_payment_id,
            &request.signature,
        )? {
            warn!(
                payment_id = %record.id,
                gateway = %record.gateway,
                "checkout signature mismatch"
            );
            return Err(AppError::domain(DomainError::SignatureMismatch {
                context: format!("checkout signature for {}", request.gateway_order_id),
            }));
        }

        let details = gateway
            .fetch_status(StatusQuery {
                gateway_order_id: Some(request.gateway_order_id.clone()),
                gateway_payment_id: Some(request.gateway_payment_id.clone()),
            })
            .await;
        let (payment_mode, payload) = match details {
            Ok(details) => {
                if let Some(amount) = details.amount.as_ref() {
                    if amount.amount != record.amount {
                        return Err(AppError::domain(DomainError::AmountMismatch {
                            expected: record.amount.to_string(),
                            received: amount.amount.to_string(),
                        }));
                    }
                }
                (details.payment_mode, details.raw_response)
            }
            Err(e) => {
                warn!(
                    payment_id = %record.id,
                    error = %e,
                    "could not fetch payment details; relying on checkout signature"
                );
                (None, serde_json::json!({}))
            }
        };

        let outcome = self
            .reconciler
            .apply(
                &record,
                GatewayOutcome {
                    event_id: Some(format!("checkout:{}", request.gateway_payment_id)),
                    event: "checkout.verified".to_string(),
                    status: NormalizedStatus::Success,
                    gateway_payment_id: Some(request.gateway_payment_id.clone()),
                    payment_mode,
                    failure_reason: None,
                    payload,
                },
                &ctx.actor,
            )
            .await?;

        match outcome {
            ReconcileOutcome::Transitioned(payment) => {
                let booking_updated = self
                    .notifier
                    .notify(&payment, ctx.auth_token.as_deref())
                    .await;
                Ok(VerifiedPayment {
                    payment,
                    booking_updated,
                })
            }
            ReconcileOutcome::Duplicate(payment) | ReconcileOutcome::Logged(payment) => {
                Ok(VerifiedPayment {
                    payment,
                    booking_updated: false,
                })
            }
            ReconcileOutcome::Rejected { payment, attempted } => {
                Err(AppError::domain(DomainError::InvalidStatusTransition {
                    payment_id: payment.id.to_string(),
                    from: payment.status.to_string(),
                    to: attempted.to_string(),
                }))
            }
        }
    }

    async fn find_by_gateway_order(
        &self,
        gateway: Option<&str>,
        gateway_order_id: &str,
    ) -> AppResult<PaymentRecord> {
        let names = match gateway {
            Some(name) => vec![GatewayName::from_str(name)?],
            None => GatewayName::ALL.to_vec(),
        };
        for name in names {
            if let Some(record) = self
                .store
                .find_by_gateway_order_id(name, gateway_order_id)
                .await?
            {
                return Ok(record);
            }
        }
        Err(AppError::domain(DomainError::PaymentNotFound {
            payment_id: gateway_order_id.to_string(),
        }))
    }

    fn adapter(&self, name: GatewayName) -> AppResult<Arc<dyn PaymentGateway>> {
        self.gateways.get(name).ok_or_else(|| {
            AppError::domain(DomainError::GatewayNotFound {
                gateway: name.to_string(),
            })
        })
    }

    async fn load(&self, payment_id: Uuid) -> AppResult<PaymentRecord> {
        self.store.find_payment(payment_id).await?.ok_or_else(|| {
            AppError::domain(DomainError::PaymentNotFound {
                payment_id: payment_id.to_string(),
            })
        })
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub async fn get_payment_status(&self, payment_id: Uuid) -> AppResult<PaymentStatusView> {
        let record = self.load(payment_id).await?;
        if record.status.is_terminal() {
            return Ok(PaymentStatusView {
                payment: record,
                source: "cache",
            });
        }

        let gateway = self.adapter(record.gateway)?;
        let status = gateway
            .fetch_status(StatusQuery {
                gateway_order_id: Some(record.gateway_order_id.clone()),
                gateway_payment_id: record.gateway_payment_id.clone(),
            })
            .await?;

        let event_id = format!(
            "poll:{}:{}",
            status.status,
            status.gateway_payment_id.as_deref().unwrap_or("-")
        );
        let outcome = self
            .reconciler
            .apply(
                &record,
                GatewayOutcome {
                    event_id: Some(event_id),
                    event: "status.polled".to_string(),
                    status: status.status,
                    gateway_payment_id: status.gateway_payment_id.clone(),
                    payment_mode: status.payment_mode,
                    failure_reason: status.failure_reason.clone(),
                    payload: status.raw_response.clone(),
                },
                &format!("poll:{}", record.gateway),
            )
            .await?;

        if let ReconcileOutcome::Transitioned(payment) = &outcome {
            self.notifier.spawn(payment.clone(), None);
        }

        Ok(PaymentStatusView {
            payment: outcome.payment().clone(),
            source: "gateway",
        })
    }

    pub async fn get_payments_for_booking(&self, booking_id: &str) -> AppResult<Vec<PaymentRecord>> {
        if booking_id.trim().is_empty() {
            return Err(AppError::validation("booking_id", "must not be blank"));
        }
        Ok(self.store.find_by_booking(booking_id).await?)
    }

    // =========================================================================
    // Refunds
    // =========================================================================

    pub async fn initiate_refund(
        &self,
        payment_id: Uuid,
        request: RefundPaymentRequest,
        ctx: &RequestContext,
    ) -> AppResult<RefundResult> {
        let record = self.load(payment_id).await?;
        let not_allowed = |reason: String| {
            AppError::domain(DomainError::RefundNotAllowed {
                payment_id: payment_id.to_string(),
                reason,
            })
        };

        if record.status != PaymentStatus::Success {
            return Err(not_allowed(format!("payment is {}", record.status)));
        }

        let remaining = record.refundable_amount();
        let amount = request.amount.clone().unwrap_or_else(|| remaining.clone());
        Money::new(amount.clone(), record.currency.clone()).validate_positive("amount")?;
        if amount > remaining {
            return Err(not_allowed(format!(
                "amount {} exceeds refundable {}",
                amount, remaining
            )));
        }
        let gateway_payment_id = record
            .gateway_payment_id
            .clone()
            .ok_or_else(|| not_allowed("no captured gateway payment".to_string()))?;

        let gateway = self.adapter(record.gateway)?;
        let refund_reference = format!("rfnd_{}", Uuid::new_v4().simple());
        let response = gateway
            .initiate_refund(RefundRequest {
                gateway_order_id: Some(record.gateway_order_id.clone()),
                gateway_payment_id,
                amount: Money::new(amount.clone(), record.currency.clone()),
                refund_reference: refund_reference.clone(),
            })
            .await?;

        let entry = RefundEntry {
            refund_id: response.refund_id.clone(),
            reference: refund_reference,
            amount: amount.clone(),
            status: response.status,
            created_by: ctx.actor.clone(),
            created_at: Utc::now(),
        };
        let new_total = &record.refunded_amount + &amount;
        let new_status = if new_total >= record.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::Success
        };

        let updated = self
            .store
            .record_refund(
                record.id,
                &record.refunded_amount,
                entry.clone(),
                new_status,
                &ctx.actor,
            )
            .await?
            .ok_or_else(|| {
                error!(
                    payment_id = %record.id,
                    refund_id = %response.refund_id,
                    "gateway refund issued but payment changed concurrently; requires manual reconciliation"
                );
                not_allowed("payment was modified concurrently".to_string())
            })?;

        self.store
            .append_gateway_log(
                &updated,
                GatewayLogEntry::new(
                    Some(format!("refund:{}", response.refund_id)),
                    "refund.created",
                    if new_status == PaymentStatus::Refunded {
                        NormalizedStatus::Refunded
                    } else {
                        NormalizedStatus::Success
                    },
                    response.raw_response.clone(),
                ),
                None,
                &ctx.actor,
            )
            .await?;

        info!(
            payment_id = %updated.id,
            refund_id = %entry.refund_id,
            amount = %entry.amount,
            refunded_total = %updated.refunded_amount,
            status = %updated.status,
            "refund recorded"
        );

        if updated.status == PaymentStatus::Refunded {
            self.notifier
                .spawn(updated.clone(), ctx.auth_token.clone());
        }

        Ok(RefundResult {
            payment: updated,
            refund: entry,
        })
    }

    // =========================================================================
    // Gateway selection
    // =========================================================================

    pub fn select_gateway_for_region(
        &self,
        country: &str,
        currency: &str,
        amount: &BigDecimal,
    ) -> AppResult<GatewaySelection> {
        if country.trim().is_empty() {
            return Err(AppError::validation("country", "is required"));
        }
        if currency.trim().len() != 3 {
            return Err(AppError::validation("currency", "must be an ISO-4217 code"));
        }

        let candidates = self.gateways.candidates(country, currency, amount);
        let best = candidates.first().ok_or_else(|| {
            AppError::domain(DomainError::NoGatewayAvailable {
                country: country.to_string(),
                currency: currency.to_uppercase(),
                amount: amount.to_string(),
            })
        })?;

        Ok(GatewaySelection {
            gateway: best.name(),
            priority: best.config().priority,
            candidates: candidates.iter().map(|g| g.name()).collect(),
        })
    }
}

/// Public key a checkout widget needs, for gateways that use one
fn checkout_key(gateway: &dyn PaymentGateway) -> Option<String> {
    match gateway.name() {
        GatewayName::Cashfree => None,
        _ => Some(gateway.config().credentials.key_id.clone()),
    }
}
