//! Payment reconciliation.
//!
//! Mediates between Payment and Order records and the external gateway.
//! Three triggers share the same convergence rules: client verification
//! polling (pull), provider callbacks (push) and direct status queries.
//! Terminal payment states short-circuit, every transition is
//! version-guarded, and an order can only ever be paid by one payment.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::{
    DomainEvent, OrderPaymentStatus, Payment, PaymentMethod, PaymentStatus, ReceiptDetails,
    SettledPayment,
};
use crate::error::{AppError, Result};
use crate::events::EventPublisher;
use crate::gateway::{
    parse_callback, CallbackProvider, ChargeOutcome, ChargeRequest, Notification, PaymentGateway,
    ReportedStatus, VerifiedStatus,
};
use crate::store::{OrderRepository, PaymentRepository, StoreError, UserRepository};

pub struct Reconciler {
    payments: Arc<dyn PaymentRepository>,
    orders: Arc<dyn OrderRepository>,
    users: Arc<dyn UserRepository>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventPublisher,
}

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub amount: i64,
    pub method: Option<PaymentMethod>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiatedPayment {
    pub payment_id: Uuid,
    pub reference: String,
    pub redirect_url: Option<String>,
}

/// Client-facing view of one payment, shared by verify and status queries.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentView {
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub reference: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub method: Option<PaymentMethod>,
    pub failure_reason: Option<String>,
    pub receipt: ReceiptDetails,
}

impl PaymentView {
    fn from_payment(p: &Payment) -> Self {
        Self {
            status: p.status,
            transaction_id: p.transaction_id.clone(),
            reference: p.reference.clone(),
            amount: p.amount,
            currency: p.currency.clone(),
            method: p.payment_method,
            failure_reason: p.failure_reason.clone(),
            receipt: ReceiptDetails {
                receipt_number: p.receipt_number.clone(),
                settled_at: p.settled_at.clone(),
                payer_phone: None,
            },
        }
    }
}

/// Internal outcome of a callback; the HTTP layer acknowledges all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Applied { status: PaymentStatus },
    NoOp { status: PaymentStatus },
    Invalid { reason: String },
    UnknownTransaction,
}

impl CallbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::NoOp { .. } => "noop",
            Self::Invalid { .. } => "invalid",
            Self::UnknownTransaction => "unknown_transaction",
        }
    }
}

impl Reconciler {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        orders: Arc<dyn OrderRepository>,
        users: Arc<dyn UserRepository>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventPublisher,
    ) -> Self {
        Self { payments, orders, users, gateway, events }
    }

    /// Create a payment record and request a charge from the gateway.
    pub async fn initiate(&self, request: InitiateRequest) -> Result<InitiatedPayment> {
        if request.amount <= 0 {
            return Err(AppError::InvalidInput("amount must be greater than zero".into()));
        }
        let user = self
            .users
            .find(request.user_id)
            .await?
            .ok_or(AppError::NotFound("user"))?;
        if user.email.is_empty() {
            return Err(AppError::InvalidInput("payer email is required".into()));
        }
        let phone = request.phone.clone().or_else(|| user.phone.clone());
        if request.method.is_some_and(PaymentMethod::requires_phone) && phone.is_none() {
            return Err(AppError::InvalidInput("payer phone is required for this payment method".into()));
        }
        let order = self
            .orders
            .find(request.order_id)
            .await?
            .ok_or(AppError::NotFound("order"))?;

        let payment = Payment::new(
            user.id,
            order.id,
            request.amount,
            &order.currency,
            &user.email,
            phone.clone(),
            request.method,
        );
        self.payments.insert(&payment).await?;
        tracing::info!(payment_id = %payment.id, order_id = %order.id, amount = request.amount, "payment initiated");

        let charge = ChargeRequest {
            payment_id: payment.id,
            order_id: order.id,
            amount: request.amount,
            currency: order.currency.clone(),
            customer_email: user.email.clone(),
            customer_phone: phone,
            customer_name: Some(user.name.clone()),
            method: request.method,
        };
        match self.gateway.charge(&charge).await? {
            ChargeOutcome::Accepted { reference, redirect_url } => {
                let payment =
                    self.payments.mark_processing(payment.id, payment.version, &reference).await?;
                tracing::info!(payment_id = %payment.id, reference = %reference, "charge accepted");
                Ok(InitiatedPayment { payment_id: payment.id, reference, redirect_url })
            }
            ChargeOutcome::Rejected { reason } => {
                self.payments.mark_failed(payment.id, payment.version, &reason).await?;
                tracing::warn!(payment_id = %payment.id, reason = %reason, "charge rejected");
                Err(AppError::ChargeRejected(reason))
            }
        }
    }

    /// Pull reconciliation: ask the gateway for the authoritative status and
    /// apply it if the local record is stale. Terminal records are answered
    /// from the local store without a gateway round-trip.
    pub async fn verify(&self, handle: &str) -> Result<PaymentView> {
        let payment = self
            .payments
            .find_by_handle(handle)
            .await?
            .ok_or(AppError::NotFound("payment"))?;
        if payment.is_terminal() {
            return Ok(PaymentView::from_payment(&payment));
        }

        let verified = self.gateway.verify(handle).await?;
        if verified.status == VerifiedStatus::Successful {
            let (payment, _) =
                self.settle(&payment, verified.canonical_id, verified.method, ReceiptDetails::default()).await?;
            if payment.status == PaymentStatus::Completed
                && !self.set_order_payment_status(&payment, OrderPaymentStatus::Paid).await?
            {
                return Err(AppError::InconsistentState(format!(
                    "payment {} references missing order {}",
                    payment.id, payment.order_id
                )));
            }
            Ok(PaymentView::from_payment(&payment))
        } else {
            let reason = verified
                .detail
                .unwrap_or_else(|| "verification did not confirm the transaction".to_string());
            let payment = self.apply_failure(&payment, &reason).await?;
            Ok(PaymentView::from_payment(&payment))
        }
    }

    /// Push reconciliation: apply a provider notification. Every outcome is
    /// acknowledgeable; only gateway/storage failures bubble up so the
    /// provider retries transient conditions.
    pub async fn apply_callback(
        &self,
        provider: CallbackProvider,
        payload: &serde_json::Value,
    ) -> Result<CallbackOutcome> {
        let notification = match parse_callback(provider, payload) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(provider = provider.as_str(), error = %e, "malformed callback");
                return Ok(CallbackOutcome::Invalid { reason: e.to_string() });
            }
        };
        let Some(handle) = notification.handle() else {
            return Ok(CallbackOutcome::Invalid { reason: "no transaction identifier".into() });
        };

        let mut found = self.payments.find_by_handle(handle).await?;
        if found.is_none() {
            // The provider may know the payment by its other identifier.
            if let Some(reference) = notification.reference.as_deref() {
                if reference != handle {
                    found = self.payments.find_by_handle(reference).await?;
                }
            }
        }
        let Some(payment) = found else {
            tracing::warn!(provider = provider.as_str(), handle, "callback for unknown transaction");
            return Ok(CallbackOutcome::UnknownTransaction);
        };
        self.apply_notification(payment, notification, provider).await
    }

    async fn apply_notification(
        &self,
        payment: Payment,
        notification: Notification,
        provider: CallbackProvider,
    ) -> Result<CallbackOutcome> {
        if payment.is_terminal() {
            tracing::info!(payment_id = %payment.id, status = payment.status.as_str(), "callback replay ignored");
            return Ok(CallbackOutcome::NoOp { status: payment.status });
        }

        match notification.status {
            ReportedStatus::Successful => {
                // The callback's own claim is not trusted; corroborate with
                // the gateway before advancing to completed.
                let handle = notification
                    .handle()
                    .map(str::to_string)
                    .unwrap_or_default();
                let verified = self.gateway.verify(&handle).await?;
                if verified.status == VerifiedStatus::Successful {
                    let (payment, newly_applied) = self
                        .settle(&payment, verified.canonical_id, verified.method, notification.receipt.clone())
                        .await?;
                    if payment.status == PaymentStatus::Completed {
                        self.set_order_payment_status(&payment, OrderPaymentStatus::Paid).await?;
                    }
                    if newly_applied {
                        Ok(CallbackOutcome::Applied { status: payment.status })
                    } else {
                        Ok(CallbackOutcome::NoOp { status: payment.status })
                    }
                } else {
                    tracing::warn!(
                        payment_id = %payment.id,
                        provider = provider.as_str(),
                        "callback claimed success but verification disagreed"
                    );
                    let payment = self
                        .apply_failure(&payment, "callback success not corroborated by verification")
                        .await?;
                    Ok(CallbackOutcome::Applied { status: payment.status })
                }
            }
            ReportedStatus::Failed { ref description } => {
                let payment = self.apply_failure(&payment, description).await?;
                Ok(CallbackOutcome::Applied { status: payment.status })
            }
        }
    }

    /// Direct status query, answered entirely from the local store.
    pub async fn status(&self, handle: &str) -> Result<PaymentView> {
        let payment = self
            .payments
            .find_by_handle(handle)
            .await?
            .ok_or(AppError::NotFound("payment"))?;
        Ok(PaymentView::from_payment(&payment))
    }

    /// Transition to completed. Tolerates losing a race to a concurrent
    /// reconciler (returns the winner's record); a second payment trying to
    /// complete an already-paid order is failed instead.
    async fn settle(
        &self,
        payment: &Payment,
        canonical_id: Option<String>,
        method: Option<PaymentMethod>,
        receipt: ReceiptDetails,
    ) -> Result<(Payment, bool)> {
        let settled = SettledPayment {
            canonical_transaction_id: canonical_id,
            method,
            receipt,
        };
        match self.payments.mark_completed(payment.id, payment.version, &settled).await {
            Ok(updated) => {
                tracing::info!(payment_id = %updated.id, order_id = %updated.order_id, "payment completed");
                self.events
                    .publish(&DomainEvent::PaymentCompleted {
                        payment_id: updated.id,
                        order_id: updated.order_id,
                        amount: updated.amount,
                    })
                    .await;
                self.events.publish(&DomainEvent::OrderPaid { order_id: updated.order_id }).await;
                Ok((updated, true))
            }
            Err(StoreError::Conflict) => {
                let current = self
                    .payments
                    .find(payment.id)
                    .await?
                    .ok_or(AppError::NotFound("payment"))?;
                if current.is_terminal() {
                    Ok((current, false))
                } else {
                    Err(AppError::Conflict)
                }
            }
            Err(StoreError::DuplicateCompletion) => {
                tracing::warn!(
                    payment_id = %payment.id,
                    order_id = %payment.order_id,
                    "order already settled by another payment"
                );
                // The order stays paid; only this payment record is failed.
                let failed = self
                    .fail_payment_record(payment, "order already settled by another payment")
                    .await?;
                Ok((failed, true))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Transition to failed and propagate to the order. The store keeps
    /// `paid` sticky, so a failed retry never downgrades a paid order.
    async fn apply_failure(&self, payment: &Payment, reason: &str) -> Result<Payment> {
        let updated = self.fail_payment_record(payment, reason).await?;
        if updated.status == PaymentStatus::Failed {
            self.set_order_payment_status(&updated, OrderPaymentStatus::Failed).await?;
        }
        Ok(updated)
    }

    /// Mark only the payment record failed; converges quietly if another
    /// reconciler already settled it.
    async fn fail_payment_record(&self, payment: &Payment, reason: &str) -> Result<Payment> {
        match self.payments.mark_failed(payment.id, payment.version, reason).await {
            Ok(updated) => {
                tracing::info!(payment_id = %updated.id, reason, "payment failed");
                self.events
                    .publish(&DomainEvent::PaymentFailed {
                        payment_id: updated.id,
                        order_id: updated.order_id,
                        reason: reason.to_string(),
                    })
                    .await;
                Ok(updated)
            }
            Err(StoreError::Conflict) => {
                let current = self
                    .payments
                    .find(payment.id)
                    .await?
                    .ok_or(AppError::NotFound("payment"))?;
                if current.is_terminal() {
                    Ok(current)
                } else {
                    Err(AppError::Conflict)
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns false when the linked order is missing, which is an integrity
    /// violation: it is always logged, and callers on the pull path surface
    /// it as a hard failure.
    async fn set_order_payment_status(
        &self,
        payment: &Payment,
        status: OrderPaymentStatus,
    ) -> Result<bool> {
        let found = self.orders.set_payment_status(payment.order_id, status).await?;
        if !found {
            tracing::error!(
                payment_id = %payment.id,
                order_id = %payment.order_id,
                "integrity violation: payment references a missing order"
            );
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use sqlx::types::Json;

    use crate::domain::{Order, OrderStatus, ShippingAddress, User};
    use crate::gateway::{GatewayError, VerifiedTransaction};

    #[derive(Default)]
    struct MemStore {
        payments: Mutex<HashMap<Uuid, Payment>>,
        orders: Mutex<HashMap<Uuid, Order>>,
        users: Mutex<HashMap<Uuid, User>>,
    }

    impl MemStore {
        fn add_user(&self, phone: Option<&str>) -> User {
            let user = User {
                id: Uuid::new_v4(),
                name: "Wanjiku".into(),
                email: "wanjiku@uni.ac.ke".into(),
                phone: phone.map(str::to_string),
                created_at: Utc::now(),
            };
            self.users.lock().unwrap().insert(user.id, user.clone());
            user
        }

        fn add_order(&self, user_id: Uuid, total: i64) -> Order {
            let now = Utc::now();
            let order = Order {
                id: Uuid::new_v4(),
                order_number: "ORD-00000042".into(),
                user_id,
                total_amount: total,
                currency: "KES".into(),
                shipping_address: Json(ShippingAddress {
                    street: "Hostel B".into(),
                    city: "Nairobi".into(),
                    state: "Nairobi".into(),
                    zip_code: "00100".into(),
                }),
                payment_status: OrderPaymentStatus::Pending,
                order_status: OrderStatus::Pending,
                tracking_number: None,
                estimated_delivery: None,
                note: None,
                created_at: now,
                updated_at: now,
            };
            self.orders.lock().unwrap().insert(order.id, order.clone());
            order
        }

        fn payment_count(&self) -> usize {
            self.payments.lock().unwrap().len()
        }

        fn payment(&self, id: Uuid) -> Payment {
            self.payments.lock().unwrap().get(&id).cloned().unwrap()
        }

        fn order(&self, id: Uuid) -> Order {
            self.orders.lock().unwrap().get(&id).cloned().unwrap()
        }
    }

    #[async_trait]
    impl PaymentRepository for MemStore {
        async fn insert(&self, payment: &Payment) -> std::result::Result<(), StoreError> {
            self.payments.lock().unwrap().insert(payment.id, payment.clone());
            Ok(())
        }

        async fn find(&self, id: Uuid) -> std::result::Result<Option<Payment>, StoreError> {
            Ok(self.payments.lock().unwrap().get(&id).cloned())
        }

        async fn find_by_handle(&self, handle: &str) -> std::result::Result<Option<Payment>, StoreError> {
            Ok(self
                .payments
                .lock()
                .unwrap()
                .values()
                .find(|p| {
                    p.transaction_id.as_deref() == Some(handle) || p.reference.as_deref() == Some(handle)
                })
                .cloned())
        }

        async fn mark_processing(
            &self,
            id: Uuid,
            version: i32,
            reference: &str,
        ) -> std::result::Result<Payment, StoreError> {
            let mut payments = self.payments.lock().unwrap();
            let payment = payments.get_mut(&id).ok_or(StoreError::NotFound("payment"))?;
            if payment.version != version {
                return Err(StoreError::Conflict);
            }
            payment.accept(reference).map_err(|_| StoreError::Conflict)?;
            Ok(payment.clone())
        }

        async fn mark_completed(
            &self,
            id: Uuid,
            version: i32,
            settled: &SettledPayment,
        ) -> std::result::Result<Payment, StoreError> {
            let mut payments = self.payments.lock().unwrap();
            let current = payments.get(&id).ok_or(StoreError::NotFound("payment"))?;
            if current.version != version || current.is_terminal() {
                return Err(StoreError::Conflict);
            }
            let order_id = current.order_id;
            if payments
                .values()
                .any(|q| q.order_id == order_id && q.status == PaymentStatus::Completed && q.id != id)
            {
                return Err(StoreError::DuplicateCompletion);
            }
            let payment = payments.get_mut(&id).ok_or(StoreError::NotFound("payment"))?;
            payment.complete(settled.clone()).map_err(|_| StoreError::Conflict)?;
            Ok(payment.clone())
        }

        async fn mark_failed(
            &self,
            id: Uuid,
            version: i32,
            reason: &str,
        ) -> std::result::Result<Payment, StoreError> {
            let mut payments = self.payments.lock().unwrap();
            let payment = payments.get_mut(&id).ok_or(StoreError::NotFound("payment"))?;
            if payment.version != version {
                return Err(StoreError::Conflict);
            }
            payment.fail(reason).map_err(|_| StoreError::Conflict)?;
            Ok(payment.clone())
        }
    }

    #[async_trait]
    impl OrderRepository for MemStore {
        async fn find(&self, id: Uuid) -> std::result::Result<Option<Order>, StoreError> {
            Ok(self.orders.lock().unwrap().get(&id).cloned())
        }

        async fn set_payment_status(
            &self,
            order_id: Uuid,
            status: OrderPaymentStatus,
        ) -> std::result::Result<bool, StoreError> {
            let mut orders = self.orders.lock().unwrap();
            match orders.get_mut(&order_id) {
                Some(order) => {
                    let downgrade = status == OrderPaymentStatus::Failed
                        && order.payment_status == OrderPaymentStatus::Paid;
                    if !downgrade {
                        order.payment_status = status;
                        order.updated_at = Utc::now();
                    }
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    #[async_trait]
    impl UserRepository for MemStore {
        async fn find(&self, id: Uuid) -> std::result::Result<Option<User>, StoreError> {
            Ok(self.users.lock().unwrap().get(&id).cloned())
        }
    }

    struct StubGateway {
        reject_reason: Option<String>,
        verify_success: bool,
        canonical: Option<String>,
        charge_calls: AtomicUsize,
        verify_calls: AtomicUsize,
    }

    impl StubGateway {
        fn accepting() -> Self {
            Self {
                reject_reason: None,
                verify_success: true,
                canonical: Some("FLW-REF-1".into()),
                charge_calls: AtomicUsize::new(0),
                verify_calls: AtomicUsize::new(0),
            }
        }

        fn rejecting(reason: &str) -> Self {
            Self { reject_reason: Some(reason.into()), ..Self::accepting() }
        }

        fn denying_verification() -> Self {
            Self { verify_success: false, ..Self::accepting() }
        }

        fn verify_calls(&self) -> usize {
            self.verify_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn charge(
            &self,
            request: &ChargeRequest,
        ) -> std::result::Result<ChargeOutcome, GatewayError> {
            self.charge_calls.fetch_add(1, Ordering::SeqCst);
            match &self.reject_reason {
                Some(reason) => Ok(ChargeOutcome::Rejected { reason: reason.clone() }),
                None => Ok(ChargeOutcome::Accepted {
                    reference: format!("CM-{}", request.payment_id),
                    redirect_url: Some("https://pay.example/checkout".into()),
                }),
            }
        }

        async fn verify(
            &self,
            _transaction_id: &str,
        ) -> std::result::Result<VerifiedTransaction, GatewayError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            if self.verify_success {
                Ok(VerifiedTransaction {
                    status: VerifiedStatus::Successful,
                    canonical_id: self.canonical.clone(),
                    method: Some(PaymentMethod::Card),
                    amount: Some(500),
                    currency: Some("KES".into()),
                    detail: Some("successful".into()),
                })
            } else {
                Ok(VerifiedTransaction {
                    status: VerifiedStatus::Failed,
                    canonical_id: None,
                    method: None,
                    amount: None,
                    currency: None,
                    detail: Some("failed".into()),
                })
            }
        }
    }

    fn harness(gateway: StubGateway) -> (Arc<MemStore>, Arc<StubGateway>, Reconciler) {
        let store = Arc::new(MemStore::default());
        let gateway = Arc::new(gateway);
        let reconciler = Reconciler::new(
            store.clone(),
            store.clone(),
            store.clone(),
            gateway.clone(),
            EventPublisher::disabled(),
        );
        (store, gateway, reconciler)
    }

    fn initiate_request(user: &User, order: &Order, amount: i64) -> InitiateRequest {
        InitiateRequest {
            user_id: user.id,
            order_id: order.id,
            amount,
            method: None,
            phone: None,
        }
    }

    fn success_callback(transaction_id: &str, reference: &str) -> serde_json::Value {
        json!({
            "transaction_id": transaction_id,
            "status": "successful",
            "transaction_reference": reference,
        })
    }

    #[tokio::test]
    async fn non_positive_amount_is_rejected_without_a_row() {
        let (store, _, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);

        for amount in [0, -10] {
            let err = reconciler.initiate(initiate_request(&user, &order, amount)).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)));
        }
        assert_eq!(store.payment_count(), 0);
    }

    #[tokio::test]
    async fn initiation_moves_payment_to_processing_with_reference() {
        let (store, _, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);

        let initiated = reconciler.initiate(initiate_request(&user, &order, 500)).await.unwrap();
        let payment = store.payment(initiated.payment_id);
        assert_eq!(payment.status, PaymentStatus::Processing);
        assert_eq!(payment.reference.as_deref(), Some(initiated.reference.as_str()));
        assert_eq!(payment.amount, 500);
        assert!(initiated.redirect_url.is_some());
    }

    #[tokio::test]
    async fn rejected_charge_fails_the_payment() {
        let (store, _, reconciler) = harness(StubGateway::rejecting("card declined"));
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);

        let err = reconciler.initiate(initiate_request(&user, &order, 500)).await.unwrap_err();
        assert!(matches!(err, AppError::ChargeRejected(_)));
        assert_eq!(store.payment_count(), 1);
        let payment = store.payments.lock().unwrap().values().next().cloned().unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.failure_reason.as_deref(), Some("card declined"));
    }

    #[tokio::test]
    async fn phone_based_method_requires_a_phone_number() {
        let (store, _, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);

        let mut request = initiate_request(&user, &order, 500);
        request.method = Some(PaymentMethod::Mpesa);
        let err = reconciler.initiate(request).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(store.payment_count(), 0);
    }

    #[tokio::test]
    async fn initiation_requires_an_existing_order() {
        let (store, _, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);
        let mut request = initiate_request(&user, &order, 500);
        request.order_id = Uuid::new_v4();

        let err = reconciler.initiate(request).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("order")));
        assert_eq!(store.payment_count(), 0);
    }

    #[tokio::test]
    async fn corroborated_callback_completes_payment_and_pays_order() {
        let (store, gateway, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);
        let initiated = reconciler.initiate(initiate_request(&user, &order, 500)).await.unwrap();

        let payload = success_callback("4421887", &initiated.reference);
        let outcome =
            reconciler.apply_callback(CallbackProvider::Flutterwave, &payload).await.unwrap();
        assert_eq!(outcome, CallbackOutcome::Applied { status: PaymentStatus::Completed });

        let payment = store.payment(initiated.payment_id);
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.transaction_id.as_deref(), Some("FLW-REF-1"));
        assert_eq!(store.order(order.id).payment_status, OrderPaymentStatus::Paid);
        assert_eq!(gateway.verify_calls(), 1);
    }

    #[tokio::test]
    async fn replayed_callback_is_a_pure_noop() {
        let (store, gateway, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);
        let initiated = reconciler.initiate(initiate_request(&user, &order, 500)).await.unwrap();
        let payload = success_callback("4421887", &initiated.reference);

        reconciler.apply_callback(CallbackProvider::Flutterwave, &payload).await.unwrap();
        let settled = store.payment(initiated.payment_id);

        let outcome =
            reconciler.apply_callback(CallbackProvider::Flutterwave, &payload).await.unwrap();
        assert_eq!(outcome, CallbackOutcome::NoOp { status: PaymentStatus::Completed });

        let replayed = store.payment(initiated.payment_id);
        assert_eq!(replayed.version, settled.version);
        assert_eq!(replayed.updated_at, settled.updated_at);
        assert_eq!(store.order(order.id).payment_status, OrderPaymentStatus::Paid);
        // Terminal short-circuit: the replay never reached the gateway.
        assert_eq!(gateway.verify_calls(), 1);
    }

    #[tokio::test]
    async fn callback_without_identifier_mutates_nothing() {
        let (store, gateway, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);
        let initiated = reconciler.initiate(initiate_request(&user, &order, 500)).await.unwrap();
        let before = store.payment(initiated.payment_id);

        let outcome = reconciler
            .apply_callback(CallbackProvider::Flutterwave, &json!({ "status": "successful" }))
            .await
            .unwrap();
        assert!(matches!(outcome, CallbackOutcome::Invalid { .. }));
        assert_eq!(store.payment(initiated.payment_id).version, before.version);
        assert_eq!(gateway.verify_calls(), 0);
    }

    #[tokio::test]
    async fn callback_for_unknown_transaction_is_acknowledged_untouched() {
        let (store, gateway, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);
        let initiated = reconciler.initiate(initiate_request(&user, &order, 500)).await.unwrap();
        let before = store.payment(initiated.payment_id);

        let payload = success_callback("no-such-txn", "no-such-ref");
        let outcome =
            reconciler.apply_callback(CallbackProvider::Flutterwave, &payload).await.unwrap();
        assert_eq!(outcome, CallbackOutcome::UnknownTransaction);
        assert_eq!(store.payment(initiated.payment_id).version, before.version);
        assert_eq!(store.order(order.id).payment_status, OrderPaymentStatus::Pending);
        assert_eq!(gateway.verify_calls(), 0);
    }

    #[tokio::test]
    async fn failure_callback_fails_payment_and_order_without_verification() {
        let (store, gateway, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);
        let initiated = reconciler.initiate(initiate_request(&user, &order, 500)).await.unwrap();

        let payload = json!({
            "transaction_id": "4421887",
            "status": "cancelled",
            "transaction_reference": initiated.reference,
        });
        let outcome =
            reconciler.apply_callback(CallbackProvider::Flutterwave, &payload).await.unwrap();
        assert_eq!(outcome, CallbackOutcome::Applied { status: PaymentStatus::Failed });

        let payment = store.payment(initiated.payment_id);
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert!(payment.failure_reason.unwrap().contains("cancelled"));
        assert_eq!(store.order(order.id).payment_status, OrderPaymentStatus::Failed);
        assert_eq!(gateway.verify_calls(), 0);
    }

    #[tokio::test]
    async fn uncorroborated_success_claim_is_not_trusted() {
        let (store, gateway, reconciler) = harness(StubGateway::denying_verification());
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);
        let initiated = reconciler.initiate(initiate_request(&user, &order, 500)).await.unwrap();

        let payload = success_callback("4421887", &initiated.reference);
        let outcome =
            reconciler.apply_callback(CallbackProvider::Flutterwave, &payload).await.unwrap();
        assert_eq!(outcome, CallbackOutcome::Applied { status: PaymentStatus::Failed });
        assert_eq!(store.payment(initiated.payment_id).status, PaymentStatus::Failed);
        assert_eq!(store.order(order.id).payment_status, OrderPaymentStatus::Failed);
        assert_eq!(gateway.verify_calls(), 1);
    }

    #[tokio::test]
    async fn verify_pull_completes_a_processing_payment() {
        let (store, gateway, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);
        let initiated = reconciler.initiate(initiate_request(&user, &order, 500)).await.unwrap();

        let view = reconciler.verify(&initiated.reference).await.unwrap();
        assert_eq!(view.status, PaymentStatus::Completed);
        assert_eq!(store.order(order.id).payment_status, OrderPaymentStatus::Paid);
        assert_eq!(gateway.verify_calls(), 1);
    }

    #[tokio::test]
    async fn verify_short_circuits_completed_payments() {
        let (store, gateway, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);
        let initiated = reconciler.initiate(initiate_request(&user, &order, 500)).await.unwrap();
        reconciler.verify(&initiated.reference).await.unwrap();
        let settled = store.payment(initiated.payment_id);

        let view = reconciler.verify(&initiated.reference).await.unwrap();
        assert_eq!(view.status, PaymentStatus::Completed);
        assert_eq!(store.payment(initiated.payment_id).version, settled.version);
        assert_eq!(gateway.verify_calls(), 1);
    }

    #[tokio::test]
    async fn verify_and_callback_converge_in_either_order() {
        // Pull first, then push.
        let (store, gateway, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);
        let initiated = reconciler.initiate(initiate_request(&user, &order, 500)).await.unwrap();

        reconciler.verify(&initiated.reference).await.unwrap();
        let payload = success_callback("4421887", &initiated.reference);
        let outcome =
            reconciler.apply_callback(CallbackProvider::Flutterwave, &payload).await.unwrap();
        assert_eq!(outcome, CallbackOutcome::NoOp { status: PaymentStatus::Completed });
        assert_eq!(store.order(order.id).payment_status, OrderPaymentStatus::Paid);
        assert_eq!(gateway.verify_calls(), 1);
    }

    #[tokio::test]
    async fn second_payment_cannot_complete_an_already_paid_order() {
        let (store, _, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);

        let first = reconciler.initiate(initiate_request(&user, &order, 500)).await.unwrap();
        reconciler.verify(&first.reference).await.unwrap();

        let second = reconciler.initiate(initiate_request(&user, &order, 500)).await.unwrap();
        let payload = success_callback("9900221", &second.reference);
        let outcome =
            reconciler.apply_callback(CallbackProvider::Flutterwave, &payload).await.unwrap();
        assert_eq!(outcome, CallbackOutcome::Applied { status: PaymentStatus::Failed });

        assert_eq!(store.payment(first.payment_id).status, PaymentStatus::Completed);
        assert_eq!(store.payment(second.payment_id).status, PaymentStatus::Failed);
        assert_eq!(store.order(order.id).payment_status, OrderPaymentStatus::Paid);
    }

    #[tokio::test]
    async fn verify_unknown_handle_is_not_found() {
        let (_, _, reconciler) = harness(StubGateway::accepting());
        let err = reconciler.verify("no-such-handle").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("payment")));
    }

    #[tokio::test]
    async fn missing_linked_order_is_an_integrity_violation_on_verify() {
        let (store, _, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(None);
        let mut orphan =
            Payment::new(user.id, Uuid::new_v4(), 500, "KES", &user.email, None, None);
        orphan.accept("CM-orphan").unwrap();
        PaymentRepository::insert(store.as_ref(), &orphan).await.unwrap();

        let err = reconciler.verify("CM-orphan").await.unwrap_err();
        assert!(matches!(err, AppError::InconsistentState(_)));
        // The gateway's verdict on the payment itself still lands.
        assert_eq!(store.payment(orphan.id).status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn mpesa_callback_attaches_receipt_details() {
        let (store, _, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(Some("254700000001"));
        let order = store.add_order(user.id, 500);
        let mut request = initiate_request(&user, &order, 500);
        request.method = Some(PaymentMethod::Mpesa);
        let initiated = reconciler.initiate(request).await.unwrap();

        let payload = json!({
            "Body": { "stkCallback": {
                "MerchantRequestID": initiated.reference,
                "CheckoutRequestID": "ws_CO_42",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": { "Item": [
                    { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                    { "Name": "TransactionDate", "Value": 20240110213045u64 },
                    { "Name": "PhoneNumber", "Value": 254700000001u64 }
                ]}
            }}
        });
        let outcome = reconciler.apply_callback(CallbackProvider::Mpesa, &payload).await.unwrap();
        assert_eq!(outcome, CallbackOutcome::Applied { status: PaymentStatus::Completed });

        let payment = store.payment(initiated.payment_id);
        assert_eq!(payment.receipt_number.as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(payment.settled_at.as_deref(), Some("20240110213045"));
        assert_eq!(store.order(order.id).payment_status, OrderPaymentStatus::Paid);
    }

    #[tokio::test]
    async fn status_query_reads_only_the_local_store() {
        let (store, gateway, reconciler) = harness(StubGateway::accepting());
        let user = store.add_user(None);
        let order = store.add_order(user.id, 500);
        let initiated = reconciler.initiate(initiate_request(&user, &order, 500)).await.unwrap();

        let view = reconciler.status(&initiated.reference).await.unwrap();
        assert_eq!(view.status, PaymentStatus::Processing);
        assert_eq!(view.amount, 500);
        assert_eq!(gateway.verify_calls(), 0);
    }
}
