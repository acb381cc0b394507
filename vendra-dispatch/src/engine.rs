use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vendra_core::repository::{DispatchUpdate, IntegrationRepository, OrderRepository, RouteRepository};
use vendra_core::{
    DriverLookup, ExternalStatus, FailureKind, FxSnapshot, IntegrationConfig, NewOrder, Order,
    OrderPayload, PackageRoute, ProviderDriver, StatusResult, SubmitResult,
};
use vendra_shared::truncate_message;

use crate::retry::RetryPolicy;
use crate::routing::{RoutingError, RoutingResolver};

/// Hard ceiling on any single provider call, over and above the adapters'
/// own per-operation timeouts. A driver that hangs past this is treated as
/// an ambiguous timeout.
const ENGINE_CALL_TIMEOUT: Duration = Duration::from_secs(45);

/// Bound on the stored provider message.
const MESSAGE_MAX_CHARS: usize = 500;

/// Exchange rate in effect right now. The engine samples this exactly once
/// per order, at the moment the order enters dispatch.
pub trait RateSource: Send + Sync {
    fn current_rate(&self) -> f64;
}

pub struct FixedRateSource(pub f64);

impl RateSource for FixedRateSource {
    fn current_rate(&self) -> f64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Delivered {
        external_order_id: Option<String>,
    },
    Sent {
        external_order_id: Option<String>,
    },
    /// The order was already submitted; the recorded external id is reused
    /// and no provider call is made.
    AlreadySubmitted {
        external_order_id: Option<String>,
    },
    RetryScheduled {
        attempts: i32,
    },
    /// Submission outcome is ambiguous; a status check will run before any
    /// resubmission.
    AwaitingStatusCheck {
        attempts: i32,
    },
    Failed {
        message: String,
    },
    /// Another dispatch attempt for this order holds the guard.
    InFlight,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(String),
}

fn storage(err: Box<dyn std::error::Error + Send + Sync>) -> DispatchError {
    DispatchError::Storage(err.to_string())
}

struct CallSite {
    route: PackageRoute,
    config: IntegrationConfig,
    driver: Arc<dyn ProviderDriver>,
}

struct FlightGuard<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.id);
    }
}

/// Orchestrates one order's path to an external provider: route lookup,
/// credential resolution, driver invocation, outcome recording and retry
/// scheduling. Sole writer of the order's dispatch fields.
pub struct DispatchEngine {
    orders: Arc<dyn OrderRepository>,
    integrations: Arc<dyn IntegrationRepository>,
    resolver: RoutingResolver,
    drivers: Arc<dyn DriverLookup>,
    rates: Arc<dyn RateSource>,
    policy: RetryPolicy,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl DispatchEngine {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        integrations: Arc<dyn IntegrationRepository>,
        routes: Arc<dyn RouteRepository>,
        drivers: Arc<dyn DriverLookup>,
        rates: Arc<dyn RateSource>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            orders,
            integrations,
            resolver: RoutingResolver::new(routes),
            drivers,
            rates,
            policy,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Inbound "approved for dispatch" entry point. Re-deliverable: the
    /// idempotency key makes the create a find, and an order that already
    /// went out short-circuits to its recorded result.
    pub async fn accept(&self, new: &NewOrder) -> Result<(Order, DispatchOutcome), DispatchError> {
        let order = self.orders.create_order(new).await.map_err(storage)?;

        if matches!(
            order.external_status,
            ExternalStatus::Sent | ExternalStatus::Delivered
        ) {
            info!(order = %order.id, "duplicate dispatch request, reusing recorded result");
            let external_order_id = order.external_order_id.clone();
            return Ok((order, DispatchOutcome::AlreadySubmitted { external_order_id }));
        }

        let outcome = self.dispatch(order.id).await?;
        let order = self
            .orders
            .get_order(order.id)
            .await
            .map_err(storage)?
            .ok_or(DispatchError::OrderNotFound(order.id))?;
        Ok((order, outcome))
    }

    /// Run one dispatch step for an order, whatever its current state calls
    /// for: submission, delivery confirmation, or unknown-state resolution.
    pub async fn dispatch(&self, order_id: Uuid) -> Result<DispatchOutcome, DispatchError> {
        let Some(_guard) = self.try_guard(order_id) else {
            warn!(order = %order_id, "dispatch already in flight");
            return Ok(DispatchOutcome::InFlight);
        };

        let order = self
            .orders
            .get_order(order_id)
            .await
            .map_err(storage)?
            .ok_or(DispatchError::OrderNotFound(order_id))?;

        match order.external_status {
            ExternalStatus::Delivered => Ok(DispatchOutcome::AlreadySubmitted {
                external_order_id: order.external_order_id.clone(),
            }),
            ExternalStatus::Failed => Ok(DispatchOutcome::Failed {
                message: order
                    .last_message
                    .clone()
                    .unwrap_or_else(|| "order already failed".to_string()),
            }),
            ExternalStatus::Sent => self.confirm_delivery(order).await,
            ExternalStatus::Unknown => self.resolve_unknown(order).await,
            ExternalStatus::NotSent => self.submit(order).await,
        }
    }

    /// Operator re-drive of a terminally failed order. Resets the retry
    /// budget, then dispatches.
    pub async fn redrive(&self, order_id: Uuid) -> Result<DispatchOutcome, DispatchError> {
        let order = self
            .orders
            .get_order(order_id)
            .await
            .map_err(storage)?
            .ok_or(DispatchError::OrderNotFound(order_id))?;

        if order.external_status == ExternalStatus::Failed {
            info!(order = %order_id, "operator re-drive");
            self.orders
                .update_dispatch_state(
                    order_id,
                    DispatchUpdate {
                        external_status: Some(ExternalStatus::NotSent),
                        message: Some("operator re-drive".to_string()),
                        reset_attempts: true,
                        ..Default::default()
                    },
                )
                .await
                .map_err(storage)?;
        }

        self.dispatch(order_id).await
    }

    /// Drain orders whose next attempt has come due. Called by the retry
    /// pump on its own schedule.
    pub async fn run_due(&self, limit: i64) -> Result<usize, DispatchError> {
        let due = self
            .orders
            .list_due_for_dispatch(Utc::now(), limit)
            .await
            .map_err(storage)?;
        let mut processed = 0;
        for order in due {
            match self.dispatch(order.id).await {
                Ok(outcome) => {
                    debug!(order = %order.id, ?outcome, "due order processed");
                    processed += 1;
                }
                Err(err) => error!(order = %order.id, "due order dispatch failed: {}", err),
            }
        }
        Ok(processed)
    }

    fn try_guard(&self, id: Uuid) -> Option<FlightGuard<'_>> {
        let mut set = self.in_flight.lock().unwrap();
        if set.insert(id) {
            Some(FlightGuard {
                set: &self.in_flight,
                id,
            })
        } else {
            None
        }
    }

    /// The reference a provider can resolve for this order: the client key
    /// when the caller supplied one, our own order id otherwise.
    fn client_reference(order: &Order) -> Uuid {
        order.idempotency_key.unwrap_or(order.id)
    }

    /// Route, integration and driver for this order, re-read from storage on
    /// every attempt. `Err(outcome)` carries a terminal pre-send failure.
    async fn call_site(
        &self,
        order: &Order,
    ) -> Result<Result<CallSite, DispatchOutcome>, DispatchError> {
        let route = match self
            .resolver
            .resolve(order.tenant_id, order.package_id)
            .await
        {
            Ok(route) => route,
            Err(RoutingError::NotRouted { .. }) => {
                return Ok(Err(self
                    .fail_before_send(order.id, "no active route for package")
                    .await?));
            }
            Err(RoutingError::LookupFailed(err)) => return Err(DispatchError::Storage(err)),
        };

        let config = self
            .integrations
            .get_integration(route.integration_id)
            .await
            .map_err(storage)?;
        let Some(config) = config else {
            return Ok(Err(self
                .fail_before_send(order.id, "integration for route no longer exists")
                .await?));
        };
        if !config.enabled {
            return Ok(Err(self
                .fail_before_send(order.id, "integration is disabled")
                .await?));
        }

        let Some(driver) = self.drivers.driver_for(config.kind) else {
            return Ok(Err(self
                .fail_before_send(order.id, "no driver registered for provider kind")
                .await?));
        };

        Ok(Ok(CallSite {
            route,
            config,
            driver,
        }))
    }

    async fn submit(&self, order: Order) -> Result<DispatchOutcome, DispatchError> {
        self.freeze_economics(&order).await?;

        let site = match self.call_site(&order).await? {
            Ok(site) => site,
            Err(outcome) => return Ok(outcome),
        };

        let payload = OrderPayload {
            order_uuid: Self::client_reference(&order),
            external_package_id: site.route.external_package_id.clone(),
            quantity: order.quantity,
            fields: order.fields.clone(),
        };

        let result = self.guarded_submit(&site, &payload).await;
        let message = truncate_message(
            result.message.as_deref().unwrap_or("accepted"),
            MESSAGE_MAX_CHARS,
        );
        self.orders
            .record_attempt(order.id, &message)
            .await
            .map_err(storage)?;
        let attempts = order.attempts + 1;

        if result.accepted {
            return self
                .record_acceptance(&order, result.external_order_id, result.external_status)
                .await;
        }

        match result.failure.unwrap_or(FailureKind::Transient) {
            FailureKind::Config => {
                warn!(order = %order.id, "configuration failure: {}", message);
                self.fail_terminal(order.id, &message).await
            }
            FailureKind::Remote | FailureKind::Permanent => {
                info!(order = %order.id, "provider rejected order: {}", message);
                self.fail_terminal(order.id, &message).await
            }
            FailureKind::Transient if result.external_status == ExternalStatus::Unknown => {
                // The provider may have received the order. Park it and let
                // the status check decide before anything is resubmitted.
                let check_at = self
                    .policy
                    .next_attempt_at(attempts, Utc::now())
                    .unwrap_or_else(|| {
                        Utc::now() + chrono::Duration::from_std(self.policy.poll_interval())
                            .unwrap_or_else(|_| chrono::Duration::seconds(30))
                    });
                self.orders
                    .update_dispatch_state(
                        order.id,
                        DispatchUpdate {
                            external_status: Some(ExternalStatus::Unknown),
                            next_attempt_at: Some(check_at),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(storage)?;
                Ok(DispatchOutcome::AwaitingStatusCheck { attempts })
            }
            FailureKind::Transient => match self.policy.next_attempt_at(attempts, Utc::now()) {
                Some(at) => {
                    self.orders
                        .update_dispatch_state(
                            order.id,
                            DispatchUpdate {
                                next_attempt_at: Some(at),
                                ..Default::default()
                            },
                        )
                        .await
                        .map_err(storage)?;
                    Ok(DispatchOutcome::RetryScheduled { attempts })
                }
                None => {
                    self.fail_terminal(
                        order.id,
                        &format!("retry budget exhausted: {}", message),
                    )
                    .await
                }
            },
        }
    }

    /// Resolve an order parked in `Unknown` with a status check, never a
    /// blind resubmission.
    async fn resolve_unknown(&self, order: Order) -> Result<DispatchOutcome, DispatchError> {
        let site = match self.call_site(&order).await? {
            Ok(site) => site,
            Err(outcome) => return Ok(outcome),
        };

        let reference = order
            .external_order_id
            .clone()
            .unwrap_or_else(|| Self::client_reference(&order).to_string());
        let status = self.guarded_status(&site, &reference).await;
        let message = truncate_message(
            status
                .message
                .as_deref()
                .unwrap_or("status check completed"),
            MESSAGE_MAX_CHARS,
        );
        self.orders
            .record_attempt(order.id, &message)
            .await
            .map_err(storage)?;
        let attempts = order.attempts + 1;

        match status.external_status {
            ExternalStatus::Delivered => {
                self.record_acceptance(
                    &order,
                    status.external_order_id.or(order.external_order_id.clone()),
                    ExternalStatus::Delivered,
                )
                .await
            }
            ExternalStatus::Sent => {
                self.record_acceptance(
                    &order,
                    status.external_order_id.or(order.external_order_id.clone()),
                    ExternalStatus::Sent,
                )
                .await
            }
            ExternalStatus::Failed => self.fail_terminal(order.id, &message).await,
            ExternalStatus::NotSent => {
                // The provider never saw the submission; re-arm it.
                match self.policy.next_attempt_at(attempts, Utc::now()) {
                    Some(at) => {
                        self.orders
                            .update_dispatch_state(
                                order.id,
                                DispatchUpdate {
                                    external_status: Some(ExternalStatus::NotSent),
                                    next_attempt_at: Some(at),
                                    ..Default::default()
                                },
                            )
                            .await
                            .map_err(storage)?;
                        Ok(DispatchOutcome::RetryScheduled { attempts })
                    }
                    None => {
                        self.fail_terminal(order.id, "retry budget exhausted while unconfirmed")
                            .await
                    }
                }
            }
            ExternalStatus::Unknown => {
                if attempts >= self.policy.max_attempts {
                    self.fail_terminal(order.id, "delivery state unresolved after repeated checks")
                        .await
                } else {
                    let check_at = Utc::now()
                        + chrono::Duration::from_std(self.policy.poll_interval())
                            .unwrap_or_else(|_| chrono::Duration::seconds(30));
                    self.orders
                        .update_dispatch_state(
                            order.id,
                            DispatchUpdate {
                                next_attempt_at: Some(check_at),
                                ..Default::default()
                            },
                        )
                        .await
                        .map_err(storage)?;
                    Ok(DispatchOutcome::AwaitingStatusCheck { attempts })
                }
            }
        }
    }

    /// Poll a sent order for delivery confirmation. Never resubmits and is
    /// not subject to the retry budget: the provider accepted the order.
    async fn confirm_delivery(&self, order: Order) -> Result<DispatchOutcome, DispatchError> {
        let site = match self.call_site(&order).await? {
            Ok(site) => site,
            Err(outcome) => return Ok(outcome),
        };

        let reference = order
            .external_order_id
            .clone()
            .unwrap_or_else(|| Self::client_reference(&order).to_string());
        let status = self.guarded_status(&site, &reference).await;
        let message = truncate_message(
            status.message.as_deref().unwrap_or("delivery pending"),
            MESSAGE_MAX_CHARS,
        );
        self.orders
            .record_attempt(order.id, &message)
            .await
            .map_err(storage)?;

        match status.external_status {
            ExternalStatus::Delivered => {
                self.record_acceptance(
                    &order,
                    status.external_order_id.or(order.external_order_id.clone()),
                    ExternalStatus::Delivered,
                )
                .await
            }
            ExternalStatus::Failed => self.fail_terminal(order.id, &message).await,
            _ => {
                let check_at = Utc::now()
                    + chrono::Duration::from_std(self.policy.poll_interval())
                        .unwrap_or_else(|_| chrono::Duration::seconds(30));
                self.orders
                    .update_dispatch_state(
                        order.id,
                        DispatchUpdate {
                            next_attempt_at: Some(check_at),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(storage)?;
                Ok(DispatchOutcome::Sent {
                    external_order_id: order.external_order_id.clone(),
                })
            }
        }
    }

    async fn record_acceptance(
        &self,
        order: &Order,
        external_order_id: Option<String>,
        external_status: ExternalStatus,
    ) -> Result<DispatchOutcome, DispatchError> {
        let now = Utc::now();
        let delivered = external_status == ExternalStatus::Delivered;
        // Anything an accepting provider reports short of Delivered is Sent;
        // the delivery poll reconciles the rest.
        let external_status = if delivered {
            ExternalStatus::Delivered
        } else {
            ExternalStatus::Sent
        };
        let next_attempt_at = if delivered {
            None
        } else {
            // Accepted but not confirmed; poll for delivery.
            Some(
                now + chrono::Duration::from_std(self.policy.poll_interval())
                    .unwrap_or_else(|_| chrono::Duration::seconds(30)),
            )
        };

        self.orders
            .update_dispatch_state(
                order.id,
                DispatchUpdate {
                    external_status: Some(external_status),
                    external_order_id: external_order_id.clone(),
                    sent_at: order.sent_at.or(Some(now)),
                    completed_at: delivered.then_some(now),
                    next_attempt_at,
                    ..Default::default()
                },
            )
            .await
            .map_err(storage)?;

        if delivered {
            info!(order = %order.id, "order delivered");
            Ok(DispatchOutcome::Delivered { external_order_id })
        } else {
            info!(order = %order.id, "order accepted by provider");
            Ok(DispatchOutcome::Sent { external_order_id })
        }
    }

    async fn fail_before_send(
        &self,
        order_id: Uuid,
        message: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        warn!(order = %order_id, "dispatch failed before any provider call: {}", message);
        self.fail_terminal(order_id, message).await
    }

    async fn fail_terminal(
        &self,
        order_id: Uuid,
        message: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.orders
            .update_dispatch_state(
                order_id,
                DispatchUpdate {
                    external_status: Some(ExternalStatus::Failed),
                    message: Some(truncate_message(message, MESSAGE_MAX_CHARS)),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .map_err(storage)?;
        Ok(DispatchOutcome::Failed {
            message: message.to_string(),
        })
    }

    /// Capture the exchange rate and resulting amounts exactly once. A
    /// locked row is never overwritten, whatever the live rate does later.
    async fn freeze_economics(&self, order: &Order) -> Result<(), DispatchError> {
        if order.fx_locked {
            return Ok(());
        }
        let snapshot = FxSnapshot::capture(
            order.base_cost,
            order.base_sell,
            self.rates.current_rate(),
        );
        let locked_now = self
            .orders
            .freeze_fx(order.id, &snapshot)
            .await
            .map_err(storage)?;
        if !locked_now {
            debug!(order = %order.id, "economics already frozen by an earlier attempt");
        }
        Ok(())
    }

    /// Submission call with a panic shield and a hard timeout. A driver bug
    /// surfaces as a transient failure, a hang as an ambiguous timeout; the
    /// order is never silently lost.
    async fn guarded_submit(&self, site: &CallSite, payload: &OrderPayload) -> SubmitResult {
        let driver = Arc::clone(&site.driver);
        let config = site.config.clone();
        let payload = payload.clone();
        let call = tokio::spawn(async move { driver.submit_order(&config, &payload).await });

        match timeout(ENGINE_CALL_TIMEOUT, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                error!("driver crashed during submit: {}", join_err);
                SubmitResult::rejected(
                    FailureKind::Transient,
                    format!("driver crashed: {}", join_err),
                )
            }
            Err(_) => SubmitResult::ambiguous("provider call exceeded the engine timeout"),
        }
    }

    async fn guarded_status(&self, site: &CallSite, reference: &str) -> StatusResult {
        let driver = Arc::clone(&site.driver);
        let config = site.config.clone();
        let reference = reference.to_string();
        let call =
            tokio::spawn(async move { driver.check_order_status(&config, &reference).await });

        match timeout(ENGINE_CALL_TIMEOUT, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                error!("driver crashed during status check: {}", join_err);
                StatusResult {
                    external_status: ExternalStatus::Unknown,
                    external_order_id: None,
                    message: Some(format!("driver crashed: {}", join_err)),
                }
            }
            Err(_) => StatusResult {
                external_status: ExternalStatus::Unknown,
                external_order_id: None,
                message: Some("status check exceeded the engine timeout".to_string()),
            },
        }
    }
}
