//! Reconciliation of backend replies against stored ticket state.
//!
//! ```text
//! create reply, ok      Creating | Error -> Working        notify
//! create reply, error   Creating -> Error (alternate)      resubmit once
//!                       Error    -> Error                  notify, terminal
//! status | note | wait  no transition                      notify
//! reopen                -> Working                         notify
//! close                 -> Closed                          notify
//! ```
//!
//! Each reply is handled to completion on its own; a failure is returned to
//! the caller and never retried.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::{Notifier, Outcome, ReconcileError, SourceRegistry};
use crate::channel::TicketProducer;
use crate::metrics;
use crate::router::{self, RouteError};
use crate::store::StateStore;
use crate::ticket::{MessageKind, Ticket, TicketEventDto, TicketState, TicketStatus};

/// Applies backend replies to the state store.
pub struct ReconciliationEngine {
    store: Arc<dyn StateStore>,
    producer: Arc<dyn TicketProducer>,
    notifier: Arc<dyn Notifier>,
    sources: Arc<SourceRegistry>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        producer: Arc<dyn TicketProducer>,
        notifier: Arc<dyn Notifier>,
        sources: Arc<SourceRegistry>,
    ) -> Self {
        Self {
            store,
            producer,
            notifier,
            sources,
        }
    }

    /// Reconcile one reply, logging and counting the result.
    ///
    /// This is what workers call; it never fails.
    pub async fn process(&self, ticket: Ticket) -> Option<Outcome> {
        let started = Instant::now();
        let kind = ticket.kind;
        let customer_id = ticket.customer_id.clone();

        let result = self.reconcile(ticket).await;

        metrics::RECONCILE_DURATION
            .with_label_values(&[kind.as_keyword()])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(outcome) => {
                metrics::RECONCILIATIONS
                    .with_label_values(&[outcome.as_str()])
                    .inc();
                debug!(customer_id = %customer_id, kind = %kind, outcome = outcome.as_str(), "Reply reconciled");
                Some(outcome)
            }
            Err(e) => {
                let label = match &e {
                    ReconcileError::UnknownCustomer(_) | ReconcileError::BillingMismatch { .. } => {
                        "dropped"
                    }
                    _ => "failed",
                };
                metrics::RECONCILIATIONS.with_label_values(&[label]).inc();
                if label == "dropped" {
                    warn!(customer_id = %customer_id, kind = %kind, error = %e, "Dropping reply");
                } else {
                    error!(customer_id = %customer_id, kind = %kind, error = %e, "Reconciliation failed");
                }
                None
            }
        }
    }

    /// Reconcile one reply.
    pub async fn reconcile(&self, ticket: Ticket) -> Result<Outcome, ReconcileError> {
        let state = self
            .store
            .get(&ticket.customer_id)
            .await?
            .ok_or_else(|| ReconcileError::UnknownCustomer(ticket.customer_id.clone()))?;

        match ticket.kind {
            MessageKind::Create if ticket.is_error_reply() => self.on_create_rejected(ticket, state).await,
            MessageKind::Create => self.on_create_accepted(ticket, state).await,
            MessageKind::Status | MessageKind::Note | MessageKind::Wait => {
                let notified = self.forward(&state, &ticket).await;
                Ok(Outcome::Forwarded { notified })
            }
            MessageKind::Reopen if state.status.awaits_backend() => {
                debug!(
                    customer_id = %state.customer_id,
                    status = %state.status,
                    "Ignoring reopen for a ticket the backend has not accepted"
                );
                Ok(Outcome::Duplicate)
            }
            MessageKind::Reopen => {
                let notified = self.transition_and_forward(state, &ticket, TicketStatus::Working).await?;
                Ok(Outcome::Reopened { notified })
            }
            MessageKind::Close => {
                let notified = self.transition_and_forward(state, &ticket, TicketStatus::Closed).await?;
                Ok(Outcome::Closed { notified })
            }
        }
    }

    async fn on_create_accepted(
        &self,
        ticket: Ticket,
        mut state: TicketState,
    ) -> Result<Outcome, ReconcileError> {
        if ticket.billing_channel != state.billing_channel {
            return Err(ReconcileError::BillingMismatch {
                customer_id: state.customer_id,
                expected: state.billing_channel,
                actual: ticket.billing_channel,
            });
        }
        if !state.status.awaits_backend() {
            debug!(
                customer_id = %state.customer_id,
                status = %state.status,
                "Ignoring repeated create confirmation"
            );
            return Ok(Outcome::Duplicate);
        }

        if !ticket.operator_ticket_id.is_empty() {
            state.operator_ticket_id = ticket.operator_ticket_id.clone();
        }
        state.transition(TicketStatus::Working, Utc::now().timestamp());
        self.store.put(&state).await?;

        info!(
            customer_id = %state.customer_id,
            billing_channel = %state.billing_channel,
            operator_ticket_id = %state.operator_ticket_id,
            "Ticket accepted by backend"
        );

        let notified = self.forward(&state, &ticket).await;
        Ok(Outcome::Accepted { notified })
    }

    async fn on_create_rejected(
        &self,
        ticket: Ticket,
        mut state: TicketState,
    ) -> Result<Outcome, ReconcileError> {
        match state.status {
            TicketStatus::Creating => {}
            TicketStatus::Error => return Ok(self.exhausted(&state, &ticket).await),
            _ => {
                debug!(
                    customer_id = %state.customer_id,
                    status = %state.status,
                    "Ignoring rejection for a ticket that is no longer pending"
                );
                return Ok(Outcome::Duplicate);
            }
        }

        let now = Utc::now().timestamp();
        let alternate = match router::alternate(&state.operator_channel, &state.billing_channel) {
            Ok(alternate) => alternate.to_string(),
            Err(RouteError::NoAlternate(code)) | Err(RouteError::MalformedChannelCode(code)) => {
                warn!(
                    customer_id = %state.customer_id,
                    operator_channel = %code,
                    "No alternate backend, rejection is final"
                );
                state.transition(TicketStatus::Error, now);
                self.store.put(&state).await?;
                return Ok(self.exhausted(&state, &ticket).await);
            }
        };

        let rejected_by = std::mem::replace(&mut state.billing_channel, alternate);
        state.transition(TicketStatus::Error, now);
        self.store.put(&state).await?;

        self.producer
            .produce(&state.to_create_event(&state.billing_channel))
            .await?;
        metrics::FAILOVERS.inc();

        info!(
            customer_id = %state.customer_id,
            rejected_by = %rejected_by,
            billing_channel = %state.billing_channel,
            "Create rejected, resubmitted to alternate backend"
        );

        Ok(Outcome::Rerouted {
            billing_channel: state.billing_channel,
        })
    }

    /// Both backends refused: report the failure to the source and stop.
    async fn exhausted(&self, state: &TicketState, ticket: &Ticket) -> Outcome {
        warn!(
            customer_id = %state.customer_id,
            billing_channel = %state.billing_channel,
            "Create rejected by every backend"
        );
        metrics::TERMINAL_FAILURES.inc();
        let notified = self.forward(state, ticket).await;
        Outcome::Exhausted { notified }
    }

    async fn transition_and_forward(
        &self,
        mut state: TicketState,
        ticket: &Ticket,
        status: TicketStatus,
    ) -> Result<bool, ReconcileError> {
        state.transition(status, Utc::now().timestamp());
        self.store.put(&state).await?;
        Ok(self.forward(&state, ticket).await)
    }

    /// Post `ticket` to the source that owns `state`. Returns whether it was delivered.
    async fn forward(&self, state: &TicketState, ticket: &Ticket) -> bool {
        let Some(url) = self.sources.url_for(&state.source) else {
            debug!(
                customer_id = %state.customer_id,
                source = %state.source,
                "No registered source, not forwarding"
            );
            return false;
        };

        let event = TicketEventDto::from_ticket(ticket, &state.source);
        match self.notifier.notify(url, &event).await {
            Ok(()) => {
                metrics::NOTIFICATIONS
                    .with_label_values(&[state.source.as_str(), "ok"])
                    .inc();
                true
            }
            Err(e) => {
                metrics::NOTIFICATIONS
                    .with_label_values(&[state.source.as_str(), "error"])
                    .inc();
                warn!(
                    customer_id = %state.customer_id,
                    source = %state.source,
                    error = %e,
                    "Failed to notify source"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStateStore;
    use crate::testing::{fixtures, MockChannel, MockNotifier};

    struct Harness {
        engine: ReconciliationEngine,
        store: Arc<SqliteStateStore>,
        channel: Arc<MockChannel>,
        notifier: Arc<MockNotifier>,
    }

    fn harness() -> Harness {
        let store = Arc::new(SqliteStateStore::in_memory(3600, 100).unwrap());
        let channel = Arc::new(MockChannel::new());
        let notifier = Arc::new(MockNotifier::new());
        let sources = Arc::new(SourceRegistry::new([("sberapi", "http://sber/cb")]));
        Harness {
            engine: ReconciliationEngine::new(
                store.clone(),
                channel.clone(),
                notifier.clone(),
                sources,
            ),
            store,
            channel,
            notifier,
        }
    }

    async fn seed(h: &Harness, status: TicketStatus, billing: &str) {
        h.store
            .put(&fixtures::ticket_state("C100", "ABCD12-x", billing, status))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_customer_is_dropped() {
        let h = harness();
        let err = h
            .engine
            .reconcile(fixtures::reply(MessageKind::Status, "C404", "KRUS", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownCustomer(id) if id == "C404"));
        assert_eq!(h.notifier.notification_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_accepted() {
        let h = harness();
        seed(&h, TicketStatus::Creating, "RIAS_12").await;

        let mut reply = fixtures::reply(MessageKind::Create, "C100", "RIAS_12", "new");
        reply.operator_ticket_id = "ERTH-55".to_string();
        let outcome = h.engine.reconcile(reply).await.unwrap();
        assert_eq!(outcome, Outcome::Accepted { notified: true });

        let state = h.store.get("C100").await.unwrap().unwrap();
        assert_eq!(state.status, TicketStatus::Working);
        assert_eq!(state.operator_ticket_id, "ERTH-55");

        let sent = h.notifier.notifications().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "http://sber/cb");
        assert_eq!(sent[0].event.tt_number, "ERTH-55");
        assert_eq!(sent[0].event.source, "sberapi");
    }

    #[tokio::test]
    async fn test_create_accepted_with_wrong_billing_is_dropped() {
        let h = harness();
        seed(&h, TicketStatus::Error, "KRUS").await;

        let err = h
            .engine
            .reconcile(fixtures::reply(MessageKind::Create, "C100", "RIAS_12", "new"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::BillingMismatch { .. }));

        let state = h.store.get("C100").await.unwrap().unwrap();
        assert_eq!(state.status, TicketStatus::Error);
        assert_eq!(h.notifier.notification_count().await, 0);
    }

    #[tokio::test]
    async fn test_first_rejection_reroutes_once() {
        let h = harness();
        seed(&h, TicketStatus::Creating, "RIAS_12").await;

        let outcome = h
            .engine
            .reconcile(fixtures::reply(MessageKind::Create, "C100", "RIAS_12", "error"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Rerouted {
                billing_channel: "KRUS".to_string()
            }
        );

        let state = h.store.get("C100").await.unwrap().unwrap();
        assert_eq!(state.status, TicketStatus::Error);
        assert_eq!(state.billing_channel, "KRUS");

        let produced = h.channel.produced().await;
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].kind, MessageKind::Create);
        assert_eq!(produced[0].billing_channel, "KRUS");
        assert_eq!(produced[0].operator_channel, "ABCD12-x");
        assert_eq!(produced[0].description, state.description);
        assert_eq!(h.notifier.notification_count().await, 0);
    }

    #[tokio::test]
    async fn test_rejection_from_krus_reroutes_to_rias() {
        let h = harness();
        h.store
            .put(&fixtures::ticket_state(
                "C100",
                "ABC1234-x",
                "KRUS",
                TicketStatus::Creating,
            ))
            .await
            .unwrap();

        let outcome = h
            .engine
            .reconcile(fixtures::reply(MessageKind::Create, "C100", "KRUS", "error"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Rerouted {
                billing_channel: "RIAS_12".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_second_rejection_is_terminal() {
        let h = harness();
        seed(&h, TicketStatus::Error, "KRUS").await;

        let outcome = h
            .engine
            .reconcile(fixtures::reply(MessageKind::Create, "C100", "KRUS", "error"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Exhausted { notified: true });
        assert_eq!(h.channel.produced_count().await, 0);

        let sent = h.notifier.notifications().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event.status, "error");
    }

    #[tokio::test]
    async fn test_terminal_failure_without_registered_source() {
        let h = harness();
        let mut state = fixtures::ticket_state("C100", "ABCD12-x", "KRUS", TicketStatus::Error);
        state.source = "unregistered".to_string();
        h.store.put(&state).await.unwrap();

        let outcome = h
            .engine
            .reconcile(fixtures::reply(MessageKind::Create, "C100", "KRUS", "error"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Exhausted { notified: false });
        assert_eq!(h.notifier.notification_count().await, 0);
    }

    #[tokio::test]
    async fn test_redelivered_first_rejection_is_terminal() {
        let h = harness();
        seed(&h, TicketStatus::Creating, "RIAS_12").await;
        let reply = fixtures::reply(MessageKind::Create, "C100", "RIAS_12", "error");

        h.engine.reconcile(reply.clone()).await.unwrap();
        h.channel.clear().await;

        let outcome = h.engine.reconcile(reply).await.unwrap();
        assert_eq!(outcome, Outcome::Exhausted { notified: true });
        assert_eq!(h.channel.produced_count().await, 0);
        assert_eq!(h.notifier.notification_count().await, 1);

        let state = h.store.get("C100").await.unwrap().unwrap();
        assert_eq!(state.status, TicketStatus::Error);
        assert_eq!(state.billing_channel, "KRUS");
    }

    #[tokio::test]
    async fn test_redelivered_acceptance_is_a_no_op() {
        let h = harness();
        seed(&h, TicketStatus::Creating, "RIAS_12").await;
        let reply = fixtures::reply(MessageKind::Create, "C100", "RIAS_12", "new");

        h.engine.reconcile(reply.clone()).await.unwrap();
        h.store
            .put(&fixtures::ticket_state(
                "C100",
                "ABCD12-x",
                "RIAS_12",
                TicketStatus::Waiting,
            ))
            .await
            .unwrap();

        assert_eq!(h.engine.reconcile(reply).await.unwrap(), Outcome::Duplicate);
        let state = h.store.get("C100").await.unwrap().unwrap();
        assert_eq!(state.status, TicketStatus::Waiting);
    }

    #[tokio::test]
    async fn test_rejection_after_acceptance_is_ignored() {
        let h = harness();
        seed(&h, TicketStatus::Working, "RIAS_12").await;

        let outcome = h
            .engine
            .reconcile(fixtures::reply(MessageKind::Create, "C100", "RIAS_12", "error"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Duplicate);
        assert_eq!(h.channel.produced_count().await, 0);
    }

    #[tokio::test]
    async fn test_rejection_without_alternate_is_terminal() {
        let h = harness();
        // KRUS with a RIAS-shaped code: no four digit run to derive an instance from.
        seed(&h, TicketStatus::Creating, "KRUS").await;

        let outcome = h
            .engine
            .reconcile(fixtures::reply(MessageKind::Create, "C100", "KRUS", "error"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Exhausted { notified: true });
        assert_eq!(h.channel.produced_count().await, 0);
        let state = h.store.get("C100").await.unwrap().unwrap();
        assert_eq!(state.status, TicketStatus::Error);
    }

    #[tokio::test]
    async fn test_status_note_wait_are_forwarded_without_transition() {
        let h = harness();
        seed(&h, TicketStatus::Working, "RIAS_12").await;

        for kind in [MessageKind::Status, MessageKind::Note, MessageKind::Wait] {
            let outcome = h
                .engine
                .reconcile(fixtures::reply(kind, "C100", "RIAS_12", "in progress"))
                .await
                .unwrap();
            assert_eq!(outcome, Outcome::Forwarded { notified: true });
        }

        let state = h.store.get("C100").await.unwrap().unwrap();
        assert_eq!(state.status, TicketStatus::Working);
        let kinds: Vec<_> = h
            .notifier
            .notifications()
            .await
            .into_iter()
            .map(|n| n.event.message_type)
            .collect();
        assert_eq!(kinds, vec![MessageKind::Status, MessageKind::Note, MessageKind::Wait]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let h = harness();
        seed(&h, TicketStatus::Working, "RIAS_12").await;
        let reply = fixtures::reply(MessageKind::Close, "C100", "RIAS_12", "closed");

        for _ in 0..2 {
            let outcome = h.engine.reconcile(reply.clone()).await.unwrap();
            assert_eq!(outcome, Outcome::Closed { notified: true });
            assert_eq!(
                h.store.get_status("C100").await.unwrap(),
                Some(TicketStatus::Closed)
            );
        }
    }

    #[tokio::test]
    async fn test_reopen_moves_to_working() {
        let h = harness();
        seed(&h, TicketStatus::Closed, "RIAS_12").await;

        let outcome = h
            .engine
            .reconcile(fixtures::reply(MessageKind::Reopen, "C100", "RIAS_12", ""))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Reopened { notified: true });
        assert_eq!(
            h.store.get_status("C100").await.unwrap(),
            Some(TicketStatus::Working)
        );
    }

    #[tokio::test]
    async fn test_reopen_leaves_pending_create_untouched() {
        for status in [TicketStatus::Creating, TicketStatus::Error] {
            let h = harness();
            seed(&h, status, "RIAS_12").await;

            let outcome = h
                .engine
                .reconcile(fixtures::reply(MessageKind::Reopen, "C100", "RIAS_12", ""))
                .await
                .unwrap();
            assert_eq!(outcome, Outcome::Duplicate);

            let state = h.store.get("C100").await.unwrap().unwrap();
            assert_eq!(state.status, status);
            assert!(state.operator_ticket_id.is_empty());
            assert_eq!(h.notifier.notification_count().await, 0);
        }
    }

    #[tokio::test]
    async fn test_reopen_from_waiting_moves_to_working() {
        let h = harness();
        seed(&h, TicketStatus::Waiting, "RIAS_12").await;

        let outcome = h
            .engine
            .reconcile(fixtures::reply(MessageKind::Reopen, "C100", "RIAS_12", ""))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Reopened { notified: true });
        assert_eq!(
            h.store.get_status("C100").await.unwrap(),
            Some(TicketStatus::Working)
        );
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_reconciliation() {
        let h = harness();
        seed(&h, TicketStatus::Creating, "RIAS_12").await;
        h.notifier.set_failing(true).await;

        let outcome = h
            .engine
            .reconcile(fixtures::reply(MessageKind::Create, "C100", "RIAS_12", "new"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Accepted { notified: false });
        assert_eq!(
            h.store.get_status("C100").await.unwrap(),
            Some(TicketStatus::Working)
        );
    }

    #[tokio::test]
    async fn test_failed_resubmit_is_reported() {
        let h = harness();
        seed(&h, TicketStatus::Creating, "RIAS_12").await;
        h.channel.set_failing(true).await;

        let err = h
            .engine
            .reconcile(fixtures::reply(MessageKind::Create, "C100", "RIAS_12", "error"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Channel(_)));
    }

    #[tokio::test]
    async fn test_process_swallows_errors() {
        let h = harness();
        let outcome = h
            .engine
            .process(fixtures::reply(MessageKind::Close, "C404", "KRUS", ""))
            .await;
        assert!(outcome.is_none());
    }
}
