use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderping_core::types::NotificationStatus;

use crate::{Store, StoreError};

const SENT_COUNTER: &str = "metrics:messages_sent_total";
const FAILED_COUNTER: &str = "metrics:messages_failed_total";
const WEBHOOK_ERROR_COUNTER: &str = "metrics:webhook_error_count";
const RATE_LIMIT_PREFIX: &str = "ratelimit:";

/// Stored outcome of one notification attempt.
///
/// Observability aid with bounded retention, not a system of record: the
/// entry is overwritten when the platform redelivers and the attempt is
/// retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub order_id: i64,
    #[serde(flatten)]
    pub outcome: NotificationStatus,
    pub recorded_at: DateTime<Utc>,
}

/// Read-only view over the ledger counters for the health surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub messages_sent_total: u64,
    pub messages_failed_total: u64,
    pub webhook_error_count: u64,
    pub active_rate_limit_keys: u64,
}

/// Persists per-order notification outcomes and aggregate counters in the
/// shared store, so they survive restarts and are shared across instances.
#[derive(Clone)]
pub struct DeliveryLedger {
    store: Store,
    retention: Duration,
}

impl DeliveryLedger {
    pub fn new(store: Store, retention: Duration) -> Self {
        Self { store, retention }
    }

    /// Writes the outcome for an order and bumps the matching aggregate
    /// counter. One record per order id; a retried delivery overwrites it.
    pub async fn record(
        &self,
        order_id: i64,
        outcome: NotificationStatus,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let counter = match &outcome {
            NotificationStatus::Sent { .. } => Some(SENT_COUNTER),
            NotificationStatus::Failed { .. } => Some(FAILED_COUNTER),
            NotificationStatus::Skipped { .. } => None,
        };

        let record = NotificationRecord {
            order_id,
            outcome,
            recorded_at,
        };
        let json = serde_json::to_string(&record)?;
        self.store
            .put_record(&record_key(order_id), &json, self.retention)
            .await?;

        if let Some(counter) = counter {
            self.store.incr_counter(counter).await?;
        }
        Ok(())
    }

    pub async fn read(&self, order_id: i64) -> Result<Option<NotificationRecord>, StoreError> {
        let raw = self.store.get_record(&record_key(order_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Claims a platform delivery id. Returns `false` when this delivery was
    /// already processed within the retention window, in which case the
    /// caller must not dispatch again.
    pub async fn mark_delivery(&self, delivery_id: &str) -> Result<bool, StoreError> {
        self.store
            .set_once(&format!("delivery:{delivery_id}"), self.retention)
            .await
    }

    /// Counts a webhook rejected at the parse boundary.
    pub async fn record_webhook_error(&self) -> Result<u64, StoreError> {
        self.store.incr_counter(WEBHOOK_ERROR_COUNTER).await
    }

    pub async fn snapshot(&self) -> Result<LedgerSnapshot, StoreError> {
        Ok(LedgerSnapshot {
            messages_sent_total: self.store.get_counter(SENT_COUNTER).await?,
            messages_failed_total: self.store.get_counter(FAILED_COUNTER).await?,
            webhook_error_count: self.store.get_counter(WEBHOOK_ERROR_COUNTER).await?,
            active_rate_limit_keys: self.store.count_keys(RATE_LIMIT_PREFIX).await?,
        })
    }
}

fn record_key(order_id: i64) -> String {
    format!("notification:{order_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> DeliveryLedger {
        DeliveryLedger::new(Store::in_memory(), Duration::from_secs(60))
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .expect("fixed time")
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn records_round_trip_and_bump_counters() {
        let ledger = ledger();
        ledger
            .record(
                42,
                NotificationStatus::Sent {
                    message_id: "wamid.1".to_string(),
                },
                now(),
            )
            .await
            .expect("record");

        let record = ledger.read(42).await.expect("read").expect("present");
        assert_eq!(record.order_id, 42);
        assert_eq!(
            record.outcome,
            NotificationStatus::Sent {
                message_id: "wamid.1".to_string()
            }
        );

        let snapshot = ledger.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.messages_sent_total, 1);
        assert_eq!(snapshot.messages_failed_total, 0);
    }

    #[tokio::test]
    async fn failed_outcomes_count_separately() {
        let ledger = ledger();
        ledger
            .record(
                1,
                NotificationStatus::Failed {
                    reason: "provider_rejected: 500".to_string(),
                },
                now(),
            )
            .await
            .expect("record");
        ledger
            .record(
                2,
                NotificationStatus::Skipped {
                    reason: "no_valid_phone".to_string(),
                },
                now(),
            )
            .await
            .expect("record");

        let snapshot = ledger.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.messages_sent_total, 0);
        assert_eq!(snapshot.messages_failed_total, 1);
        assert_eq!(snapshot.webhook_error_count, 0);
    }

    #[tokio::test]
    async fn retry_overwrites_the_previous_record() {
        let ledger = ledger();
        ledger
            .record(
                7,
                NotificationStatus::Failed {
                    reason: "transient".to_string(),
                },
                now(),
            )
            .await
            .expect("record");
        ledger
            .record(
                7,
                NotificationStatus::Sent {
                    message_id: "wamid.2".to_string(),
                },
                now(),
            )
            .await
            .expect("record");

        let record = ledger.read(7).await.expect("read").expect("present");
        assert_eq!(record.outcome.as_str(), "sent");
    }

    #[tokio::test]
    async fn delivery_ids_are_claimed_once() {
        let ledger = ledger();
        assert!(ledger.mark_delivery("d-1").await.expect("mark"));
        assert!(!ledger.mark_delivery("d-1").await.expect("mark"));
        assert!(ledger.mark_delivery("d-2").await.expect("mark"));
    }

    #[tokio::test]
    async fn missing_record_reads_as_none() {
        let ledger = ledger();
        assert!(ledger.read(999).await.expect("read").is_none());
    }
}
