//! Subscription engine (component C8): per-session publish pump, monitored-item
//! lifecycle, and notification routing, per spec §4.4.
//!
//! Grounded on `opcua::client::session::session::Session::run_async`/`run_loop`,
//! whose `thread::spawn` + sleep-poll shape is exactly the "parallel OS threads with
//! cooperative serialization through one mutex per underlying client" model from
//! spec §5; `POLL_SLEEP_INTERVAL` there plays the same role as
//! `EDGE_UA_MINIMUM_PUBLISHING_TIME` here. `SubscriptionService::create_subscription`
//! /`MonitoredItemService::create_monitored_items` (etc.) in
//! `opcua::client::prelude` are the wire calls the serialization mutex guards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::attributes::{decode_variant, RawVariant};
use crate::error::{EdgeError, EdgeResult};
use crate::message::{Message, NodeInfo, Response, Value};
use crate::ordered_map::OrderedMap;
use crate::status::EdgeStatusCode;

/// `EDGE_UA_MINIMUM_PUBLISHING_TIME` (spec §4.4): the pump's run-cycle timeout and
/// sleep interval.
pub const PUBLISH_PUMP_INTERVAL: Duration = Duration::from_millis(5);

/// The republish retransmit sequence number spec §4.4 fixes at 2.
pub const REPUBLISH_SEQUENCE_NUMBER: u32 = 2;

/// One entry in a session's subscription list, keyed by `valueAlias` (spec §4.4).
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub subscription_id: u32,
    pub monitored_item_id: u32,
    pub registered_message: Message,
}

/// The per-session subscription list plus its running subscription count, per spec
/// §4.4's `clientSubscription` struct (the pump thread handle itself lives in
/// [`PublishPump`], kept separate so this type stays plain data for unit tests).
pub struct SubscriptionTable {
    records: OrderedMap<String, SubscriptionRecord>,
}

impl Default for SubscriptionTable {
    fn default() -> Self {
        Self {
            records: OrderedMap::new(),
        }
    }
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains_alias(&self, alias: &str) -> bool {
        self.records.contains_key(&alias.to_string())
    }

    pub fn get(&self, alias: &str) -> Option<&SubscriptionRecord> {
        self.records.get(&alias.to_string())
    }

    pub fn insert(&mut self, alias: String, record: SubscriptionRecord) {
        self.records.insert_new(alias, record);
    }

    pub fn remove(&mut self, alias: &str) -> Option<SubscriptionRecord> {
        self.records.remove(&alias.to_string())
    }

    /// True if no remaining record references `subscription_id` — the condition
    /// under which `Edge_Delete_Sub` also removes the subscription itself (spec
    /// §4.4).
    pub fn subscription_still_referenced(&self, subscription_id: u32) -> bool {
        self.records
            .values()
            .any(|r| r.subscription_id == subscription_id)
    }
}

/// Pre-validates a create batch against spec §4.4: any duplicate `valueAlias`
/// within the batch, or any alias already present in the session's subscription
/// list, aborts the whole batch with `BADREQUESTCANCELLEDBYCLIENT` — no partial
/// creation happens on the server.
pub fn validate_create_batch(
    nodes: &[NodeInfo],
    existing: &SubscriptionTable,
) -> EdgeResult<()> {
    let mut seen = std::collections::HashSet::new();
    for node in nodes {
        if !seen.insert(node.value_alias.clone()) {
            return Err(EdgeError::DuplicateAlias(node.value_alias.clone()));
        }
        if existing.contains_alias(&node.value_alias) {
            return Err(EdgeError::AliasAlreadyExists(node.value_alias.clone()));
        }
    }
    Ok(())
}

/// The status this crate's `BADREQUESTCANCELLEDBYCLIENT` corresponds to, for
/// callers that need the [`EdgeStatusCode`] rather than the synchronous
/// [`EdgeError`] (the façade surfaces both, per spec §4.4/§7).
pub fn duplicate_alias_status() -> EdgeStatusCode {
    EdgeStatusCode::BadRequestCancelledByClient
}

/// A decoded data-change notification, ready to become a `REPORT` message.
pub struct Notification {
    pub value: Value,
    pub server_time: DateTime<Utc>,
}

/// The data-change handler's decode step (spec §4.4): skips notifications whose
/// status is not OK or that carry no value; otherwise decodes the value with the
/// same rules the reader uses, and falls back to wall-clock `now` when the server
/// supplied no timestamp.
pub fn decode_notification(
    status_ok: bool,
    raw_value: Option<RawVariant>,
    server_timestamp: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> EdgeResult<Option<Notification>> {
    if !status_ok {
        return Ok(None);
    }
    let Some(raw) = raw_value else {
        return Ok(None);
    };
    let value = decode_variant(&raw)?;
    Ok(Some(Notification {
        value,
        server_time: server_timestamp.unwrap_or(now),
    }))
}

/// Builds the `REPORT` message the data-change handler enqueues, carrying the
/// looked-up record's endpoint and the decoded notification (spec §4.4).
pub fn build_report(
    message_id: u32,
    record: &SubscriptionRecord,
    node: NodeInfo,
    notification: Notification,
) -> Message {
    Message::Report {
        message_id,
        endpoint: record.registered_message.endpoint().clone(),
        responses: vec![Response {
            node,
            value: notification.value,
            request_id: 0,
            diagnostic_info: None,
            browse_result: None,
        }],
        server_time: notification.server_time,
    }
}

/// Outcome of a republish attempt, after spec §4.4's downgrade rule:
/// `BADMESSAGENOTAVAILABLE` is logged as a warning rather than surfaced as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepublishOutcome {
    Delivered,
    WarnOnly,
    Error(EdgeStatusCode),
}

pub fn classify_republish_result(status: EdgeStatusCode) -> RepublishOutcome {
    match status {
        EdgeStatusCode::Ok => RepublishOutcome::Delivered,
        EdgeStatusCode::BadMessageNotAvailable => {
            log::warn!("republish: message not available, ignoring");
            RepublishOutcome::WarnOnly
        }
        other => RepublishOutcome::Error(other),
    }
}

/// The per-session publish-pump thread (spec §4.4/§5): started when a session's
/// subscription count goes from zero to one, joined when it returns to zero or on
/// explicit `stopSubscriptionThread`. `serialization_lock` is the mutex the pump
/// shares with every other synchronous call to the same underlying client.
pub struct PublishPump {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PublishPump {
    /// Spawns the pump thread. `run_cycle` performs one acquire-run-release cycle
    /// under `serialization_lock` and is called once per `PUBLISH_PUMP_INTERVAL`
    /// sleep, mirroring `Session::run_loop`'s `POLL_SLEEP_INTERVAL` cadence.
    pub fn start<F>(serialization_lock: Arc<Mutex<()>>, run_cycle: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();
        let handle = std::thread::Builder::new()
            .name("opcua-edge-publish-pump".to_string())
            .spawn(move || {
                while running_thread.load(Ordering::SeqCst) {
                    {
                        let _guard = serialization_lock.lock();
                        run_cycle();
                    }
                    std::thread::sleep(PUBLISH_PUMP_INTERVAL);
                }
            })
            .expect("failed to spawn publish pump thread");
        Self {
            running,
            handle: Some(handle),
        }
    }

    /// `stopSubscriptionThread` (spec §4.4): flips the running flag and joins.
    /// Safe to call from any thread; reacts within one sleep interval (spec §5).
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for PublishPump {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{
        ApplicationConfig, ApplicationKind, Command, EndpointInfo, NodeId, SecurityMode,
    };
    use std::sync::atomic::AtomicUsize;

    fn dummy_endpoint() -> EndpointInfo {
        EndpointInfo {
            endpoint_uri: "opc.tcp://localhost:4840".to_string(),
            security_policy_uri: String::new(),
            transport_profile_uri: String::new(),
            security_mode: SecurityMode::None,
            security_level: 0,
            application: ApplicationConfig {
                application_uri: "urn:test".to_string(),
                application_name: "test".to_string(),
                product_uri: String::new(),
                application_type: ApplicationKind::Client,
                gateway_uri: String::new(),
                discovery_profile_uri: String::new(),
                discovery_urls: vec![],
            },
        }
    }

    fn dummy_message() -> Message {
        Message::SendRequest {
            message_id: 1,
            endpoint: dummy_endpoint(),
            command: Command::Subscribe,
            request: crate::message::Request::new(
                NodeInfo {
                    node_id: NodeId::string(2, "Counter"),
                    value_alias: "Counter".to_string(),
                },
                0,
            ),
        }
    }

    #[test]
    fn duplicate_alias_within_batch_is_rejected() {
        let table = SubscriptionTable::new();
        let nodes = vec![
            NodeInfo {
                node_id: NodeId::string(2, "a"),
                value_alias: "a".to_string(),
            },
            NodeInfo {
                node_id: NodeId::string(2, "b"),
                value_alias: "b".to_string(),
            },
            NodeInfo {
                node_id: NodeId::string(2, "a"),
                value_alias: "a".to_string(),
            },
        ];
        let err = validate_create_batch(&nodes, &table).unwrap_err();
        assert!(matches!(err, EdgeError::DuplicateAlias(alias) if alias == "a"));
    }

    #[test]
    fn alias_already_on_session_is_rejected() {
        let mut table = SubscriptionTable::new();
        table.insert(
            "a".to_string(),
            SubscriptionRecord {
                subscription_id: 1,
                monitored_item_id: 1,
                registered_message: dummy_message(),
            },
        );
        let nodes = vec![NodeInfo {
            node_id: NodeId::string(2, "a"),
            value_alias: "a".to_string(),
        }];
        assert!(validate_create_batch(&nodes, &table).is_err());
    }

    #[test]
    fn delete_removes_subscription_only_when_unreferenced() {
        let mut table = SubscriptionTable::new();
        table.insert(
            "a".to_string(),
            SubscriptionRecord {
                subscription_id: 1,
                monitored_item_id: 1,
                registered_message: dummy_message(),
            },
        );
        table.insert(
            "b".to_string(),
            SubscriptionRecord {
                subscription_id: 1,
                monitored_item_id: 2,
                registered_message: dummy_message(),
            },
        );
        table.remove("a");
        assert!(table.subscription_still_referenced(1));
        table.remove("b");
        assert!(!table.subscription_still_referenced(1));
    }

    #[test]
    fn notification_skipped_when_status_not_ok() {
        let now = DateTime::parse_from_rfc3339("2026-07-31T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let result = decode_notification(false, Some(RawVariant::Scalar(
            crate::attributes::RawScalar::Int32(7),
        )), None, now)
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn notification_falls_back_to_wall_clock_when_server_time_absent() {
        let now = DateTime::parse_from_rfc3339("2026-07-31T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let result = decode_notification(
            true,
            Some(RawVariant::Scalar(crate::attributes::RawScalar::Int32(7))),
            None,
            now,
        )
        .unwrap()
        .unwrap();
        assert_eq!(result.server_time, now);
    }

    #[test]
    fn republish_message_not_available_is_warn_only() {
        assert_eq!(
            classify_republish_result(EdgeStatusCode::BadMessageNotAvailable),
            RepublishOutcome::WarnOnly
        );
        assert_eq!(
            classify_republish_result(EdgeStatusCode::Ok),
            RepublishOutcome::Delivered
        );
    }

    #[test]
    fn pump_stops_within_one_interval() {
        let lock = Arc::new(Mutex::new(()));
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks2 = ticks.clone();
        let pump = PublishPump::start(lock, move || {
            ticks2.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(20));
        assert!(ticks.load(Ordering::SeqCst) > 0);
        pump.stop();
    }
}
