//! Delivery queues (component C3): two bounded FIFOs — send and receive — each
//! drained by a single consumer thread, per spec §4.6/§5.
//!
//! Grounded on the same shape as `opcua` 0.12's `Session::run_loop` (a dedicated
//! thread parked on a sleep/poll cycle), but here the consumer blocks on
//! queue-not-empty rather than sleeping, since the receive queue is pushed to from
//! arbitrary caller and pump threads rather than polled.

use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::message::{Message, StatusCallbackKind};

/// Default bound on the receive queue before `send` blocks the producer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// The receive side: a bounded queue plus the dispatcher thread that drains it and
/// routes each entry to exactly one application callback by `Message` variant, per
/// spec §4.6 ("inspects `msg.type` and calls exactly one of ..."; unknown types are
/// silently dropped — vacuously satisfied here since `Message` is a closed enum).
pub struct ReceiveQueue {
    sender: Option<SyncSender<Message>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl ReceiveQueue {
    /// Spawns the dispatcher thread, routing `GeneralResponse` into `resp_cb`,
    /// `BrowseResponse` into `browse_cb`, `Report` into `monitored_cb`, and `Error`
    /// into `error_cb` — the four routing buckets from spec §4.6.
    pub fn spawn<RespCb, BrowseCb, MonitoredCb, ErrorCb>(
        capacity: usize,
        resp_cb: RespCb,
        browse_cb: BrowseCb,
        monitored_cb: MonitoredCb,
        error_cb: ErrorCb,
    ) -> Self
    where
        RespCb: Fn(Message) + Send + 'static,
        BrowseCb: Fn(Message) + Send + 'static,
        MonitoredCb: Fn(Message) + Send + 'static,
        ErrorCb: Fn(Message) + Send + 'static,
    {
        let (sender, receiver) = sync_channel(capacity);
        let dispatcher = std::thread::Builder::new()
            .name("opcua-edge-dispatcher".to_string())
            .spawn(move || dispatch_loop(receiver, resp_cb, browse_cb, monitored_cb, error_cb))
            .expect("failed to spawn dispatcher thread");
        Self {
            sender: Some(sender),
            dispatcher: Some(dispatcher),
        }
    }

    /// Enqueues a message for delivery. Blocks the caller if the queue is full,
    /// matching the bounded-FIFO behavior spec §4.6 describes.
    pub fn push(&self, message: Message) {
        let sent = self
            .sender
            .as_ref()
            .map(|sender| sender.send(message))
            .unwrap_or(Ok(()));
        if sent.is_err() {
            log::warn!("receive queue dispatcher has already shut down; dropping message");
        }
    }
}

impl Drop for ReceiveQueue {
    fn drop(&mut self) {
        // A custom `Drop::drop` runs before a struct's fields are dropped, not
        // after — so `sender` must be dropped explicitly here, or `dispatch_loop`
        // never sees `Disconnected` and `join` below blocks forever.
        drop(self.sender.take());
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}

fn dispatch_loop<RespCb, BrowseCb, MonitoredCb, ErrorCb>(
    receiver: Receiver<Message>,
    resp_cb: RespCb,
    browse_cb: BrowseCb,
    monitored_cb: MonitoredCb,
    error_cb: ErrorCb,
) where
    RespCb: Fn(Message),
    BrowseCb: Fn(Message),
    MonitoredCb: Fn(Message),
    ErrorCb: Fn(Message),
{
    loop {
        match receiver.recv_timeout(Duration::from_millis(200)) {
            Ok(message) => match &message {
                Message::GeneralResponse { .. } => resp_cb(message),
                Message::BrowseResponse { .. } => browse_cb(message),
                Message::Report { .. } => monitored_cb(message),
                Message::Error { .. } => error_cb(message),
                Message::SendRequest { .. } | Message::SendRequests { .. } => {
                    log::debug!("dropping request-shaped message routed to receive queue")
                }
            },
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Routes a [`StatusCallbackKind`] to `start_cb`/`stop_cb`/`network_cb`, per spec
/// §4.6's status-callback routing table.
pub fn dispatch_status<StartCb, StopCb, NetworkCb>(
    kind: StatusCallbackKind,
    start_cb: &StartCb,
    stop_cb: &StopCb,
    network_cb: &NetworkCb,
) where
    StartCb: Fn(bool),
    StopCb: Fn(bool),
    NetworkCb: Fn(bool),
{
    match kind {
        StatusCallbackKind::Started { is_server } => start_cb(is_server),
        StatusCallbackKind::Stopped { is_server } => stop_cb(is_server),
        StatusCallbackKind::Network { connected } => network_cb(connected),
    }
}

/// The send side: callers push requests here; a single consumer thread (supplied by
/// the façade) drains them. Kept generic over the item type so the façade can reuse
/// it for both `Message` batches and already-decomposed single requests.
pub struct SendQueue<T> {
    sender: SyncSender<T>,
    receiver: Arc<parking_lot::Mutex<Receiver<T>>>,
}

impl<T> SendQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = sync_channel(capacity);
        Self {
            sender,
            receiver: Arc::new(parking_lot::Mutex::new(receiver)),
        }
    }

    pub fn push(&self, item: T) -> Result<(), T> {
        self.sender.send(item).map_err(|e| e.0)
    }

    /// Blocks until an item is available or the queue is closed.
    pub fn pop(&self) -> Option<T> {
        self.receiver.lock().recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ApplicationKind, Command, EndpointInfo, NodeId, NodeInfo, SecurityMode};
    use crate::status::EdgeStatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dummy_endpoint() -> EndpointInfo {
        EndpointInfo {
            endpoint_uri: "opc.tcp://localhost:4840".to_string(),
            security_policy_uri: "http://opcfoundation.org/UA/SecurityPolicy#None".to_string(),
            transport_profile_uri: String::new(),
            security_mode: SecurityMode::None,
            security_level: 0,
            application: crate::message::ApplicationConfig {
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

    #[test]
    fn dispatcher_routes_by_message_variant() {
        let resp_hits = Arc::new(AtomicUsize::new(0));
        let browse_hits = Arc::new(AtomicUsize::new(0));
        let error_hits = Arc::new(AtomicUsize::new(0));

        let (r1, r2, r3) = (resp_hits.clone(), browse_hits.clone(), error_hits.clone());
        let queue = ReceiveQueue::spawn(
            8,
            move |_| {
                r1.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                r2.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {},
            move |_| {
                r3.fetch_add(1, Ordering::SeqCst);
            },
        );

        let node = NodeInfo {
            node_id: NodeId::integer(0, 84),
            value_alias: "{0;i}84".to_string(),
        };

        queue.push(Message::GeneralResponse {
            message_id: 1,
            endpoint: dummy_endpoint(),
            command: Command::Read,
            responses: vec![],
            result: EdgeStatusCode::Ok,
        });
        queue.push(Message::error(
            2,
            dummy_endpoint(),
            Command::Read,
            node,
            EdgeStatusCode::InternalError,
        ));

        // Give the dispatcher thread a moment to drain both entries.
        std::thread::sleep(Duration::from_millis(100));
        drop(queue);

        assert_eq!(resp_hits.load(Ordering::SeqCst), 1);
        assert_eq!(browse_hits.load(Ordering::SeqCst), 0);
        assert_eq!(error_hits.load(Ordering::SeqCst), 1);
    }
}
