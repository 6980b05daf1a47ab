//! Session registry (component C4): a process-wide `host:port` → connected client
//! map, per spec §4.1.
//!
//! Grounded on `opcua::client::client::Client::connect_to_endpoint`, which returns
//! `Arc<RwLock<Session>>` for exactly this reason — a session is shared between the
//! caller's thread, the publish-pump thread, and the dispatcher. `SessionRegistry<T>`
//! is generic over the connected-session handle so the browse/subscription/attribute
//! unit tests can inject a fake connector instead of dialing a real server.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EdgeError, EdgeResult};
use crate::message::StatusCallbackKind;
use crate::ordered_map::OrderedMap;

/// Splits an `opc.tcp://host[:port][/path]` URI into its normalized `host:port` key
/// and the informational path, per spec §4.1 ("Keys are normalized to `host:port`;
/// this is the only identity used — the path portion is informational").
///
/// A URI lacking an explicit port is accepted as-is and not rewritten — see spec
/// §9 Open Question (a); the regex-style port check in the source is informational
/// logging only, and that is reproduced via [`missing_port_warning`].
pub fn parse_endpoint_key(uri: &str) -> EdgeResult<(String, Option<String>)> {
    let rest = uri
        .strip_prefix("opc.tcp://")
        .ok_or_else(|| EdgeError::InvalidEndpointUri(uri.to_string()))?;
    if rest.is_empty() {
        return Err(EdgeError::InvalidEndpointUri(uri.to_string()));
    }
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], Some(rest[idx..].to_string())),
        None => (rest, None),
    };
    if authority.is_empty() {
        return Err(EdgeError::InvalidEndpointUri(uri.to_string()));
    }
    Ok((authority.to_string(), path))
}

/// Logged when an endpoint URI has no explicit `:<port>` segment. No rewrite is
/// performed — this is purely informational, matching the source's dead-looking
/// but intentionally preserved behavior.
pub fn missing_port_warning(key: &str) {
    if !key.contains(':') {
        log::info!("endpoint `{key}` has no explicit port; using as-is");
    }
}

/// A registered client entry: the connected handle plus the original URI it was
/// created from (needed to re-derive the key on disconnect).
struct Entry<T> {
    client: T,
}

/// The process-wide session registry. `T` is the connected-session handle type;
/// production code instantiates this with `Arc<RwLock<opcua::client::prelude::Session>>`.
pub struct SessionRegistry<T> {
    sessions: RwLock<OrderedMap<String, Entry<T>>>,
    connector: Box<dyn Fn(&str) -> Option<T> + Send + Sync>,
    status_callback: Option<Box<dyn Fn(StatusCallbackKind) + Send + Sync>>,
}

impl<T: Clone> SessionRegistry<T> {
    pub fn new<F>(connector: F) -> Self
    where
        F: Fn(&str) -> Option<T> + Send + Sync + 'static,
    {
        Self {
            sessions: RwLock::new(OrderedMap::new()),
            connector: Box::new(connector),
            status_callback: None,
        }
    }

    pub fn with_status_callback<F>(mut self, cb: F) -> Self
    where
        F: Fn(StatusCallbackKind) + Send + Sync + 'static,
    {
        self.status_callback = Some(Box::new(cb));
        self
    }

    fn fire_status(&self, kind: StatusCallbackKind) {
        if let Some(cb) = &self.status_callback {
            cb(kind);
        }
    }

    /// `connect(endpointUri)` (spec §4.1). Returns `Ok(true)` on success and
    /// `Ok(false)` if a session for this key is already connected (registry
    /// uniqueness, spec §8) rather than an error — a duplicate connect is a normal,
    /// expected outcome the caller is expected to check.
    pub fn connect(&self, endpoint_uri: &str) -> EdgeResult<bool> {
        let (key, _path) = parse_endpoint_key(endpoint_uri)?;
        missing_port_warning(&key);

        if self.sessions.read().contains_key(&key) {
            return Ok(false);
        }

        let client = match (self.connector)(&key) {
            Some(client) => client,
            None => return Err(EdgeError::ConnectFailed(key)),
        };

        let mut sessions = self.sessions.write();
        if !sessions.insert_new(key.clone(), Entry { client }) {
            // Lost a race against another connect to the same key between the
            // read-lock check above and taking the write lock.
            return Ok(false);
        }
        drop(sessions);

        self.fire_status(StatusCallbackKind::Started { is_server: false });
        Ok(true)
    }

    /// Registers an already-connected client under `endpoint_uri`'s normalized key,
    /// for callers (like `connect_client`) that dial the connection themselves
    /// rather than going through the registry's own `connector`. Same uniqueness and
    /// status-callback semantics as [`Self::connect`].
    pub fn insert(&self, endpoint_uri: &str, client: T) -> EdgeResult<bool> {
        let (key, _path) = parse_endpoint_key(endpoint_uri)?;
        missing_port_warning(&key);

        if self.sessions.read().contains_key(&key) {
            return Ok(false);
        }

        let mut sessions = self.sessions.write();
        if !sessions.insert_new(key.clone(), Entry { client }) {
            return Ok(false);
        }
        drop(sessions);

        self.fire_status(StatusCallbackKind::Started { is_server: false });
        Ok(true)
    }

    /// `disconnect(endpointInfo)` (spec §4.1). Idempotent: a second call for an
    /// already-absent key is a no-op that fires no status callback (spec §8).
    pub fn disconnect(&self, endpoint_uri: &str) -> EdgeResult<()> {
        let (key, _path) = parse_endpoint_key(endpoint_uri)?;
        let removed = self.sessions.write().remove(&key);
        if removed.is_some() {
            self.fire_status(StatusCallbackKind::Stopped { is_server: false });
        }
        Ok(())
    }

    /// `get(endpointUri)` (spec §4.1).
    pub fn get(&self, endpoint_uri: &str) -> EdgeResult<T> {
        let (key, _path) = parse_endpoint_key(endpoint_uri)?;
        self.sessions
            .read()
            .get(&key)
            .map(|entry| entry.client.clone())
            .ok_or_else(|| EdgeError::NoSuchSession(key))
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// Production alias: an underlying `opcua` client session, shared the same way the
/// library itself shares it (`Client::connect_to_endpoint` returns this exact type).
pub type SharedSession = Arc<RwLock<opcua::client::prelude::Session>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn parses_host_port_and_path() {
        let (key, path) = parse_endpoint_key("opc.tcp://localhost:4840/foo/bar").unwrap();
        assert_eq!(key, "localhost:4840");
        assert_eq!(path, Some("/foo/bar".to_string()));
    }

    #[test]
    fn parses_without_port_unchanged() {
        let (key, path) = parse_endpoint_key("opc.tcp://localhost").unwrap();
        assert_eq!(key, "localhost");
        assert_eq!(path, None);
    }

    #[test]
    fn rejects_non_opc_tcp_scheme() {
        assert!(parse_endpoint_key("http://localhost:4840").is_err());
    }

    #[test]
    fn duplicate_connect_returns_false_without_touching_existing_session() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let registry: SessionRegistry<u32> = SessionRegistry::new(move |_key| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Some(42)
        });

        assert_eq!(registry.connect("opc.tcp://localhost:4840").unwrap(), true);
        assert_eq!(registry.connect("opc.tcp://localhost:4840").unwrap(), false);
        assert_eq!(registry.len(), 1);
        // The connector must not be invoked again for the duplicate attempt.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connect_failure_does_not_insert_entry() {
        let registry: SessionRegistry<u32> = SessionRegistry::new(|_key| None);
        assert!(registry.connect("opc.tcp://localhost:4840").is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn disconnect_is_idempotent_and_fires_status_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let stops2 = stops.clone();
        let registry: SessionRegistry<u32> = SessionRegistry::new(|_key| Some(1))
            .with_status_callback(move |kind| {
                if matches!(kind, StatusCallbackKind::Stopped { .. }) {
                    stops2.fetch_add(1, Ordering::SeqCst);
                }
            });
        registry.connect("opc.tcp://localhost:4840").unwrap();
        registry.disconnect("opc.tcp://localhost:4840").unwrap();
        registry.disconnect("opc.tcp://localhost:4840").unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn get_resolves_by_normalized_key() {
        let registry: SessionRegistry<u32> = SessionRegistry::new(|_key| Some(7));
        registry.connect("opc.tcp://localhost:4840/Foo").unwrap();
        assert_eq!(registry.get("opc.tcp://localhost:4840").unwrap(), 7);
    }
}
