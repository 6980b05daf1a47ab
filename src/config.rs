//! Adapter configuration: callback registration and supported application types.
//!
//! Mirrors `opcua::client::builder::ClientBuilder` in shape (a builder that yields an
//! immutable config), but the values held here are the dispatcher-context callbacks
//! and bitmask described in spec §6, not connection parameters.

use bitflags::bitflags;

use crate::message::{Message, StatusCallbackKind};

bitflags! {
    /// `supportedApplicationTypes` bitmask from spec §6.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SupportedApplicationTypes: u8 {
        const SERVER = 1;
        const CLIENT = 2;
        const CLIENT_AND_SERVER = 4;
        const DISCOVERY_SERVER = 8;
    }
}

/// Callback invoked by the dispatcher thread for every receive-queue entry whose
/// concrete routing (`resp_msg_cb` / `browse_msg_cb` / `monitored_msg_cb` / `error_msg_cb`)
/// has already been resolved by `Message::kind()`.
pub type RecvCallback = Box<dyn Fn(Message) + Send + Sync>;

/// Callback invoked for status transitions (`{SERVER,CLIENT}_STARTED`,
/// `STOP_{SERVER,CLIENT}`, `{CONNECTED,DISCONNECTED}`), already bucketed by kind.
pub type StatusCallback = Box<dyn Fn(StatusCallbackKind) + Send + Sync>;

/// Callback invoked with the results of a `findServers` discovery round.
pub type DiscoveryCallback = Box<dyn Fn(&[crate::message::EndpointInfo]) + Send + Sync>;

/// The dispatcher context: an explicit struct replacing the C source's
/// `receivedMsgCb`/`statusCb`/`discoveryCb` global singletons (spec Design Note 9).
pub struct EdgeConfig {
    pub recv_callback: Option<RecvCallback>,
    pub status_callback: Option<StatusCallback>,
    pub discovery_callback: Option<DiscoveryCallback>,
    pub supported_application_types: SupportedApplicationTypes,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            recv_callback: None,
            status_callback: None,
            discovery_callback: None,
            supported_application_types: SupportedApplicationTypes::CLIENT,
        }
    }
}

impl std::fmt::Debug for EdgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeConfig")
            .field("recv_callback", &self.recv_callback.is_some())
            .field("status_callback", &self.status_callback.is_some())
            .field("discovery_callback", &self.discovery_callback.is_some())
            .field(
                "supported_application_types",
                &self.supported_application_types,
            )
            .finish()
    }
}

/// Builder for [`EdgeConfig`], following the same yield-on-build pattern as
/// `opcua::client::builder::ClientBuilder`.
#[derive(Default)]
pub struct EdgeConfigBuilder {
    config: EdgeConfig,
}

impl EdgeConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recv_callback<F>(mut self, cb: F) -> Self
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.config.recv_callback = Some(Box::new(cb));
        self
    }

    pub fn status_callback<F>(mut self, cb: F) -> Self
    where
        F: Fn(StatusCallbackKind) + Send + Sync + 'static,
    {
        self.config.status_callback = Some(Box::new(cb));
        self
    }

    pub fn discovery_callback<F>(mut self, cb: F) -> Self
    where
        F: Fn(&[crate::message::EndpointInfo]) + Send + Sync + 'static,
    {
        self.config.discovery_callback = Some(Box::new(cb));
        self
    }

    pub fn supported_application_types(mut self, types: SupportedApplicationTypes) -> Self {
        self.config.supported_application_types = types;
        self
    }

    pub fn build(self) -> EdgeConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_supports_client_only() {
        let config = EdgeConfig::default();
        assert_eq!(
            config.supported_application_types,
            SupportedApplicationTypes::CLIENT
        );
    }

    #[test]
    fn builder_sets_bitmask() {
        let config = EdgeConfigBuilder::new()
            .supported_application_types(
                SupportedApplicationTypes::SERVER | SupportedApplicationTypes::CLIENT,
            )
            .build();
        assert!(config
            .supported_application_types
            .contains(SupportedApplicationTypes::SERVER));
        assert!(config
            .supported_application_types
            .contains(SupportedApplicationTypes::CLIENT));
        assert!(!config
            .supported_application_types
            .contains(SupportedApplicationTypes::DISCOVERY_SERVER));
    }
}
