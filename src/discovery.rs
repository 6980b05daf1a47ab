//! Discovery (component C5): `FindServers` and `GetEndpoints` with validation
//! filters, per spec §4.5.
//!
//! Decomposed into pure validation functions kept separate from the one service
//! call each operation needs (`DiscoveryService::find_servers` /
//! `DiscoveryService::get_endpoints` in `opcua::client::prelude`), so the filter
//! rules are unit-testable without a live discovery server.

use crate::config::SupportedApplicationTypes;
use crate::message::{ApplicationConfig, ApplicationKind, EndpointInfo};

fn application_type_bit(kind: ApplicationKind) -> SupportedApplicationTypes {
    match kind {
        ApplicationKind::Server => SupportedApplicationTypes::SERVER,
        ApplicationKind::Client => SupportedApplicationTypes::CLIENT,
        ApplicationKind::ClientAndServer => SupportedApplicationTypes::CLIENT_AND_SERVER,
        ApplicationKind::DiscoveryServer => SupportedApplicationTypes::DISCOVERY_SERVER,
    }
}

/// True when `kind` is one of the bits set in `supported`, per spec §4.5.
pub fn application_type_allowed(
    kind: ApplicationKind,
    supported: SupportedApplicationTypes,
) -> bool {
    supported.contains(application_type_bit(kind))
}

/// Validates a candidate application URI against the `serverUris` filter the caller
/// supplied to `findServers`, per spec §4.5: "the returned applicationUri must match
/// one of them byte-for-byte."
pub fn application_uri_matches_filter(application_uri: &str, server_uris: &[String]) -> bool {
    server_uris.is_empty() || server_uris.iter().any(|u| u == application_uri)
}

/// Whether a host string parses as an IPv4 literal under the grammar spec §4.5
/// defines: `d.d.d.d`, each `d` in `[0..255]` with 1 to 3 digits, exactly three
/// dots, and a total length in `[7..15]`.
pub fn is_ipv4_literal(host: &str) -> bool {
    if host.len() < 7 || host.len() > 15 {
        return false;
    }
    let segments: Vec<&str> = host.split('.').collect();
    if segments.len() != 4 {
        return false;
    }
    segments.iter().all(|seg| {
        if seg.is_empty() || seg.len() > 3 {
            return false;
        }
        if !seg.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        seg.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
    })
}

/// Parses an endpoint URL's host portion out of `opc.tcp://host[:port][/path]`,
/// requiring a non-empty host (spec §4.5: "parsed as endpoint URLs (non-empty
/// host)").
pub fn endpoint_url_host(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("opc.tcp://")?;
    let authority = match rest.find('/') {
        Some(idx) => &rest[..idx],
        None => rest,
    };
    let host = match authority.find(':') {
        Some(idx) => &authority[..idx],
        None => authority,
    };
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Full applicationUri validation from spec §4.5: length ≥ 5; non-`urn:` values are
/// parsed as endpoint URLs needing a non-empty host; a host starting with `1` or `2`
/// must additionally satisfy the IPv4-literal grammar.
pub fn validate_application_uri(application_uri: &str) -> bool {
    if application_uri.len() < 5 {
        return false;
    }
    if application_uri.starts_with("urn:") {
        return true;
    }
    let Some(host) = endpoint_url_host(application_uri) else {
        return false;
    };
    if host.starts_with('1') || host.starts_with('2') {
        return is_ipv4_literal(host);
    }
    true
}

/// Locale filter from spec §4.5: when `locale_ids` is non-empty, the
/// applicationName's locale must match one of them.
pub fn locale_matches_filter(application_name_locale: &str, locale_ids: &[String]) -> bool {
    locale_ids.is_empty() || locale_ids.iter().any(|l| l == application_name_locale)
}

/// Applies every `findServers` filter from spec §4.5 to one discovered application.
pub fn find_servers_accepts(
    application: &ApplicationConfig,
    application_name_locale: &str,
    supported: SupportedApplicationTypes,
    server_uris: &[String],
    locale_ids: &[String],
) -> bool {
    application_type_allowed(application.application_type, supported)
        && validate_application_uri(&application.application_uri)
        && application_uri_matches_filter(&application.application_uri, server_uris)
        && locale_matches_filter(application_name_locale, locale_ids)
}

/// Applies the `getEndpoints` filter from spec §4.5: supportedApplicationTypes only.
pub fn get_endpoints_accepts(endpoint: &EndpointInfo, supported: SupportedApplicationTypes) -> bool {
    application_type_allowed(endpoint.application.application_type, supported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_literal_grammar() {
        assert!(is_ipv4_literal("192.168.1.1"));
        assert!(is_ipv4_literal("1.2.3.4"));
        assert!(!is_ipv4_literal("256.1.1.1"));
        assert!(!is_ipv4_literal("1.2.3"));
        assert!(!is_ipv4_literal("1.2.3.4.5"));
        assert!(!is_ipv4_literal("1.2.3.04444"));
    }

    #[test]
    fn urn_uris_skip_host_validation() {
        assert!(validate_application_uri("urn:x"));
        assert!(!validate_application_uri("urn")); // length 3, < 5
    }

    #[test]
    fn endpoint_url_requires_non_empty_host() {
        assert_eq!(
            endpoint_url_host("opc.tcp://localhost:4840/foo"),
            Some("localhost")
        );
        assert_eq!(endpoint_url_host("opc.tcp://:4840"), None);
    }

    #[test]
    fn host_starting_with_1_or_2_must_be_ipv4() {
        assert!(validate_application_uri("opc.tcp://192.168.1.1:4840"));
        assert!(!validate_application_uri("opc.tcp://2bad-host:4840"));
        // Hosts not starting with 1/2 aren't required to be IPv4.
        assert!(validate_application_uri("opc.tcp://myserver:4840"));
    }

    #[test]
    fn server_uris_filter_is_exact_match() {
        let uris = vec!["urn:a".to_string(), "urn:b".to_string()];
        assert!(application_uri_matches_filter("urn:a", &uris));
        assert!(!application_uri_matches_filter("urn:c", &uris));
        assert!(application_uri_matches_filter("urn:anything", &[]));
    }

    #[test]
    fn application_type_bitmask_allows_client_and_server_separately() {
        let supported = SupportedApplicationTypes::CLIENT | SupportedApplicationTypes::SERVER;
        assert!(application_type_allowed(ApplicationKind::Client, supported));
        assert!(application_type_allowed(ApplicationKind::Server, supported));
        assert!(!application_type_allowed(
            ApplicationKind::DiscoveryServer,
            supported
        ));
    }
}
