use mysql_common::constants::CapabilityFlags;

pub mod auth;
pub mod config;
pub mod session;

/// Capability flags the server always advertises to the client in the
/// initial handshake, before any capabilities learned from the upstream are
/// folded in. Per the wire protocol contract this proxy honors:
/// `PROTOCOL_41 | SECURE_CONNECTION`, and never `COMPRESS`, `SSL`, or
/// `PLUGIN_AUTH`.
pub fn default_capabilities() -> CapabilityFlags {
    CapabilityFlags::CLIENT_PROTOCOL_41 | CapabilityFlags::CLIENT_SECURE_CONNECTION
}

/// Capabilities this proxy will never advertise to a client, regardless of
/// what the upstream supports.
pub fn forbidden_capabilities() -> CapabilityFlags {
    CapabilityFlags::CLIENT_COMPRESS
        | CapabilityFlags::CLIENT_SSL
        | CapabilityFlags::CLIENT_PLUGIN_AUTH
}

/// Folds in whatever extra capabilities the upstream advertised, excluding
/// the ones this proxy refuses to pass through.
pub fn capabilities_with_upstream(upstream: CapabilityFlags) -> CapabilityFlags {
    default_capabilities() | (upstream & !forbidden_capabilities())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capabilities_are_minimal() {
        let caps = default_capabilities();
        assert!(caps.contains(CapabilityFlags::CLIENT_PROTOCOL_41));
        assert!(caps.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION));
        assert!(!caps.contains(CapabilityFlags::CLIENT_SSL));
        assert!(!caps.contains(CapabilityFlags::CLIENT_COMPRESS));
        assert!(!caps.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH));
    }

    #[test]
    fn forbidden_capabilities_never_pass_through() {
        let upstream = CapabilityFlags::CLIENT_SSL
            | CapabilityFlags::CLIENT_COMPRESS
            | CapabilityFlags::CLIENT_FOUND_ROWS;
        let merged = capabilities_with_upstream(upstream);
        assert!(merged.contains(CapabilityFlags::CLIENT_FOUND_ROWS));
        assert!(!merged.contains(CapabilityFlags::CLIENT_SSL));
        assert!(!merged.contains(CapabilityFlags::CLIENT_COMPRESS));
    }
}
