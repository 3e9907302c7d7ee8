use std::collections::HashMap;
use std::sync::OnceLock;

/// `utf8_general_ci`, the collation id advertised in both the server handshake
/// and any synthetic result set the proxy builds itself.
pub const DEFAULT_COLLATION_ID: u16 = 0x21;

static COLLATION_NAMES: OnceLock<HashMap<&'static str, u16>> = OnceLock::new();

/// A small slice of the MySQL collation table, enough to resolve the
/// collations this proxy ever sends or is offered during a handshake.
pub fn collation_names() -> &'static HashMap<&'static str, u16> {
    COLLATION_NAMES.get_or_init(|| {
        HashMap::from([
            ("big5_chinese_ci", 1),
            ("latin1_swedish_ci", 8),
            ("ascii_general_ci", 11),
            ("utf8_general_ci", 0x21),
            ("binary", 63),
            ("utf8mb4_general_ci", 45),
            ("utf8mb4_unicode_ci", 224),
        ])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_collation_matches_utf8_general_ci() {
        assert_eq!(
            *collation_names().get("utf8_general_ci").unwrap(),
            DEFAULT_COLLATION_ID
        );
    }
}
