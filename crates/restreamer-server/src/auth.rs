// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Authentication predicate (spec.md §6 Auth contract).
//!
//! `restreamer-core` stays payload-opaque and auth-agnostic; this module
//! is the one external collaborator spec.md names explicitly ("the
//! authentication primitives ... specified only by the predicate the
//! core invokes").

use base64::Engine;

use crate::config::AuthConfig;

/// Outcome of `Authenticate(Authorization header value)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Respond 401 with `WWW-Authenticate: <scheme> realm="<realm>"`.
    Unauthorized { realm: String, scheme: &'static str },
    /// Respond 403, no realm offered.
    Forbidden,
}

/// No auth configured for a stream admits everyone, matching the
/// predicate's "specified only by the predicate the core invokes" --
/// an absent predicate is the identity predicate.
pub fn authenticate(config: Option<&AuthConfig>, header: Option<&str>) -> Decision {
    let Some(config) = config else {
        return Decision::Allow;
    };

    match config {
        AuthConfig::Allow => Decision::Allow,
        AuthConfig::Deny => Decision::Forbidden,
        AuthConfig::Basic { user, pass, realm } => {
            let expected = format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"))
            );
            if header.is_some_and(|h| h == expected) {
                Decision::Allow
            } else {
                Decision::Unauthorized {
                    realm: realm.clone(),
                    scheme: "Basic",
                }
            }
        }
        AuthConfig::Bearer { token, realm } => {
            let expected = format!("Bearer {token}");
            if header.is_some_and(|h| h == expected) {
                Decision::Allow
            } else {
                Decision::Unauthorized {
                    realm: realm.clone(),
                    scheme: "Bearer",
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_config_allows_everyone() {
        assert_eq!(authenticate(None, None), Decision::Allow);
    }

    #[test]
    fn allow_mode_admits_regardless_of_header() {
        assert_eq!(
            authenticate(Some(&AuthConfig::Allow), None),
            Decision::Allow
        );
    }

    #[test]
    fn deny_mode_offers_no_realm() {
        assert_eq!(
            authenticate(Some(&AuthConfig::Deny), Some("anything")),
            Decision::Forbidden
        );
    }

    #[test]
    fn basic_accepts_matching_credentials() {
        let cfg = AuthConfig::Basic {
            user: "alice".into(),
            pass: "secret".into(),
            realm: "stream".into(),
        };
        let header = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("alice:secret")
        );
        assert_eq!(authenticate(Some(&cfg), Some(&header)), Decision::Allow);
    }

    #[test]
    fn basic_rejects_wrong_credentials_with_realm() {
        let cfg = AuthConfig::Basic {
            user: "alice".into(),
            pass: "secret".into(),
            realm: "stream".into(),
        };
        assert_eq!(
            authenticate(Some(&cfg), Some("Basic bm9wZQ==")),
            Decision::Unauthorized {
                realm: "stream".into(),
                scheme: "Basic"
            }
        );
    }

    #[test]
    fn bearer_accepts_matching_token() {
        let cfg = AuthConfig::Bearer {
            token: "abc123".into(),
            realm: "stream".into(),
        };
        assert_eq!(
            authenticate(Some(&cfg), Some("Bearer abc123")),
            Decision::Allow
        );
    }

    #[test]
    fn bearer_rejects_missing_header() {
        let cfg = AuthConfig::Bearer {
            token: "abc123".into(),
            realm: "stream".into(),
        };
        assert_eq!(
            authenticate(Some(&cfg), None),
            Decision::Unauthorized {
                realm: "stream".into(),
                scheme: "Bearer"
            }
        );
    }
}
