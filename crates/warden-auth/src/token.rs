//! Token extraction, token formats and secret hashing.
//!
//! A request may carry its token as the `api_token` or `oauth_token`
//! parameter, or in an `Authorization: OAuth2 <token>` or
//! `Authorization: Bearer <token>` header, checked in that order.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use warden_core::ids;

const V2_PREFIX: &str = "v2/";

/// The places a request can carry a token, as extracted by the HTTP layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenSources<'a> {
    pub api_token: Option<&'a str>,
    pub oauth_token: Option<&'a str>,
    /// Raw `Authorization` header value.
    pub authorization: Option<&'a str>,
}

/// Pick the token a request presents, if any.
pub fn extract_token<'a>(sources: TokenSources<'a>) -> Option<&'a str> {
    sources
        .api_token
        .filter(|t| !t.is_empty())
        .or(sources.oauth_token.filter(|t| !t.is_empty()))
        .or_else(|| sources.authorization.and_then(token_from_header))
}

/// Extract the token from an `Authorization` header value.
///
/// `OAuth2` tokens are lowercase alphanumerics; the longest such run after
/// the first occurrence of the scheme that is followed by one is taken. `Bearer` additionally admits `/` and `-` so that
/// `v2/<uuid>/<secret>` tokens can be presented.
pub fn token_from_header(value: &str) -> Option<&str> {
    if let Some(token) = run_after(value, "OAuth2 ", |c| {
        c.is_ascii_lowercase() || c.is_ascii_digit()
    }) {
        return Some(token);
    }
    run_after(value, "Bearer ", |c| {
        c.is_ascii_alphanumeric() || c == '/' || c == '-'
    })
}

fn run_after<'a>(value: &'a str, scheme: &str, allowed: impl Fn(char) -> bool) -> Option<&'a str> {
    value.match_indices(scheme).find_map(|(at, _)| {
        let rest = &value[at + scheme.len()..];
        let end = rest.find(|c: char| !allowed(c)).unwrap_or(rest.len());
        (end > 0).then(|| &rest[..end])
    })
}

/// A presented token, parsed at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFormat<'a> {
    /// Bare secret, looked up by its digest.
    V1 { secret: &'a str },
    /// `v2/<authorization uuid>/<secret>`, looked up by UUID.
    V2 {
        authorization_uuid: &'a str,
        secret: &'a str,
    },
}

impl<'a> TokenFormat<'a> {
    /// `None` for anything that is not a well-formed token. Malformed input
    /// is an ordinary outcome, not an error.
    pub fn parse(raw: &'a str) -> Option<Self> {
        if let Some(rest) = raw.strip_prefix(V2_PREFIX) {
            let (uuid, secret) = rest.split_once('/')?;
            if !ids::is_valid_uuid(uuid) || !is_secret(secret) {
                return None;
            }
            return Some(Self::V2 {
                authorization_uuid: uuid,
                secret,
            });
        }
        is_secret(raw).then_some(Self::V1 { secret: raw })
    }

    pub fn secret(&self) -> &'a str {
        match self {
            Self::V1 { secret } | Self::V2 { secret, .. } => secret,
        }
    }
}

fn is_secret(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// SHA-256 digest of a token secret, hex-encoded. This is the only form in
/// which secrets are stored.
pub fn hash_token(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a presented secret with a configured one in constant time.
/// Both sides are digested first so their lengths do not leak either.
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    presented.as_slice().ct_eq(expected.as_slice()).into()
}

/// Compare two hex digests in constant time.
pub fn digests_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Fresh 256-bit secret rendered in lowercase base-36.
pub fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::Rng::random(&mut rand::rng());
    ids::to_base36(&bytes)
}

/// The presentable form of a token.
pub fn format_v2(authorization_uuid: &str, secret: &str) -> String {
    format!("{V2_PREFIX}{authorization_uuid}/{secret}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTH_UUID: &str = "zzzzz-gj3su-000000000000001";

    #[test]
    fn parameters_take_precedence_over_header() {
        let sources = TokenSources {
            api_token: Some("aaa"),
            oauth_token: Some("bbb"),
            authorization: Some("OAuth2 ccc"),
        };
        assert_eq!(extract_token(sources), Some("aaa"));

        let sources = TokenSources {
            api_token: None,
            ..sources
        };
        assert_eq!(extract_token(sources), Some("bbb"));

        let sources = TokenSources {
            oauth_token: Some(""),
            ..sources
        };
        assert_eq!(extract_token(sources), Some("ccc"));
        assert_eq!(extract_token(TokenSources::default()), None);
    }

    #[test]
    fn oauth2_header_takes_lowercase_run() {
        assert_eq!(token_from_header("OAuth2 abc123"), Some("abc123"));
        assert_eq!(token_from_header("OAuth2 abc123 trailing"), Some("abc123"));
        assert_eq!(token_from_header("OAuth2 ABC"), None);
        assert_eq!(token_from_header("OAuth2 "), None);
        assert_eq!(token_from_header("Basic abc"), None);
    }

    #[test]
    fn later_scheme_occurrence_is_used_when_the_first_is_empty() {
        assert_eq!(
            token_from_header("OAuth2 ABC, OAuth2 abc123"),
            Some("abc123")
        );
        assert_eq!(token_from_header("OAuth2 OAuth2 xyz"), Some("xyz"));
        assert_eq!(token_from_header("Bearer , Bearer v2tok"), Some("v2tok"));
    }

    #[test]
    fn secret_comparison() {
        assert!(secrets_match("systemroottoken", "systemroottoken"));
        assert!(!secrets_match("systemroottoken", "systemroottoke"));
        assert!(!secrets_match("", "systemroottoken"));

        let digest = hash_token("secret");
        assert!(digests_match(&digest, &hash_token("secret")));
        assert!(!digests_match(&digest, &hash_token("other")));
        assert!(!digests_match(&digest, ""));
    }

    #[test]
    fn bearer_header_admits_v2_tokens() {
        let v2 = format!("v2/{AUTH_UUID}/secret");
        assert_eq!(
            token_from_header(&format!("Bearer {v2}")),
            Some(v2.as_str())
        );
    }

    #[test]
    fn token_formats() {
        assert_eq!(
            TokenFormat::parse("abc123"),
            Some(TokenFormat::V1 { secret: "abc123" })
        );

        let v2 = format!("v2/{AUTH_UUID}/abc123");
        let parsed = TokenFormat::parse(&v2).unwrap();
        assert_eq!(
            parsed,
            TokenFormat::V2 {
                authorization_uuid: AUTH_UUID,
                secret: "abc123"
            }
        );
        assert_eq!(parsed.secret(), "abc123");
    }

    #[test]
    fn malformed_tokens_do_not_parse() {
        for raw in [
            "",
            "has space",
            "v2/not-a-uuid/abc",
            "v2/zzzzz-gj3su-000000000000001",
            "v2/zzzzz-gj3su-000000000000001/",
            "v2/zzzzz-gj3su-000000000000001/a/b",
            "tok\u{e9}n",
        ] {
            assert_eq!(TokenFormat::parse(raw), None, "{raw:?}");
        }
    }

    #[test]
    fn token_hash_is_deterministic() {
        let h1 = hash_token("secret");
        let h2 = hash_token("secret");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, hash_token("Secret"));
    }

    #[test]
    fn generated_secrets_are_lowercase_and_unique() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert!(a.bytes().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_eq!(TokenFormat::parse(&a), Some(TokenFormat::V1 { secret: &a }));
    }
}
