//! Challenge/response authentication
//!
//! The answering side sends AUTHREQ listing the methods it accepts and,
//! when `md5` is among them, a random numeric challenge. The calling side
//! replies with either `md5secret=hex(md5(challenge + secret))` or, if
//! only plaintext is allowed, `secret=<secret>`.

use std::fmt;

use tracing::{debug, warn};

use crate::frame::IaxParams;

/// Set of authentication methods a user or peer permits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthMethods {
    pub md5: bool,
    pub plaintext: bool,
}

impl AuthMethods {
    pub const ALL: AuthMethods = AuthMethods {
        md5: true,
        plaintext: true,
    };

    /// Parse a comma separated list such as `md5,plaintext`.
    ///
    /// Unknown names (for instance `rsa`) are ignored.
    pub fn parse(list: &str) -> Self {
        let mut methods = AuthMethods::default();
        for name in list.split(',').map(str::trim) {
            if name.eq_ignore_ascii_case("md5") {
                methods.md5 = true;
            } else if name.eq_ignore_ascii_case("plaintext") {
                methods.plaintext = true;
            } else if !name.is_empty() {
                debug!("Ignoring unsupported authentication method '{}'", name);
            }
        }
        methods
    }

    pub fn is_empty(&self) -> bool {
        !self.md5 && !self.plaintext
    }
}

impl fmt::Display for AuthMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.md5, self.plaintext) {
            (true, true) => f.write_str("md5,plaintext"),
            (true, false) => f.write_str("md5"),
            (false, true) => f.write_str("plaintext"),
            (false, false) => Ok(()),
        }
    }
}

/// Lowercase hex MD5 of `challenge` followed by `secret`
pub fn md5_digest(challenge: &str, secret: &str) -> String {
    let mut input = Vec::with_capacity(challenge.len() + secret.len());
    input.extend_from_slice(challenge.as_bytes());
    input.extend_from_slice(secret.as_bytes());
    format!("{:x}", md5::compute(&input))
}

/// Fresh numeric challenge
pub fn new_challenge() -> String {
    rand::random::<u32>().to_string()
}

/// AUTHREQ payload. Returns the payload and the challenge it carries, if any.
pub fn build_request(methods: AuthMethods, username: &str) -> (IaxParams, Option<String>) {
    let mut params = IaxParams::new().with("methods", methods);
    let challenge = if methods.md5 {
        let challenge = new_challenge();
        params.push("challenge", &challenge);
        Some(challenge)
    } else {
        None
    };
    params.push("username", username);
    (params, challenge)
}

/// Check an AUTHREP payload against the expected secret.
///
/// MD5 is preferred whenever the call permits it; the comparison of hex
/// digests ignores case. Plaintext requires an exact match.
pub fn verify(
    methods: AuthMethods,
    challenge: &str,
    secret: &str,
    reply: &IaxParams,
) -> bool {
    for (key, value) in reply.iter() {
        if key != "secret" && key != "md5secret" {
            warn!("Unknown variable '{}' with value '{}'", key, value);
        }
    }

    if methods.md5 {
        let expected = md5_digest(challenge, secret);
        reply
            .get("md5secret")
            .map(|given| given.eq_ignore_ascii_case(&expected))
            .unwrap_or(false)
    } else if methods.plaintext {
        reply.get("secret").map(|given| given == secret).unwrap_or(false)
    } else {
        false
    }
}

/// Parsed AUTHREQ payload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthRequest {
    pub methods: AuthMethods,
    pub challenge: String,
    pub username: Option<String>,
}

impl AuthRequest {
    pub fn parse(params: &IaxParams) -> Self {
        let mut request = AuthRequest::default();
        for (key, value) in params.iter() {
            match key {
                "methods" => request.methods = AuthMethods::parse(value),
                "challenge" => request.challenge = value.to_string(),
                "username" => request.username = Some(value.to_string()),
                _ => warn!("Unknown variable '{}' with value '{}'", key, value),
            }
        }
        request
    }
}

/// Build the AUTHREP credential for `secret`.
///
/// Returns `None` when the secret is empty or the far end permits no
/// method we can satisfy.
pub fn build_reply(request: &AuthRequest, secret: &str) -> Option<IaxParams> {
    if secret.is_empty() {
        return None;
    }
    if request.methods.md5 && !request.challenge.is_empty() {
        Some(IaxParams::new().with("md5secret", md5_digest(&request.challenge, secret)))
    } else if request.methods.plaintext {
        Some(IaxParams::new().with("secret", secret))
    } else {
        debug!(
            "No way to send secret (their methods: {})",
            request.methods
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_methods_parse() {
        assert_eq!(AuthMethods::parse("md5,plaintext"), AuthMethods::ALL);
        let m = AuthMethods::parse("rsa, md5");
        assert!(m.md5 && !m.plaintext);
        assert!(AuthMethods::parse("").is_empty());
        assert_eq!(AuthMethods::parse("plaintext").to_string(), "plaintext");
    }

    #[test]
    fn test_md5_digest_known_value() {
        // md5("1234" + "secret")
        assert_eq!(md5_digest("1234", "secret"), format!("{:x}", md5::compute(b"1234secret")));
        assert_eq!(md5_digest("", "").len(), 32);
    }

    #[test]
    fn test_request_carries_challenge_only_for_md5() {
        let (params, challenge) = build_request(AuthMethods::ALL, "alice");
        let challenge = challenge.unwrap();
        assert!(challenge.parse::<u32>().is_ok());
        assert_eq!(params.get("challenge"), Some(challenge.as_str()));
        assert_eq!(params.get("methods"), Some("md5,plaintext"));
        assert_eq!(params.get("username"), Some("alice"));

        let (params, challenge) = build_request(AuthMethods::parse("plaintext"), "bob");
        assert!(challenge.is_none());
        assert_eq!(params.get("challenge"), None);
    }

    #[test]
    fn test_md5_roundtrip() {
        let (params, _) = build_request(AuthMethods::ALL, "alice");
        let request = AuthRequest::parse(&params);
        let reply = build_reply(&request, "s3cret").unwrap();
        assert!(reply.get("md5secret").is_some());
        assert!(verify(AuthMethods::ALL, &request.challenge, "s3cret", &reply));
        assert!(!verify(AuthMethods::ALL, &request.challenge, "other", &reply));
    }

    #[test]
    fn test_md5_compare_ignores_case() {
        let reply = IaxParams::new().with("md5secret", md5_digest("42", "pw").to_uppercase());
        assert!(verify(AuthMethods::ALL, "42", "pw", &reply));
    }

    #[test]
    fn test_plaintext() {
        let request = AuthRequest::parse(&IaxParams::parse(b"methods=plaintext;username=bob"));
        let reply = build_reply(&request, "pw").unwrap();
        assert_eq!(reply.get("secret"), Some("pw"));
        let methods = AuthMethods::parse("plaintext");
        assert!(verify(methods, "", "pw", &reply));
        assert!(!verify(methods, "", "PW", &reply));
    }

    #[test]
    fn test_no_usable_method() {
        let request = AuthRequest::parse(&IaxParams::parse(b"methods=rsa;challenge=1"));
        assert!(build_reply(&request, "pw").is_none());
        let request = AuthRequest::parse(&IaxParams::parse(b"methods=md5;challenge=1"));
        assert!(build_reply(&request, "").is_none());
    }
}
