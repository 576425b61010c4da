//! HTTP Basic authentication ([RFC 7617](https://www.rfc-editor.org/rfc/rfc7617)).

use crate::{
    chain::{
        context::{Context, ContextKey},
        interceptor::{BoxFuture, Interceptor, Next},
    },
    errors::ConfigError,
    http::{
        request::Request,
        response::{Responsible, Response},
        types::StatusCode,
    },
};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::fmt;

/// Context key under which [`BasicAuth`] stores the authenticated user name.
pub const BASIC_AUTH_USER: ContextKey<String> = ContextKey::new("basic_auth_user");

struct Credential {
    user: String,
    expected: String,
}

/// Interceptor that admits requests carrying one of a fixed set of
/// credentials.
///
/// An accepted request continues down the chain with the user name stored
/// under [`BASIC_AUTH_USER`]. Any other request, including one without an
/// `Authorization` header, is answered by [`require_basic_auth`] and the
/// rest of the chain never runs. A wrong password and an unknown user get
/// the same answer.
///
/// # Examples
/// ```
/// use relay_web::{basic_auth::BasicAuth, ConfigError};
///
/// assert!(BasicAuth::new([("admin", "secret")], "internal").is_ok());
/// assert_eq!(
///     BasicAuth::new(Vec::<(String, String)>::new(), "internal").err(),
///     Some(ConfigError::EmptyCredentials)
/// );
/// ```
pub struct BasicAuth {
    credentials: Vec<Credential>,
    realm: String,
}

impl BasicAuth {
    /// Builds the interceptor from `(user, password)` pairs.
    ///
    /// # Errors
    /// [`ConfigError::EmptyCredentials`] when `users` is empty,
    /// [`ConfigError::EmptyCredential`] when a user name or password is empty.
    pub fn new<I, U, P>(users: I, realm: impl Into<String>) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        let credentials = users
            .into_iter()
            .map(|(user, password)| {
                let (user, password) = (user.into(), password.into());
                if user.is_empty() || password.is_empty() {
                    return Err(ConfigError::EmptyCredential);
                }

                let expected = format!("Basic {}", STANDARD.encode(format!("{user}:{password}")));
                Ok(Credential { user, expected })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if credentials.is_empty() {
            return Err(ConfigError::EmptyCredentials);
        }

        Ok(Self {
            credentials,
            realm: realm.into(),
        })
    }

    #[inline(always)]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Returns the user whose credentials match the `Authorization` header.
    fn authenticate(&self, authorization: Option<&str>) -> Option<&str> {
        let authorization = authorization?;
        self.credentials
            .iter()
            .find(|credential| credential.expected == authorization)
            .map(|credential| credential.user.as_str())
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("users", &self.credentials.len())
            .field("realm", &self.realm)
            .finish()
    }
}

impl Interceptor for BasicAuth {
    fn intercept<'a>(
        &'a self,
        ctx: Context,
        req: &'a Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Box<dyn Responsible>> {
        match self.authenticate(req.authorization()) {
            Some(user) => {
                tracing::debug!(user, "basic auth accepted");
                next.run(ctx.with_value(BASIC_AUTH_USER, user.to_owned()), req)
            }
            None => {
                tracing::debug!(path = req.url().path(), "basic auth rejected");
                let challenge = require_basic_auth(&self.realm).boxed();
                Box::pin(std::future::ready(challenge))
            }
        }
    }
}

/// A `401 Unauthorized` response asking for Basic credentials for `realm`.
///
/// # Examples
/// ```
/// use relay_web::{basic_auth::require_basic_auth, StatusCode};
///
/// let resp = require_basic_auth(r#"say "hi""#);
///
/// assert_eq!(resp.status_code(), StatusCode::Unauthorized);
/// assert_eq!(resp.header("www-authenticate"), Some(r#"Basic realm="say \"hi\"""#));
/// ```
pub fn require_basic_auth(realm: &str) -> Response {
    let mut challenge = String::with_capacity(realm.len() + 16);
    challenge.push_str("Basic realm=\"");
    for c in realm.chars() {
        if c == '"' || c == '\\' {
            challenge.push('\\');
        }
        challenge.push(c);
    }
    challenge.push('"');

    Response::status(StatusCode::Unauthorized).with_header("WWW-Authenticate", challenge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::interceptor::{handler_fn, Chain},
        http::{request::Parts, response::ResponseWriter, types::Method},
        params::parser::Parsed,
    };

    fn chain() -> Chain {
        let auth = BasicAuth::new([("admin", "secret"), ("guest", "guest")], "internal").unwrap();

        Chain::new().with(auth).with(handler_fn(|ctx, _| {
            let user = ctx.value(BASIC_AUTH_USER).cloned().unwrap_or_default();
            Response::text(StatusCode::Ok, user)
        }))
    }

    async fn call(authorization: Option<&str>) -> ResponseWriter {
        let mut parts = Parts::new(Method::Get, "/private");
        if let Some(value) = authorization {
            parts = parts.with_header("Authorization", value);
        }
        let req = Request::new(parts, Parsed::default());

        ResponseWriter::record(chain().dispatch(Context::new(), &req).await)
    }

    #[tokio::test]
    async fn accepted_users_reach_the_handler() {
        // base64("admin:secret"), base64("guest:guest")
        let cases = [
            ("Basic YWRtaW46c2VjcmV0", "admin"),
            ("Basic Z3Vlc3Q6Z3Vlc3Q=", "guest"),
        ];

        for (header, user) in cases {
            let writer = call(Some(header)).await;

            assert_eq!(writer.status_code(), StatusCode::Ok, "{header}");
            assert_eq!(writer.body_bytes(), user.as_bytes());
        }
    }

    #[tokio::test]
    async fn everything_else_is_challenged() {
        let cases: [Option<&str>; 6] = [
            None,
            Some(""),
            Some("Basic YWRtaW46d3Jvbmc="),   // admin:wrong
            Some("Basic bm9ib2R5OnNlY3JldA=="), // nobody:secret
            Some("basic YWRtaW46c2VjcmV0"),
            Some("Bearer YWRtaW46c2VjcmV0"),
        ];

        for header in cases {
            let writer = call(header).await;

            assert_eq!(writer.status_code(), StatusCode::Unauthorized, "{header:?}");
            assert_eq!(
                writer.header_value("www-authenticate"),
                Some(r#"Basic realm="internal""#)
            );
            assert!(writer.body_bytes().is_empty());
        }
    }

    #[tokio::test]
    async fn rejection_does_not_run_next() {
        let auth = BasicAuth::new([("a", "b")], "r").unwrap();
        let chain = Chain::new()
            .with(auth)
            .with(handler_fn(|_, _| -> StatusCode { panic!("next must not run") }));

        let req = Request::new(Parts::new(Method::Get, "/"), Parsed::default());
        let writer = ResponseWriter::record(chain.dispatch(Context::new(), &req).await);

        assert_eq!(writer.status_code(), StatusCode::Unauthorized);
    }

    #[test]
    fn invalid_configuration() {
        let empty: [(&str, &str); 0] = [];

        assert_eq!(
            BasicAuth::new(empty, "r").err(),
            Some(ConfigError::EmptyCredentials)
        );
        assert_eq!(
            BasicAuth::new([("", "pw")], "r").err(),
            Some(ConfigError::EmptyCredential)
        );
        assert_eq!(
            BasicAuth::new([("user", "")], "r").err(),
            Some(ConfigError::EmptyCredential)
        );
    }

    #[test]
    fn realm_is_quoted() {
        let cases = [
            ("plain", r#"Basic realm="plain""#),
            (r#"a"b"#, r#"Basic realm="a\"b""#),
            (r"a\b", r#"Basic realm="a\\b""#),
            ("", r#"Basic realm="""#),
        ];

        for (realm, expected) in cases {
            assert_eq!(
                require_basic_auth(realm).header("www-authenticate"),
                Some(expected)
            );
        }
    }
}
