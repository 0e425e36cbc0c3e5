//! Sink endpoint configuration and outbound authentication.

use base64::{engine::general_purpose::STANDARD, Engine};

/// Where deliveries go and how they authenticate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SinkConfig {
    /// URL every webhook is POSTed to.
    pub url: String,
    pub auth: SinkAuth,
}

impl SinkConfig {
    /// A sink without outbound authentication.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth: SinkAuth::None,
        }
    }
}

/// Authentication scheme for outbound POSTs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SinkAuth {
    None,
    Basic { user: String, password: String },
    Token(String),
    Bearer(String),
}

impl SinkAuth {
    /// Build the scheme from its configured parts.
    ///
    /// Unknown schemes and schemes missing their credentials fall back to
    /// no authentication.
    pub fn from_parts(
        kind: &str,
        user: Option<&str>,
        password: Option<&str>,
        token: Option<&str>,
    ) -> Self {
        match kind {
            "basic" => match (user, password) {
                (Some(user), Some(password)) => Self::Basic {
                    user: user.to_owned(),
                    password: password.to_owned(),
                },
                _ => Self::None,
            },
            "token" => token.map(|token| Self::Token(token.to_owned())).unwrap_or(Self::None),
            "bearer" => token
                .map(|token| Self::Bearer(token.to_owned()))
                .unwrap_or(Self::None),
            _ => Self::None,
        }
    }

    /// The `Authorization` header value, when the scheme carries one.
    pub fn authorization(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Basic { user, password } => {
                let encoded = STANDARD.encode(format!("{user}:{password}"));

                Some(format!("Basic {encoded}"))
            }
            Self::Token(token) => Some(format!("Token {token}")),
            Self::Bearer(token) => Some(format!("Bearer {token}")),
        }
    }
}
