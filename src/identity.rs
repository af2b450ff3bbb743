use core::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::FetchError;

/// A normalized email address: surrounding whitespace trimmed and
/// lower-cased, which is the form Gravatar hashes.
#[derive(
    Debug, Clone, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Normalizes `email` and checks that it looks like an address.
    ///
    /// Only the shape is validated (a single `@` with something on both
    /// sides, no inner whitespace); deliverability is Gravatar's business.
    pub fn parse(email: &str) -> Result<Self, FetchError> {
        let normalized = normalize(email);
        if is_plausible_address(&normalized) {
            Ok(Identity(normalized))
        } else {
            Err(FetchError::InvalidIdentity(email.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Trims surrounding whitespace and lower-cases the address.
pub fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_plausible_address(email: &str) -> bool {
    if email.is_empty()
        || email
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
    {
        return false;
    }

    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty() && !domain.is_empty()
        }
        _ => false,
    }
}

impl FromStr for Identity {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identity::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = FetchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identity::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
