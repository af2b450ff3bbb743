use core::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Hex digest of a normalized email; the name of the remote avatar.
#[derive(
    Debug, Clone, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct Digest(pub String);

impl Digest {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Digest {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        Ok(Digest(s.to_string()))
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps a normalized email to its digest.
///
/// Implementations must be pure: the same identity always yields the same
/// digest, otherwise cache lookups and stale-completion checks break.
pub trait Hasher: Send + Sync {
    fn digest(&self, identity: &Identity) -> Digest;
}

/// The hash Gravatar itself uses: MD5, rendered as 32 lowercase hex chars.
#[derive(Debug, Default, Clone, Copy)]
pub struct Md5Hasher;

impl Hasher for Md5Hasher {
    fn digest(&self, identity: &Identity) -> Digest {
        log::trace!("Computing MD5 digest for {}", identity);

        let hash = md5::compute(identity.as_str().as_bytes());
        Digest(format!("{:x}", hash))
    }
}
