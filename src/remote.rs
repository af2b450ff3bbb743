use core::{fmt::Display, str::FromStr};
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::digest::Digest;
use crate::{GravatarError, Result};

pub const GRAVATAR_BASE_URL: &str = "https://www.gravatar.com/avatar";
pub const DEFAULT_SIZE: u32 = 80;
pub const MIN_SIZE: u32 = 1;
pub const MAX_SIZE: u32 = 2048;
pub const DEFAULT_CROSS_FADE_MS: u64 = 250;
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// What Gravatar serves when no avatar is registered for a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DefaultImage {
    /// Answer with HTTP 404, so the placeholder stays visible.
    NotFound,
    MysteryPerson,
    Identicon,
    MonsterId,
    Wavatar,
    Retro,
    Robohash,
    Blank,
    /// A publicly reachable image of the caller's choosing.
    Custom(Url),
}

impl DefaultImage {
    pub fn as_query_value(&self) -> &str {
        match self {
            DefaultImage::NotFound => "404",
            DefaultImage::MysteryPerson => "mp",
            DefaultImage::Identicon => "identicon",
            DefaultImage::MonsterId => "monsterid",
            DefaultImage::Wavatar => "wavatar",
            DefaultImage::Retro => "retro",
            DefaultImage::Robohash => "robohash",
            DefaultImage::Blank => "blank",
            DefaultImage::Custom(url) => url.as_str(),
        }
    }
}

impl Default for DefaultImage {
    fn default() -> Self {
        DefaultImage::NotFound
    }
}

impl FromStr for DefaultImage {
    type Err = GravatarError;

    fn from_str(s: &str) -> Result<Self> {
        let value = match s {
            "404" => DefaultImage::NotFound,
            "mp" | "mm" => DefaultImage::MysteryPerson,
            "identicon" => DefaultImage::Identicon,
            "monsterid" => DefaultImage::MonsterId,
            "wavatar" => DefaultImage::Wavatar,
            "retro" => DefaultImage::Retro,
            "robohash" => DefaultImage::Robohash,
            "blank" => DefaultImage::Blank,
            other if other.contains("://") => {
                DefaultImage::Custom(Url::parse(other)?)
            }
            other => {
                return Err(GravatarError::Config(format!(
                    "unknown default image {:?}",
                    other
                )))
            }
        };
        Ok(value)
    }
}

impl TryFrom<String> for DefaultImage {
    type Error = GravatarError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DefaultImage> for String {
    fn from(value: DefaultImage) -> Self {
        value.as_query_value().to_owned()
    }
}

/// Highest audience rating an avatar may carry to be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    G,
    Pg,
    R,
    X,
}

impl Rating {
    pub fn as_query_value(&self) -> &'static str {
        match self {
            Rating::G => "g",
            Rating::Pg => "pg",
            Rating::R => "r",
            Rating::X => "x",
        }
    }
}

/// Request parameters and timings shared by every fetch a view issues.
///
/// Loaded from JSON with [`AvatarOptions::load`]; any missing field takes
/// its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarOptions {
    pub base_url: Url,
    /// Requested edge length in pixels.
    pub size: u32,
    pub default_image: DefaultImage,
    pub rating: Option<Rating>,
    pub cross_fade_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for AvatarOptions {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            size: DEFAULT_SIZE,
            default_image: DefaultImage::default(),
            rating: None,
            cross_fade_ms: DEFAULT_CROSS_FADE_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

fn default_base_url() -> Url {
    Url::parse(GRAVATAR_BASE_URL).expect("built-in base URL is valid")
}

impl AvatarOptions {
    /// Reads options from a JSON file and validates them.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        log::debug!("Loading avatar options from {}", path.as_ref().display());

        let raw = fs::read(path.as_ref())?;
        let options: AvatarOptions = serde_json::from_slice(&raw)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.cannot_be_a_base()
            || !matches!(self.base_url.scheme(), "http" | "https")
        {
            return Err(GravatarError::Config(format!(
                "base URL {} must be an absolute http(s) URL",
                self.base_url
            )));
        }
        Ok(())
    }

    pub fn cross_fade(&self) -> Duration {
        Duration::from_millis(self.cross_fade_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The size actually sent to the server.
    pub fn effective_size(&self) -> u32 {
        self.size.clamp(MIN_SIZE, MAX_SIZE)
    }
}

/// Pixel size needed to fill a square of `points` on a screen with the
/// given backing `scale` factor.
pub fn pixel_size_for(points: f32, scale: f32) -> u32 {
    let pixels = (points * scale).ceil();
    if pixels.is_nan() || pixels < MIN_SIZE as f32 {
        MIN_SIZE
    } else if pixels > MAX_SIZE as f32 {
        MAX_SIZE
    } else {
        pixels as u32
    }
}

/// Location of the avatar image for one digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteImageRef(Url);

impl RemoteImageRef {
    pub fn new(digest: &Digest, options: &AvatarOptions) -> Result<Self> {
        let mut url = options.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                GravatarError::Config(format!(
                    "base URL {} cannot carry a path",
                    options.base_url
                ))
            })?
            .pop_if_empty()
            .push(digest.as_str());

        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query.append_pair("s", &options.effective_size().to_string());
            query.append_pair("d", options.default_image.as_query_value());
            if let Some(rating) = options.rating {
                query.append_pair("r", rating.as_query_value());
            }
        }

        Ok(RemoteImageRef(url))
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for RemoteImageRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
