//! # gravatar-view
//!
//! Shows a user's Gravatar in place of a placeholder image. The widget
//! ([`GravatarView`]) normalizes an email address, derives the avatar's
//! digest and URL, fetches and decodes the image with at most one request
//! in flight, and hands the result to a host-provided [`DisplaySurface`].
//!
//! Hashing, transport, decoding, caching and failure reporting are traits
//! with default implementations, so a host can swap any of them.

pub mod cache;
pub mod decode;
pub mod digest;
pub mod display;
mod errors;
pub mod identity;
pub mod observer;
pub mod remote;
pub mod transport;
pub mod view;

pub use cache::{DiskCache, ImageCache, MemoryCache};
pub use decode::{AvatarImage, ImageCrateDecoder, ImageDecoder};
pub use digest::{Digest, Hasher, Md5Hasher};
pub use display::{DisplaySurface, Transition};
pub use errors::{
    DecodeError, FetchError, GravatarError, Result, TransportError,
};
pub use identity::Identity;
pub use observer::{FetchObserver, ImageSource, LogObserver};
pub use remote::{AvatarOptions, DefaultImage, Rating, RemoteImageRef};
pub use transport::{HttpTransport, Response, Transport};
pub use view::{FetchHandle, GravatarView, GravatarViewBuilder, Status};

/// Memory budget of the caches the command line front-end creates.
pub const DEFAULT_CACHE_MEMORY_BYTES: usize = 4 * 1024 * 1024;
