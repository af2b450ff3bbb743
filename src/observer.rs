use crate::decode::AvatarImage;
use crate::digest::Digest;
use crate::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    Network,
    Cache,
}

/// Receives the outcome of fetches; the only place fetch errors surface.
pub trait FetchObserver: Send + Sync {
    fn fetch_failed(&self, digest: &Digest, error: &FetchError);

    fn avatar_resolved(
        &self,
        _digest: &Digest,
        _image: &AvatarImage,
        _source: ImageSource,
    ) {
    }
}

/// Observer that only writes failures to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl FetchObserver for LogObserver {
    fn fetch_failed(&self, digest: &Digest, error: &FetchError) {
        log::warn!("view: fetching avatar {} failed: {}", digest, error);
    }
}
