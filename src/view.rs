use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinError, JoinHandle};

use crate::cache::ImageCache;
use crate::decode::{AvatarImage, ImageCrateDecoder, ImageDecoder};
use crate::digest::{Digest, Hasher, Md5Hasher};
use crate::display::{DisplaySurface, Transition};
use crate::identity::Identity;
use crate::observer::{FetchObserver, ImageSource, LogObserver};
use crate::remote::{AvatarOptions, RemoteImageRef};
use crate::transport::{HttpTransport, Transport};
use crate::{FetchError, GravatarError, Result, TransportError};

/// Observable phase of a [`GravatarView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Fetching,
    Resolved,
    Failed,
}

/// The one request a view may have in flight.
///
/// Dropping the handle aborts the task; whatever it would have reported
/// is discarded because its ticket no longer matches.
#[derive(Debug)]
pub struct FetchHandle {
    ticket: u64,
    digest: Digest,
    task: JoinHandle<()>,
}

impl FetchHandle {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }
}

impl Drop for FetchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum FetchState {
    Idle,
    Fetching(FetchHandle),
    Resolved(AvatarImage),
    Failed(FetchError),
}

struct Subject {
    identity: Identity,
    digest: Digest,
    remote: RemoteImageRef,
}

struct Completion {
    ticket: u64,
    outcome: std::result::Result<AvatarImage, FetchError>,
}

enum Wakeup {
    Completion(Option<Completion>),
    Joined(std::result::Result<(), JoinError>),
}

/// Downloads `remote` and decodes it. Non-2xx answers are failures even
/// when they carry an image body.
pub async fn fetch_avatar(
    transport: &dyn Transport,
    decoder: &dyn ImageDecoder,
    remote: &RemoteImageRef,
) -> std::result::Result<AvatarImage, FetchError> {
    let response = transport.get(remote).await?;
    if !response.is_success() {
        return Err(FetchError::HttpStatus(response.status));
    }
    Ok(decoder.decode(&response.body)?)
}

/// Shows the Gravatar for an email address on a [`DisplaySurface`].
///
/// The view lives on the thread that owns the surface. Requests run on
/// the tokio runtime captured at build time and report back through a
/// queue; call [`GravatarView::poll_completions`] from the host's event
/// loop, or await [`GravatarView::next_completion`], to apply them.
pub struct GravatarView {
    options: AvatarOptions,
    hasher: Arc<dyn Hasher>,
    transport: Arc<dyn Transport>,
    decoder: Arc<dyn ImageDecoder>,
    cache: Option<Arc<dyn ImageCache>>,
    surface: Arc<dyn DisplaySurface>,
    observer: Arc<dyn FetchObserver>,
    runtime: Handle,

    subject: Option<Subject>,
    placeholder: Option<AvatarImage>,
    state: FetchState,
    caching: bool,
    animated: bool,

    next_ticket: u64,
    completions_tx: UnboundedSender<Completion>,
    completions_rx: UnboundedReceiver<Completion>,
}

impl GravatarView {
    pub fn builder(surface: Arc<dyn DisplaySurface>) -> GravatarViewBuilder {
        GravatarViewBuilder {
            surface,
            options: AvatarOptions::default(),
            hasher: None,
            transport: None,
            decoder: None,
            cache: None,
            observer: None,
            runtime: None,
            placeholder: None,
            caching: false,
            animated: false,
        }
    }

    /// Points the view at a new email address.
    ///
    /// Any fetch for the previous address is cancelled and its image
    /// forgotten. An address that does not parse leaves the view idle on
    /// the placeholder.
    pub fn set_identity(&mut self, email: &str) {
        self.cancel_fetch();

        let identity = match Identity::parse(email) {
            Ok(identity) => identity,
            Err(err) => {
                log::debug!("view: clearing identity: {}", err);
                self.subject = None;
                self.show_placeholder();
                return;
            }
        };

        let digest = self.hasher.digest(&identity);
        let remote = match RemoteImageRef::new(&digest, &self.options) {
            Ok(remote) => remote,
            Err(err) => {
                log::error!("view: cannot address avatar {}: {}", digest, err);
                self.subject = None;
                self.show_placeholder();
                return;
            }
        };
        log::debug!("view: identity {} has digest {}", identity, digest);

        self.subject = Some(Subject {
            identity,
            digest: digest.clone(),
            remote: remote.clone(),
        });

        if let Some(image) = self.cached(&digest) {
            log::debug!("view: cache hit for {}", digest);
            self.surface.show(Some(&image), Transition::Instant);
            self.observer
                .avatar_resolved(&digest, &image, ImageSource::Cache);
            self.state = FetchState::Resolved(image);
            return;
        }

        self.show_placeholder();
        self.start_fetch(digest, remote);
    }

    /// Forgets the identity and shows the placeholder.
    pub fn clear_identity(&mut self) {
        self.set_identity("");
    }

    /// Replaces the fallback image, showing it right away unless a
    /// resolved avatar is on screen.
    pub fn set_placeholder_image(&mut self, image: Option<AvatarImage>) {
        self.placeholder = image;
        if !matches!(self.state, FetchState::Resolved(_)) {
            self.show_placeholder();
        }
    }

    pub fn set_caching_policy(&mut self, enabled: bool) {
        self.caching = enabled;
    }

    pub fn set_animation_policy(&mut self, enabled: bool) {
        self.animated = enabled;
    }

    pub fn caching_policy(&self) -> bool {
        self.caching
    }

    pub fn animation_policy(&self) -> bool {
        self.animated
    }

    pub fn options(&self) -> &AvatarOptions {
        &self.options
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.subject.as_ref().map(|s| &s.identity)
    }

    pub fn digest(&self) -> Option<&Digest> {
        self.subject.as_ref().map(|s| &s.digest)
    }

    pub fn remote_image_ref(&self) -> Option<&RemoteImageRef> {
        self.subject.as_ref().map(|s| &s.remote)
    }

    pub fn placeholder_image(&self) -> Option<&AvatarImage> {
        self.placeholder.as_ref()
    }

    pub fn resolved_image(&self) -> Option<&AvatarImage> {
        match &self.state {
            FetchState::Resolved(image) => Some(image),
            _ => None,
        }
    }

    /// What the surface was last told to show.
    pub fn displayed_image(&self) -> Option<&AvatarImage> {
        self.resolved_image().or(self.placeholder.as_ref())
    }

    pub fn status(&self) -> Status {
        match self.state {
            FetchState::Idle => Status::Idle,
            FetchState::Fetching(_) => Status::Fetching,
            FetchState::Resolved(_) => Status::Resolved,
            FetchState::Failed(_) => Status::Failed,
        }
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self.state, FetchState::Fetching(_))
    }

    pub fn active_fetch(&self) -> Option<&FetchHandle> {
        match &self.state {
            FetchState::Fetching(handle) => Some(handle),
            _ => None,
        }
    }

    /// The error that ended the last fetch, while the view is `Failed`.
    pub fn last_error(&self) -> Option<&FetchError> {
        match &self.state {
            FetchState::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Applies every completion that has already arrived, without waiting.
    /// Returns how many of them belonged to the active fetch.
    pub fn poll_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            if self.apply(completion) {
                applied += 1;
            }
        }
        applied
    }

    /// Waits until the active fetch, if any, has settled.
    pub async fn next_completion(&mut self) -> Status {
        loop {
            let wakeup = {
                let FetchState::Fetching(handle) = &mut self.state else {
                    break;
                };
                tokio::select! {
                    biased;
                    completion = self.completions_rx.recv() => {
                        Wakeup::Completion(completion)
                    }
                    joined = &mut handle.task => Wakeup::Joined(joined),
                }
            };

            match wakeup {
                Wakeup::Completion(Some(completion)) => {
                    self.apply(completion);
                }
                Wakeup::Completion(None) => break,
                Wakeup::Joined(joined) => {
                    // The task posts before it returns, so its completion
                    // is already queued unless it panicked.
                    self.poll_completions();
                    if let FetchState::Fetching(handle) = &self.state {
                        let reason = match joined {
                            Err(err) => format!("fetch task failed: {}", err),
                            Ok(()) => "fetch task ended silently".to_owned(),
                        };
                        let ticket = handle.ticket;
                        self.apply(Completion {
                            ticket,
                            outcome: Err(TransportError::Request(reason).into()),
                        });
                    }
                }
            }
        }
        self.status()
    }

    /// Cancels any fetch and drops every image the view holds.
    pub fn teardown(mut self) {
        log::debug!("view: teardown");
        self.cancel_fetch();
        self.subject = None;
        self.placeholder = None;
    }

    fn cached(&self, digest: &Digest) -> Option<AvatarImage> {
        if !self.caching {
            return None;
        }
        self.cache.as_ref()?.get(digest)
    }

    fn transition(&self) -> Transition {
        if self.animated {
            Transition::CrossFade(self.options.cross_fade())
        } else {
            Transition::Instant
        }
    }

    fn show_placeholder(&self) {
        self.surface
            .show(self.placeholder.as_ref(), Transition::Instant);
    }

    fn cancel_fetch(&mut self) {
        let previous = std::mem::replace(&mut self.state, FetchState::Idle);
        if let FetchState::Fetching(handle) = previous {
            log::debug!(
                "view: cancelling fetch #{} for {}",
                handle.ticket,
                handle.digest
            );
        }

        // Nothing is live any more, so whatever is queued is stale.
        let mut discarded = 0;
        while self.completions_rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            log::debug!("view: discarded {} stale completions", discarded);
        }
    }

    fn start_fetch(&mut self, digest: Digest, remote: RemoteImageRef) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        log::debug!("view: fetch #{} for {} from {}", ticket, digest, remote);

        let transport = Arc::clone(&self.transport);
        let decoder = Arc::clone(&self.decoder);
        let completions = self.completions_tx.clone();
        let task = self.runtime.spawn(async move {
            let outcome =
                fetch_avatar(transport.as_ref(), decoder.as_ref(), &remote)
                    .await;
            // Fails only once the view is gone, and then nobody cares.
            let _ = completions.send(Completion { ticket, outcome });
        });

        self.state = FetchState::Fetching(FetchHandle {
            ticket,
            digest,
            task,
        });
    }

    /// Settles the active fetch if `completion` belongs to it.
    fn apply(&mut self, completion: Completion) -> bool {
        let digest = match &self.state {
            FetchState::Fetching(handle) if handle.ticket == completion.ticket => {
                handle.digest.clone()
            }
            _ => {
                log::debug!(
                    "view: dropping stale completion #{}",
                    completion.ticket
                );
                return false;
            }
        };

        match completion.outcome {
            Ok(image) => {
                log::debug!("view: fetch #{} resolved {}", completion.ticket, digest);
                if self.caching {
                    if let Some(cache) = &self.cache {
                        if let Err(err) = cache.put(&digest, &image) {
                            log::error!(
                                "view: failed to cache avatar {}: {}",
                                digest,
                                err
                            );
                        }
                    }
                }
                self.surface.show(Some(&image), self.transition());
                self.observer
                    .avatar_resolved(&digest, &image, ImageSource::Network);
                self.state = FetchState::Resolved(image);
            }
            Err(error) => {
                log::warn!(
                    "view: fetch #{} for {} failed: {}",
                    completion.ticket,
                    digest,
                    error
                );
                self.observer.fetch_failed(&digest, &error);
                self.state = FetchState::Failed(error);
            }
        }
        true
    }
}

/// Assembles a [`GravatarView`]; every collaborator but the surface has a
/// default.
pub struct GravatarViewBuilder {
    surface: Arc<dyn DisplaySurface>,
    options: AvatarOptions,
    hasher: Option<Arc<dyn Hasher>>,
    transport: Option<Arc<dyn Transport>>,
    decoder: Option<Arc<dyn ImageDecoder>>,
    cache: Option<Arc<dyn ImageCache>>,
    observer: Option<Arc<dyn FetchObserver>>,
    runtime: Option<Handle>,
    placeholder: Option<AvatarImage>,
    caching: bool,
    animated: bool,
}

impl GravatarViewBuilder {
    pub fn options(mut self, options: AvatarOptions) -> Self {
        self.options = options;
        self
    }

    pub fn hasher(mut self, hasher: Arc<dyn Hasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// The cache consulted while the caching policy is on.
    pub fn cache(mut self, cache: Arc<dyn ImageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn FetchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Runtime that executes requests. Defaults to the one the builder is
    /// called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn placeholder(mut self, image: AvatarImage) -> Self {
        self.placeholder = Some(image);
        self
    }

    pub fn caching_policy(mut self, enabled: bool) -> Self {
        self.caching = enabled;
        self
    }

    pub fn animation_policy(mut self, enabled: bool) -> Self {
        self.animated = enabled;
        self
    }

    /// Builds the view and shows the placeholder.
    pub fn build(self) -> Result<GravatarView> {
        self.options.validate()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|err| GravatarError::Runtime(err.to_string()))?,
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.options)?),
        };
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let view = GravatarView {
            hasher: self.hasher.unwrap_or_else(|| Arc::new(Md5Hasher)),
            transport,
            decoder: self
                .decoder
                .unwrap_or_else(|| Arc::new(ImageCrateDecoder)),
            cache: self.cache,
            surface: self.surface,
            observer: self.observer.unwrap_or_else(|| Arc::new(LogObserver)),
            runtime,
            options: self.options,

            subject: None,
            placeholder: self.placeholder,
            state: FetchState::Idle,
            caching: self.caching,
            animated: self.animated,

            next_ticket: 0,
            completions_tx,
            completions_rx,
        };
        view.show_placeholder();
        Ok(view)
    }
}
