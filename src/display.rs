use std::time::Duration;

use crate::decode::AvatarImage;

/// How the surface should move from what it shows now to the new image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Instant,
    CrossFade(Duration),
}

/// The host toolkit's side of the view: draws whatever image the view
/// decides on. `None` means there is nothing to show (no placeholder set).
pub trait DisplaySurface: Send + Sync {
    fn show(&self, image: Option<&AvatarImage>, transition: Transition);
}
