use std::path::PathBuf;
use std::sync::Mutex;

use gravatar_view::{
    AvatarImage, Digest, DisplaySurface, FetchError, FetchObserver,
    ImageSource, Transition,
};
use image::ImageFormat;

/// Writes whatever the view shows to a PNG file.
pub struct FileSurface {
    output: PathBuf,
    last_error: Mutex<Option<String>>,
}

impl FileSurface {
    pub fn new(output: PathBuf) -> Self {
        Self {
            output,
            last_error: Mutex::new(None),
        }
    }

    pub fn take_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .map(|mut guard| guard.take())
            .unwrap_or_else(|poisoned| poisoned.into_inner().take())
    }
}

impl DisplaySurface for FileSurface {
    fn show(&self, image: Option<&AvatarImage>, _transition: Transition) {
        let Some(image) = image else {
            log::debug!("surface: nothing to show");
            return;
        };

        let result = image
            .pixels()
            .save_with_format(&self.output, ImageFormat::Png);
        match result {
            Ok(()) => log::debug!(
                "surface: wrote {}x{} image to {}",
                image.width(),
                image.height(),
                self.output.display()
            ),
            Err(err) => {
                let message = format!("{}: {}", self.output.display(), err);
                if let Ok(mut guard) = self.last_error.lock() {
                    *guard = Some(message);
                }
            }
        }
    }
}

/// Reports fetch results on the terminal.
pub struct TerminalObserver;

impl FetchObserver for TerminalObserver {
    fn fetch_failed(&self, digest: &Digest, error: &FetchError) {
        eprintln!("Avatar {} unavailable: {}", digest, error);
    }

    fn avatar_resolved(
        &self,
        digest: &Digest,
        image: &AvatarImage,
        source: ImageSource,
    ) {
        let origin = match source {
            ImageSource::Network => "downloaded",
            ImageSource::Cache => "cached",
        };
        println!(
            "Avatar {} {} ({}x{})",
            digest,
            origin,
            image.width(),
            image.height()
        );
    }
}
