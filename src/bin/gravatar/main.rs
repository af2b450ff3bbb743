use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use gravatar_view::{
    AvatarImage, AvatarOptions, DefaultImage, DiskCache, GravatarView,
    Hasher, Identity, Md5Hasher, RemoteImageRef, Status,
    DEFAULT_CACHE_MEMORY_BYTES,
};
use gravatar_view::remote::pixel_size_for;

mod error;
mod surface;

use error::AppError;
use surface::{FileSurface, TerminalObserver};

#[derive(Parser, Debug)]
#[clap(name = "gravatar")]
#[clap(about = "Resolve and download Gravatar avatars", long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct RequestArgs {
    /// JSON file with avatar options
    #[clap(long)]
    config: Option<PathBuf>,

    /// Requested edge length, in pixels unless --scale is given
    #[clap(short, long)]
    size: Option<u32>,

    /// Display scale factor; the size is then read in points
    #[clap(long)]
    scale: Option<f32>,

    /// Fallback served by Gravatar: 404, mp, identicon, retro, ... or a URL
    #[clap(short, long)]
    default_image: Option<DefaultImage>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the digest of an email address
    Digest { email: String },

    /// Print the avatar URL of an email address
    Url {
        email: String,

        #[clap(flatten)]
        request: RequestArgs,
    },

    /// Download an avatar into a PNG file
    Fetch {
        email: String,

        #[clap(short, long)]
        output: PathBuf,

        /// Image written when no avatar is available
        #[clap(long)]
        placeholder: Option<PathBuf>,

        /// Keep downloaded avatars in this directory
        #[clap(long)]
        cache_dir: Option<PathBuf>,

        #[clap(flatten)]
        request: RequestArgs,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = Cli::parse();
    if let Err(err) = run(args.command).await {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

async fn run(command: Command) -> Result<(), AppError> {
    match command {
        Command::Digest { email } => {
            let identity = parse_identity(&email)?;
            println!("{}", Md5Hasher.digest(&identity));
        }
        Command::Url { email, request } => {
            let identity = parse_identity(&email)?;
            let options = load_options(&request)?;
            let remote =
                RemoteImageRef::new(&Md5Hasher.digest(&identity), &options)?;
            println!("{}", remote);
        }
        Command::Fetch {
            email,
            output,
            placeholder,
            cache_dir,
            request,
        } => {
            parse_identity(&email)?;
            let options = load_options(&request)?;
            fetch(&email, output, placeholder, cache_dir, options).await?;
        }
    }
    Ok(())
}

async fn fetch(
    email: &str,
    output: PathBuf,
    placeholder: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    options: AvatarOptions,
) -> Result<(), AppError> {
    let surface = Arc::new(FileSurface::new(output));
    let mut builder = GravatarView::builder(surface.clone())
        .options(options)
        .observer(Arc::new(TerminalObserver));

    if let Some(path) = placeholder {
        let image = AvatarImage::open(&path).map_err(|e| {
            AppError::PlaceholderLoadError(format!("{}: {}", path.display(), e))
        })?;
        builder = builder.placeholder(image);
    }
    if let Some(dir) = cache_dir {
        builder = builder
            .cache(Arc::new(open_cache(&dir)?))
            .caching_policy(true);
    }

    let mut view = builder.build()?;
    view.set_identity(email);
    let status = view.next_completion().await;

    if let Some(err) = surface.take_error() {
        return Err(AppError::OutputError(err));
    }
    match (status, view.last_error()) {
        (Status::Resolved, _) => Ok(()),
        (_, Some(err)) => Err(AppError::FetchFailed(err.clone())),
        (_, None) => Err(AppError::InvalidEmail(email.to_owned())),
    }
}

fn open_cache(dir: &Path) -> Result<DiskCache, AppError> {
    std::fs::create_dir_all(dir)?;
    DiskCache::new(
        "avatars".to_owned(),
        dir,
        DEFAULT_CACHE_MEMORY_BYTES,
        false,
    )
    .map_err(|e| AppError::CacheCreationError(e.to_string()))
}

fn parse_identity(email: &str) -> Result<Identity, AppError> {
    Identity::parse(email).map_err(|_| AppError::InvalidEmail(email.to_owned()))
}

fn load_options(request: &RequestArgs) -> Result<AvatarOptions, AppError> {
    let mut options = match &request.config {
        Some(path) => AvatarOptions::load(path)
            .map_err(|e| AppError::OptionsLoadError(e.to_string()))?,
        None => AvatarOptions::default(),
    };
    if let Some(size) = request.size {
        options.size = size;
    }
    if let Some(scale) = request.scale {
        options.size = pixel_size_for(options.size as f32, scale);
    }
    if let Some(default_image) = &request.default_image {
        options.default_image = default_image.clone();
    }
    Ok(options)
}
