//! Download pipeline, preloader and media cache

pub mod cache;
pub mod pipeline;
pub mod preloader;

pub use cache::MediaCache;
pub use pipeline::{DownloadFailure, DownloadPipeline};
pub use preloader::{PreloadFailure, Preloader};
