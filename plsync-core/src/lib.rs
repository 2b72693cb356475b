mod listing;
mod thumbnail;

pub use listing::{PlaylistClient, PlaylistListing, RemoteEntry, SourceError, Thumbnail};
pub use thumbnail::{ThumbnailClient, ThumbnailError};
