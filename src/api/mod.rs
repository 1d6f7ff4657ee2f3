// API module - HTTP CALLS OUTSIDE THE SYNC CHANNEL
// Session archiving used to resolve failed revivals

mod archive;

pub use archive::{ApiError, ArchiveApi, HttpArchiveClient, DEFAULT_REQUEST_TIMEOUT};
