// ABOUTME: Public library API for orgfoundry journal sync
// ABOUTME: Re-exports core modules for external use

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod convert;
pub mod error;
pub mod mapper;
pub mod model;
pub mod storage;
pub mod sync;
pub mod util;

pub use api::{ApiClient, RemoteStore};
pub use error::{Error, Result};
pub use model::{RemoteId, RemoteNode, RemoteTree, SyncReport, UploadReport};
pub use storage::Paths;
pub use sync::Selector;
