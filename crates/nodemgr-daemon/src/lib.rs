//! nodemgr daemon
//!
//! Remote file access, include resolution and launch loading over Zenoh.

pub mod api;
pub mod client;
pub mod config;
pub mod file_service;
pub mod include_resolver;
pub mod launch_loader;
pub mod zenoh_api;

pub use api::{ApiError, ApiHandler, ErrorKind, ErrorResponse};
pub use client::{ClientError, DaemonClient};
pub use config::{ConfigError, DaemonConfig};
pub use file_service::{FileContent, FileEntry, FileKind, FileService, FileServiceError};
pub use include_resolver::{IncludeError, IncludeQuery, IncludeRecord, IncludeResolver};
pub use launch_loader::{
    LaunchDescriptor, LaunchLoader, LoadError, LoadOutcome, LoadRequest, MtimeReport,
};
pub use zenoh_api::{create_session, run_zenoh_api_server, ZenohApiService};
