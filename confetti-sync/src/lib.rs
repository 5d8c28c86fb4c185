//! # confetti-sync
//!
//! Change detection, patch synthesis and concurrent dispatch to the remote
//! build service.
//!
//! [`pipeline::sync_all`] is the one-shot entrypoint: it reads the change set
//! from git, builds a patch per path and fans the batch out through a
//! [`SyncDispatcher`].

pub mod dispatch;
pub mod error;
pub mod events;
pub mod git;
pub mod patch;
pub mod pipeline;
pub mod remote;
pub mod status;
pub mod transport;

pub use dispatch::{DispatchConfig, SyncDispatcher};
pub use error::SyncError;
pub use events::{BroadcastSink, NoopSink, Notification, NotificationSink, TracingSink};
pub use git::GitCli;
pub use patch::PatchOutcome;
pub use pipeline::sync_all;
pub use remote::RemoteApi;
pub use transport::{
    AuthProvider, HttpTransport, RecordingTransport, RemoteRequest, RetryState, Transport,
};
