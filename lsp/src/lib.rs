//! Client for a linting language server.
//!
//! [`LintClient`] drives one server connection: lifecycle and restart policy,
//! routing of server notifications into status, the versioned fix workflow,
//! and the auto-fix-on-save hook. The editor side is abstracted behind the
//! traits in [`host`].

pub mod codec;
pub mod commands;
pub mod host;
pub mod lifecycle;
pub mod router;
pub mod status;
pub mod transport;

pub(crate) mod protocol;

mod autofix;
mod client;
mod error;
mod fixes;
mod output;

pub use autofix::{AutoFixOnSave, SaveFixHook};
pub use client::{ClientError, Host, LintClient};
pub use commands::{Command, CommandError, CommandOutcome, CommandRunner};
pub use error::{RequestError, StartError};
pub use fixes::{FixCompletion, FixOutcome, FixRequester, FixWorkflow, RequestFut};
pub use host::{
    Disposable, DocumentSurface, EditFut, SaveFut, SaveInterceptor, SaveTarget, WillSaveHook,
};
pub use lifecycle::{CloseAction, DefaultErrorHandler, ErrorAction, ErrorHandler, ReadyHandle};
pub use output::OutputChannel;
pub use protocol::{FixRequest, PathToUriError, TextDocumentIdentifier, path_to_file_uri};
pub use router::ServerNotification;
pub use status::{LanguageSet, StatusAggregator, StatusSnapshot};
pub use transport::{
    ProcessLauncher, ServerIo, ServerLauncher, SharedTransport, TransportEvent, TransportHandle,
};
