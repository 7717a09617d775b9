//! Mailroom Remote Service Layer
//!
//! The campaign service is an opaque capability ([`CampaignService`]).
//! [`CampaignProxy`] is the only way the rest of the system talks to it:
//! it adds result caching, warning capture and a per-call timeout.

pub mod error;
pub mod proxy;
pub mod service;
pub mod warning;

pub use error::RemoteError;
pub use proxy::CampaignProxy;
pub use service::{CampaignDraft, CampaignInfo, CampaignService, ListMember};
pub use warning::{PendingWarning, WarningCapture, WarningCategory, WarningHandle};

pub type Result<T> = std::result::Result<T, RemoteError>;
