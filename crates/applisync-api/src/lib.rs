// applisync-api: Vendor boundary for cloud-connected appliances.
//
// Credential lifecycle, REST client, and the server-sent event stream.
// Nothing in here knows about merged state or capability resolution.

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod push;
pub mod transport;

pub use auth::{
    CredentialManager, CredentialSet, CredentialSink, RenewalPolicy, TokenGrant, TokenRenewer,
};
pub use client::{ApplianceApi, CloudClient, DEFAULT_BASE_URL, TokenEndpoint};
pub use error::Error;
pub use models::{ApplianceDetails, ApplianceInfo, ApplianceState, ApplianceSummary, CommandAck};
pub use push::{PushEvent, PushHandle, PushSource, ReconnectConfig, StreamStatus};
pub use transport::{TlsMode, TransportConfig};
