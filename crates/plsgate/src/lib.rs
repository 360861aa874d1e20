//! plsgate: HTTP gateway that runs PL/SQL procedures in a CGI-style environment.

mod cgi;
mod output;
mod response;
mod version;

pub mod call;
pub mod config;
pub mod db;
pub mod error;
pub mod pool;
pub mod procedure;
pub mod service;
pub mod transport;

pub use call::{CallBuilder, CallRequest, PlannedBind, PlannedCall};
pub use cgi::{CgiEnvironment, CgiSettings, RequestInfo};
pub use config::{ConfigError, GatewayConfig};
pub use error::GatewayError;
pub use output::{GeneratedOutput, OutputStreamer};
pub use pool::{PoolError, PoolSnapshot, SessionLease, SessionPool, SessionStatus, ShutdownReport};
pub use procedure::{ProcedureSignature, SignatureCache};
pub use response::{ResponseBody, ResponseHead, ShapedResponse};
pub use service::{GatewayService, HealthSnapshot, ProcedureRequest};
pub use version::{GATEWAY_NAME, GATEWAY_VERSION, VersionInfo};
