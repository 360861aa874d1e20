//! Request flow: one procedure call from decoded request to shaped response.
//!
//! Everything here blocks on the database, so [`GatewayService::call`]
//! moves the work onto the blocking pool. The session goes back to the pool
//! before the response is shaped; release validation never delays the
//! caller.

use std::sync::Arc;
use std::time::Duration;

use crate::call::{CallBuilder, CallRequest, execute_call};
use crate::cgi::{CgiSettings, RequestInfo, prepare_session};
use crate::config::GatewayConfig;
use crate::db::{Connector, Session};
use crate::error::GatewayError;
use crate::output::{GeneratedOutput, OutputStreamer};
use crate::pool::{PoolError, PoolSnapshot, SessionPool, ShutdownReport};
use crate::procedure::SignatureCache;
use crate::response::{self, ShapedResponse};
use crate::version::VersionInfo;

/// A decoded request for one procedure.
#[derive(Debug, Clone)]
pub struct ProcedureRequest {
    /// Last path segment, including any `!` marker.
    pub procedure: String,
    /// Form pairs in submission order.
    pub params: Vec<(String, String)>,
    pub info: RequestInfo,
}

/// State for the health endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthSnapshot {
    pub pool: PoolSnapshot,
    pub version: VersionInfo,
}

pub struct GatewayService {
    pool: SessionPool,
    signatures: SignatureCache,
    builder: CallBuilder,
    streamer: OutputStreamer,
    cgi: CgiSettings,
    shutdown_wait: Duration,
    version: VersionInfo,
}

impl GatewayService {
    /// Start the session pool and wire up the request flow.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(config: &GatewayConfig, connector: Arc<dyn Connector>) -> Result<Self, PoolError> {
        let pool = SessionPool::start(config.pool.clone(), connector)?;
        Ok(Self {
            pool,
            signatures: SignatureCache::new(config.procedures.cache),
            builder: CallBuilder::new(config.procedures.excluded_prefixes.iter().cloned()),
            streamer: OutputStreamer::new(&config.spool.directory, config.spool.threshold_bytes),
            cgi: CgiSettings {
                dad: config.server.dad.clone(),
                charset: config.database.charset.clone(),
                listen_port: config.server.listen_port,
                username: config.database.username.clone(),
                password: config.database.password().to_string(),
            },
            shutdown_wait: config.pool.shutdown_wait(),
            version: VersionInfo::new(),
        })
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            pool: self.pool.snapshot(),
            version: self.version.clone(),
        }
    }

    /// Run one procedure call on the blocking pool.
    pub async fn call(
        self: &Arc<Self>,
        request: ProcedureRequest,
    ) -> Result<ShapedResponse, GatewayError> {
        let service = Arc::clone(self);
        tokio::task::spawn_blocking(move || service.call_blocking(request))
            .await
            .map_err(|e| GatewayError::Internal(format!("procedure call task failed: {e}")))?
    }

    /// Run one procedure call on the current thread.
    pub fn call_blocking(&self, request: ProcedureRequest) -> Result<ShapedResponse, GatewayError> {
        let ProcedureRequest {
            procedure,
            params,
            info,
        } = request;
        let call = CallRequest::new(&procedure, params);
        self.builder.authorize(&call)?;

        let mut lease = self.pool.acquire()?;
        tracing::debug!(session = %lease.id(), procedure = %call.name(), "Calling procedure");
        let generated = self.generate(lease.session(), &call, &info);
        // Fire-and-forget; validation happens on a pool worker.
        drop(self.pool.release(lease));

        let output = generated?;
        Ok(response::shape(output)?)
    }

    fn generate(
        &self,
        session: &mut dyn Session,
        call: &CallRequest,
        info: &RequestInfo,
    ) -> Result<GeneratedOutput, GatewayError> {
        prepare_session(session, info, &self.cgi)?;
        let signature = self.signatures.resolve(session, call.name())?;
        let planned = self.builder.build(call, &signature)?;
        execute_call(session, call, &planned)?;
        self.streamer.drain(session)
    }

    /// Close pooled sessions within the configured wait budget.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.pool.shutdown(self.shutdown_wait).await
    }
}
