//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use std::sync::Arc;

use jsonrpsee::types::ErrorObjectOwned;
use tracing::debug;

use cronvisor_core::application::SupervisorRegistry;
use cronvisor_core::error::AppError;

use crate::error::to_rpc_error;
use crate::types::{
    ListRequest, ListResponse, RestartRequest, RestartResponse, StartRequest, StartResponse,
    StatusRequest, StatusResponse, StopRequest, StopResponse, TailLogsRequest, TailLogsResponse,
};

/// RPC Handler with the injected registry
pub struct RpcHandler {
    registry: Arc<SupervisorRegistry>,
}

impl RpcHandler {
    pub fn new(registry: Arc<SupervisorRegistry>) -> Self {
        Self { registry }
    }

    /// job.start.v1
    pub async fn start(&self, params: StartRequest) -> Result<StartResponse, ErrorObjectOwned> {
        debug!(job = %params.name, wait = params.wait, "rpc start");
        let ack = self
            .registry
            .start(&params.name)
            .await
            .map_err(to_rpc_error)?;
        let pid = ack.pid;

        let exit = if params.wait {
            Some(ack.done.await.map_err(|_| {
                to_rpc_error(AppError::Stopped(params.name.clone()))
            })?)
        } else {
            None
        };

        Ok(StartResponse {
            name: params.name,
            pid,
            exit,
        })
    }

    /// job.stop.v1
    pub async fn stop(&self, params: StopRequest) -> Result<StopResponse, ErrorObjectOwned> {
        debug!(job = %params.name, "rpc stop");
        self.registry
            .stop(&params.name)
            .await
            .map_err(to_rpc_error)?;
        Ok(StopResponse {
            name: params.name,
            stopped: true,
        })
    }

    /// job.restart.v1
    pub async fn restart(
        &self,
        params: RestartRequest,
    ) -> Result<RestartResponse, ErrorObjectOwned> {
        debug!(job = %params.name, "rpc restart");
        let ack = self
            .registry
            .restart(&params.name)
            .await
            .map_err(to_rpc_error)?;
        Ok(RestartResponse {
            name: params.name,
            pid: ack.pid,
        })
    }

    /// job.status.v1
    pub async fn status(&self, params: StatusRequest) -> Result<StatusResponse, ErrorObjectOwned> {
        let snapshot = self.registry.status(&params.name).map_err(to_rpc_error)?;
        Ok(StatusResponse { snapshot })
    }

    /// job.list.v1
    pub async fn list(&self, _params: ListRequest) -> Result<ListResponse, ErrorObjectOwned> {
        Ok(ListResponse {
            jobs: self.registry.list(),
        })
    }

    /// logs.tail.v1
    ///
    /// Returns the last N combined-log lines plus the path, so follow
    /// mode can keep tailing the file client-side.
    pub async fn tail_logs(
        &self,
        params: TailLogsRequest,
    ) -> Result<TailLogsResponse, ErrorObjectOwned> {
        let spec = self.registry.spec(&params.name).map_err(to_rpc_error)?;
        let path = spec.log_file.clone();

        let lines = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let all: Vec<&str> = content.lines().collect();
                let skip = all.len().saturating_sub(params.lines);
                all[skip..].iter().map(|l| l.to_string()).collect()
            }
            // Nothing captured yet is not an error.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(to_rpc_error(AppError::Io(e))),
        };

        Ok(TailLogsResponse {
            name: params.name,
            log_path: path.display().to_string(),
            lines,
        })
    }
}
