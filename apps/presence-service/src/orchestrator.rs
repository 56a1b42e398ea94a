//! Runs the HTTP and gRPC transports side by side and reports whichever fails first.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::identity::IdentityValidator;
use crate::presence::PresenceService;
use crate::rpc::serve_rpc;
use crate::server::{AppState, serve_http};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    Rpc,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Rpc => f.write_str("rpc"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{transport} listener failed to bind {addr}: {source}")]
    Bind {
        transport: Transport,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("{transport} server failed: {reason}")]
    Serve { transport: Transport, reason: String },
    #[error("{transport} server stopped")]
    Stopped { transport: Transport },
    #[error("orchestrator was already started")]
    AlreadyStarted,
}

impl TransportError {
    pub fn transport(&self) -> Option<Transport> {
        match self {
            Self::Bind { transport, .. }
            | Self::Serve { transport, .. }
            | Self::Stopped { transport } => Some(*transport),
            Self::AlreadyStarted => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    NotStarted,
    Running,
    Failed,
}

pub struct ServiceOrchestrator {
    config: Config,
    presence: Arc<PresenceService>,
    validator: Arc<dyn IdentityValidator>,
    state: OrchestratorState,
}

impl ServiceOrchestrator {
    pub fn new(
        config: Config,
        presence: Arc<PresenceService>,
        validator: Arc<dyn IdentityValidator>,
    ) -> Self {
        Self {
            config,
            presence,
            validator,
            state: OrchestratorState::NotStarted,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Starts both listeners and waits for the first one to fail.
    ///
    /// Listeners bind inside their own tasks, so a bind failure on one transport is
    /// returned without waiting on the other. Once a failure is seen the surviving
    /// transport is aborted and the orchestrator stays `Failed`. Dropping this
    /// future aborts both and returns the orchestrator to `NotStarted`.
    pub async fn start(&mut self) -> TransportError {
        if self.state != OrchestratorState::NotStarted {
            return TransportError::AlreadyStarted;
        }
        let mut run = RunState::enter(&mut self.state);

        let app_state = AppState::new(
            self.config.clone(),
            self.presence.clone(),
            self.validator.clone(),
        );
        let mut http = TransportTask::spawn(
            Transport::Http,
            run_http(self.config.http_addr(), app_state),
        );
        let mut rpc = TransportTask::spawn(
            Transport::Rpc,
            run_rpc(self.config.rpc_addr(), self.presence.clone()),
        );

        let error = tokio::select! {
            error = http.finished() => error,
            error = rpc.finished() => error,
        };
        run.exit_with(OrchestratorState::Failed);
        tracing::error!(%error, "transport failed; stopping service");
        error
    }

    /// Startup-probe mode: always succeeds and checks nothing.
    pub fn health() -> ExitCode {
        ExitCode::SUCCESS
    }
}

/// Holds the orchestrator in `Running` and writes the exit state when dropped.
struct RunState<'a> {
    state: &'a mut OrchestratorState,
    exit: OrchestratorState,
}

impl<'a> RunState<'a> {
    fn enter(state: &'a mut OrchestratorState) -> Self {
        *state = OrchestratorState::Running;
        Self {
            state,
            exit: OrchestratorState::NotStarted,
        }
    }

    fn exit_with(&mut self, exit: OrchestratorState) {
        self.exit = exit;
    }
}

impl Drop for RunState<'_> {
    fn drop(&mut self) {
        *self.state = self.exit;
    }
}

struct TransportTask {
    transport: Transport,
    handle: JoinHandle<TransportError>,
}

impl TransportTask {
    fn spawn<F>(transport: Transport, run: F) -> Self
    where
        F: Future<Output = TransportError> + Send + 'static,
    {
        Self {
            transport,
            handle: tokio::spawn(run),
        }
    }

    async fn finished(&mut self) -> TransportError {
        match (&mut self.handle).await {
            Ok(error) => error,
            Err(join_error) => TransportError::Serve {
                transport: self.transport,
                reason: join_error.to_string(),
            },
        }
    }
}

impl Drop for TransportTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn bind(transport: Transport, addr: SocketAddr) -> Result<TcpListener, TransportError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind {
            transport,
            addr,
            source,
        })?;
    let local_addr = listener.local_addr().unwrap_or(addr);
    tracing::info!(%transport, addr = %local_addr, "listener bound");
    Ok(listener)
}

async fn run_http(addr: SocketAddr, state: AppState) -> TransportError {
    let listener = match bind(Transport::Http, addr).await {
        Ok(listener) => listener,
        Err(error) => return error,
    };
    match serve_http(listener, state).await {
        Ok(()) => TransportError::Stopped {
            transport: Transport::Http,
        },
        Err(error) => TransportError::Serve {
            transport: Transport::Http,
            reason: error.to_string(),
        },
    }
}

async fn run_rpc(addr: SocketAddr, presence: Arc<PresenceService>) -> TransportError {
    let listener = match bind(Transport::Rpc, addr).await {
        Ok(listener) => listener,
        Err(error) => return error,
    };
    match serve_rpc(listener, presence).await {
        Ok(()) => TransportError::Stopped {
            transport: Transport::Rpc,
        },
        Err(error) => TransportError::Serve {
            transport: Transport::Rpc,
            reason: error.to_string(),
        },
    }
}
