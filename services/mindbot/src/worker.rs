//! The worker process: prewarmed resources plus one job per connection.

use crate::{
    config::AgentConfig,
    console::console_room,
    entrypoint::{AdapterFactory, JobContext, entrypoint},
    prewarm::{PrewarmError, ProcessResources, prewarm},
    router::create_router,
};
use anyhow::Result;
use mindbot_core::{room::Room, vad::VadOptions};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::{
    sync::CancellationToken,
    task::{TaskTracker, task_tracker::TrackedFuture},
};
use tracing::{error, info};

pub struct Worker {
    config: Arc<AgentConfig>,
    resources: Arc<ProcessResources>,
    adapters: Arc<dyn AdapterFactory>,
    shutdown: CancellationToken,
    jobs: TaskTracker,
}

impl Worker {
    /// Prewarms process resources. Fails if the VAD cannot be loaded.
    pub fn new(
        config: AgentConfig,
        adapters: Arc<dyn AdapterFactory>,
        vad_options: VadOptions,
    ) -> Result<Self, PrewarmError> {
        let resources = Arc::new(ProcessResources::new());
        prewarm(&resources, vad_options)?;
        Ok(Self {
            config: Arc::new(config),
            resources,
            adapters,
            shutdown: CancellationToken::new(),
            jobs: TaskTracker::new(),
        })
    }

    /// Closes every running session. Their jobs still run shutdown callbacks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Registers a job so [`Worker::serve_on`] waits for it before returning.
    pub(crate) fn track<F: Future>(&self, job: F) -> TrackedFuture<F> {
        self.jobs.track_future(job)
    }

    /// Runs one job in `room` until the session ends or the worker shuts
    /// down, then runs its shutdown callbacks.
    pub async fn run_job(&self, room: Arc<dyn Room>) -> Result<()> {
        let ctx = JobContext::new(room, self.resources.clone());
        let result = match entrypoint(&ctx, &self.config, self.adapters.as_ref()).await {
            Ok(session) => {
                tokio::select! {
                    _ = session.closed() => {}
                    _ = self.shutdown.cancelled() => info!("Worker shutting down; closing session"),
                }
                session.aclose().await;
                Ok(())
            }
            Err(e) => Err(e),
        };
        ctx.shutdown().await;
        result
    }

    /// Runs a single session against the terminal.
    pub async fn run_console(&self) -> Result<()> {
        info!("Console mode: type a message and press Enter. Ctrl+D to quit.");
        let (room, reader, writer) = console_room();
        let signal = self.cancel_on_signal();
        let result = self.run_job(Arc::new(room)).await;
        signal.abort();
        reader.abort();
        let _ = writer.await;
        result
    }

    /// Serves `/ws` and `/healthz` on `bind_address` until Ctrl+C.
    pub async fn serve(self: Arc<Self>, bind_address: SocketAddr) -> Result<()> {
        info!(
            %bind_address,
            agent = %self.config.agent_name,
            llm_model = %self.config.llm_model,
            "Worker configured. Starting server..."
        );
        let listener = TcpListener::bind(bind_address).await?;
        self.serve_on(listener).await
    }

    /// Serves on `listener` until Ctrl+C or [`Worker::shutdown`], then waits
    /// for every running job to finish.
    pub async fn serve_on(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let app = create_router(self.clone());
        let signal = self.cancel_on_signal();
        let shutdown = self.shutdown.clone();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
        signal.abort();

        self.shutdown.cancel();
        self.jobs.close();
        info!(jobs = self.jobs.len(), "Waiting for running jobs to finish");
        self.jobs.wait().await;
        info!("Server has shut down.");
        Ok(())
    }

    fn cancel_on_signal(&self) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
    }
}

/// Listens for the `Ctrl+C` signal to gracefully shut down.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal. Shutting down gracefully..."),
        Err(e) => {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
