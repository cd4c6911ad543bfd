//! Health HTTP server

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use crate::observability::{log_event_with_fields, Event};

use super::routes::{health_routes, HealthState};

/// Bound health server. Binding and serving are split so callers can learn
/// the real port before serving.
pub struct HealthServer {
    listener: TcpListener,
    router: Router,
}

impl HealthServer {
    pub async fn bind(addr: &str, state: Arc<HealthState>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            router: health_routes(state),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        log_event_with_fields(Event::HealthServing, &[("addr", &addr.to_string())]);
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
