//! HTTP endpoints.
//!
//! An [`Endpoint`] owns a port, a route table and a handle to the shared
//! event channel. Routes are registered while the endpoint is being set up;
//! the table is frozen when the listen loop starts.

use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::event::EventSender;
use crate::route::RouteTable;
use crate::shutdown::ShutdownSignal;
use crate::template::TemplateEngine;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// A listener plus its route table.
pub struct Endpoint {
    port: String,
    routes: RouteTable,
    events: EventSender,
    engine: Arc<TemplateEngine>,
}

impl Endpoint {
    /// Create an endpoint that will listen on `port`.
    pub fn new(port: impl Into<String>, events: EventSender, engine: Arc<TemplateEngine>) -> Self {
        Self {
            port: port.into(),
            routes: RouteTable::new(),
            events,
            engine,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Bind address for the configured port. A bare port binds all
    /// interfaces; `host:port` is used as given.
    pub fn bind_addr(&self) -> String {
        if self.port.contains(':') {
            self.port.clone()
        } else {
            format!("0.0.0.0:{}", self.port)
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn routes_mut(&mut self) -> &mut RouteTable {
        &mut self.routes
    }

    /// Freeze the route table into a dispatcher.
    pub fn into_dispatcher(self) -> Dispatcher {
        Dispatcher::new(Arc::new(self.routes), self.events, self.engine)
    }

    /// Bind the configured port and serve until shutdown.
    pub async fn listen(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let addr = self.bind_addr();
        let bound = TcpListener::bind(addr.as_str()).await;
        let listener = bound.map_err(|source| ServerError::Bind { addr, source })?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        info!(address = %addr, routes = self.routes.len(), "HTTP endpoint starting");

        let app = self.into_dispatcher().into_router();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled())
            .await?;

        info!(address = %addr, "HTTP endpoint stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlobalVars, RouteSpec};
    use crate::route::{RouteCompiler, RouteDefaults};
    use crate::shutdown::Shutdown;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn endpoint(port: &str) -> Endpoint {
        Endpoint::new(port, EventSender::disabled(), Arc::new(TemplateEngine::new()))
    }

    #[test]
    fn test_bind_addr() {
        assert_eq!(endpoint("8080").bind_addr(), "0.0.0.0:8080");
        assert_eq!(endpoint("127.0.0.1:9000").bind_addr(), "127.0.0.1:9000");
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let err = endpoint("not-a-port")
            .listen(Shutdown::new().subscribe())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let mut ep = endpoint("0");
        let compiler = RouteCompiler::new(RouteDefaults::default(), Arc::new(GlobalVars::new()));
        let spec = RouteSpec {
            body: "pong".to_string(),
            ..RouteSpec::default()
        };
        compiler.register("/ping", &spec, ep.routes_mut());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let server = tokio::spawn(ep.serve(listener, shutdown.subscribe()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("pong"));

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
