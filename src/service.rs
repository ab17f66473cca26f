//! Service launch.
//!
//! Binds a service's route table to either its own endpoint or the shared
//! default endpoint.

use crate::config::{ServiceConfig, ServiceType};
use crate::error::ServerError;
use crate::event::EventSender;
use crate::route::RouteCompiler;
use crate::server::Endpoint;
use crate::shutdown::ShutdownSignal;
use crate::template::TemplateEngine;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything shared by all services of a process.
pub struct LaunchContext {
    pub shutdown: ShutdownSignal,
    pub compiler: RouteCompiler,
    pub events: EventSender,
    pub engine: Arc<TemplateEngine>,
}

/// Register a service's routes and start its dedicated endpoint if it has
/// one.
///
/// Returns the listen task of a dedicated endpoint. Services on the default
/// endpoint only register routes; the caller starts that endpoint once
/// every service is registered.
pub fn launch(
    ctx: &LaunchContext,
    default_endpoint: Option<&mut Endpoint>,
    service: &ServiceConfig,
) -> Option<JoinHandle<Result<(), ServerError>>> {
    info!(service = %service.name, "Launch new HTTP service");

    if service.kind != ServiceType::Http {
        warn!(service = %service.name, "Unsupported service type, skipping");
        return None;
    }

    match (&service.port, default_endpoint) {
        (Some(port), _) => {
            debug!(service = %service.name, port = %port, "Port provided, creating a dedicated endpoint");
            let mut endpoint = Endpoint::new(port.clone(), ctx.events.clone(), Arc::clone(&ctx.engine));
            register_routes(ctx, &mut endpoint, service);
            Some(tokio::spawn(endpoint.listen(ctx.shutdown.clone())))
        }
        (None, Some(endpoint)) => {
            debug!(service = %service.name, "No port provided, using the default endpoint");
            register_routes(ctx, endpoint, service);
            None
        }
        (None, None) => {
            info!(service = %service.name, "There is no available endpoint, skipping service");
            None
        }
    }
}

fn register_routes(ctx: &LaunchContext, endpoint: &mut Endpoint, service: &ServiceConfig) {
    info!(service = %service.name, port = %endpoint.port(), "Start routes injection");

    let mut paths: Vec<_> = service.routes.iter().collect();
    paths.sort_by(|a, b| a.0.cmp(b.0));

    let registered: usize = paths
        .into_iter()
        .map(|(path, spec)| ctx.compiler.register(path, spec, endpoint.routes_mut()))
        .sum();

    info!(service = %service.name, routes = registered, "Routes registered");
}
