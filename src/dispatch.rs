//! Request dispatch.
//!
//! Looks up the compiled route for each request, emits an inbound-request
//! event, then builds the response from the route's headers, status code
//! and rendered body template.

use crate::event::{EventSender, InboundRequest};
use crate::route::{percent_decode, RouteTable};
use crate::template::{RequestVars, TemplateEngine};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Response produced for one request.
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl DispatchResponse {
    fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            headers: HeaderMap::new(),
            body: String::new(),
        }
    }
}

impl IntoResponse for DispatchResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Serves requests from a frozen route table.
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    events: EventSender,
    engine: Arc<TemplateEngine>,
}

impl Dispatcher {
    pub fn new(routes: Arc<RouteTable>, events: EventSender, engine: Arc<TemplateEngine>) -> Self {
        Self {
            routes,
            events,
            engine,
        }
    }

    /// Handle one request.
    pub async fn dispatch(&self, method: &Method, path: &str, query: Option<&str>) -> DispatchResponse {
        let Some(matched) = self.routes.lookup(method, path) else {
            debug!(method = %method, path, "No route registered");
            return DispatchResponse::not_found();
        };
        let route = matched.route;
        let query = parse_query_string(query.unwrap_or(""));

        info!(
            method = %route.method,
            path = %route.path,
            status = route.status_code.as_u16(),
            "New inbound request"
        );

        // Emitted before rendering so the request is counted even if the
        // body fails to render
        self.events
            .emit(InboundRequest {
                method: method.to_string(),
                path: path.to_string(),
                route: route.path.clone(),
                status_code: route.status_code.as_u16(),
                timestamp: Utc::now(),
                params: matched.params.clone(),
                query: query.clone(),
            })
            .await;

        let mut headers = HeaderMap::with_capacity(route.headers.len());
        for (name, value) in &route.headers {
            debug!(key = %name, value = ?value, "Inject response header");
            headers.append(name.clone(), value.clone());
        }

        let request_vars = RequestVars {
            query: Some(&query),
            path: Some(&matched.params),
        };
        let body = self.engine.execute(&route.body, &route.globals, &request_vars);

        DispatchResponse {
            status: route.status_code,
            headers,
            body,
        }
    }

    /// Wrap the dispatcher in an axum router that sends every request to it.
    pub fn into_router(self) -> Router {
        Router::new().fallback(handle).with_state(self)
    }
}

async fn handle(State(dispatcher): State<Dispatcher>, method: Method, uri: Uri) -> Response {
    dispatcher
        .dispatch(&method, uri.path(), uri.query())
        .await
        .into_response()
}

/// Parse a query string into key-value pairs.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        params.insert(url_decode(key), url_decode(value));
    }

    params
}

/// Percent-decode a query component, treating `+` as a space.
fn url_decode(s: &str) -> String {
    percent_decode(&s.replace('+', " "))
}
