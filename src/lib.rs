//! golem - configurable HTTP stub server
//!
//! Serves canned or templated responses from a declarative route table and
//! optionally streams every served request to a stats sink.
//!
//! # Features
//!
//! - **Declarative routes**: path to response, with per-method variants
//! - **Body templates**: Handlebars bodies rendered with global variables,
//!   query parameters and path parameters
//! - **Multiple endpoints**: services share a default port or get their own
//! - **Stats collection**: inbound-request events written to a pluggable sink
//!   through a bounded channel, off the response path
//!
//! # Example Configuration
//!
//! ```yaml
//! port: "8080"
//! vars:
//!   greeting: Hello
//! services:
//!   - name: users
//!     routes:
//!       /users/:id:
//!         body: '{"id": "{{id}}", "greeting": "{{greeting}}"}'
//!         headers:
//!           Content-Type: application/json
//!       /users:
//!         methods:
//!           GET: { body: "[]" }
//!           POST: { code: 201 }
//! ```
//!
//! A route whose `body_file` cannot be read still registers and serves an
//! empty body with its configured status and headers, unless
//! `settings.degrade_on_template_error` is off.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod route;
pub mod run;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod stats;
pub mod template;

pub use config::Config;
pub use run::{run, RunOptions};
pub use shutdown::Shutdown;
