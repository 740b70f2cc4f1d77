//! A Debug Adapter Protocol server that mediates between a DAP client and
//! Xdebug's DBGp engine: negotiates each inbound engine connection
//! ([`session`]), keeps the breakpoint set and reconciliation machinery
//! shared across them (`dbgp-breakpoint`, `dbgp-reconciler`), and exposes a
//! thin request surface ([`dispatcher`]) a DAP transport can sit on top of.
//! Proxy and Xdebug Cloud registration ([`external`]) are a separate,
//! one-shot concern layered on top rather than part of the connection
//! lifecycle itself.

pub mod configuration;
pub mod dispatcher;
pub mod external;
pub mod protocol;
pub mod session;

pub use configuration::{Configuration, LaunchRequestArguments};
pub use dispatcher::Dispatcher;
pub use session::{ControlOp, EvaluateContext, SessionManager};
