//! # Settlement server
//! This crate hosts the settlement engine in a long-running process. It is responsible for:
//! * Loading the configuration from the environment. See [config](config/index.html) for the variables.
//! * Opening the ledger database and, unless told otherwise, applying the schema migrations.
//! * Running one bulk fulfilment consumer per inbound partition ([`bulk_fulfil_worker`]).
//! * Running the cron-scheduled timeout sweep ([`timeout_worker`]).
//!
//! Both services share the same in-process message bus, which also carries their outbound events.
pub mod bulk_fulfil_worker;
pub mod cli;
pub mod config;
pub mod errors;
pub mod server;
pub mod timeout_worker;
