//! Multi-tenant agent orchestration platform.
//!
//! The platform hosts user-defined agents (system prompt + model + tool
//! allow-list), stages multi-turn chat sessions against pluggable LLM
//! back-ends, and executes workflows as DAGs of typed nodes.  Workflows
//! fire three ways — manual API call, cron schedule, HMAC-signed webhook —
//! and run asynchronously on a worker pool.  An Agent-to-Agent protocol
//! lets a workflow's agent node dispatch sub-tasks to other agents, local
//! or remote.
//!
//! Module map:
//!
//! - [`config`] / [`error`] / [`models`] / [`repository`] — the spine:
//!   configuration, the platform error type, domain entities, and the
//!   storage seam.
//! - [`tools`] — tool catalog and the per-turn executor.
//! - [`llm`] — the provider adapter seam.
//! - [`chat`] — the bounded tool-use loop, request/response and streaming.
//! - [`workflow`] — DAG validation, scheduling, node dispatch, templates.
//! - [`queue`] / [`scheduler`] — the async trigger plane.
//! - [`a2a`] — task store, agent cards, client, and server.
//! - [`server`] — the HTTP surface tying the trigger plane together.

pub mod a2a;
pub mod chat;
pub mod config;
pub mod credentials;
pub mod error;
pub mod llm;
pub mod models;
pub mod queue;
pub mod rate_limiter;
pub mod repository;
pub mod scheduler;
pub mod server;
pub mod tools;
pub mod workflow;
