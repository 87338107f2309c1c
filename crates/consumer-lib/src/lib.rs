//! Core library for the cluster metrics consumer
//!
//! This crate provides the consumer's building blocks:
//! - Identity mirroring of orchestrator objects into a relational store
//! - HTTP ingestion of raw collector batches with UID resolution
//! - A bounded in-memory window of recent samples
//! - Timer-driven persistence into a columnar analytical store
//! - Dashboard query endpoints over identity and live samples
//! - Health checks and observability

pub mod api;
pub mod buffer;
pub mod flush;
pub mod health;
pub mod ingest;
pub mod models;
pub mod observability;
pub mod store;
pub mod syncer;

pub use buffer::RingWindow;
pub use health::{HealthMonitor, HealthSnapshot, PipelineStatus};
pub use ingest::IdResolver;
pub use models::{ResolveKind, Sample};
pub use observability::ConsumerMetrics;
pub use store::{EntityKind, IdentityStore, MetricsStore};
pub use syncer::ResourceSyncer;
