//! multitenant-db library
//!
//! Tenant-aware relational database connectivity: a provider registry,
//! connection strings with per-tenant overrides, a retrying connection factory,
//! a database context with units of work, and a repository layer on top.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod repository;
pub mod service;

pub use config::{AppSettings, Config};
pub use db::{ConnectionFactory, DatabaseContext, ProviderRegistry, UnitOfWork};
pub use error::{DbError, DbResult, ServiceError};
pub use service::IpAddressService;
