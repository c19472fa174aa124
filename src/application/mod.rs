//! Application layer - Use cases and application services
//!
//! This layer composes the domain stores and the SIP infrastructure into a
//! runnable registrar.

pub mod registrar_service;

pub use registrar_service::RegistrarService;
