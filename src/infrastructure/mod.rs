//! Reference adapters behind the domain ports.
//!
//! `in_memory` holds the transactional doubles the gateway runs against in
//! tests and the demo CLI; `sandbox` holds scriptable stand-ins for the
//! external collaborators (providers, IP reputation, 2FA, rates). A
//! production deployment replaces these with real adapters without touching
//! the application layer.

pub mod in_memory;
pub mod sandbox;
