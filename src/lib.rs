//! Territory engine library
//!
//! Geometry and session engine for claiming territory by walking a closed
//! loop. Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod geo;
pub mod infra;
pub mod io;
pub mod services;
