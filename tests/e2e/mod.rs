//! End-to-End Tests for Sluice Uploadr
//!
//! Validates the complete receive path:
//!
//! - HTTP routing and status mapping
//! - Multipart streaming to the storage root
//! - Collision-free naming across requests and restarts
//! - Error handling for malformed and failing uploads
//!
//! ## Test Categories
//!
//! - `upload_flow`: Happy path upload tests
//! - `error_scenarios`: Error handling validation

pub mod common;
pub mod error_scenarios;
pub mod upload_flow;
