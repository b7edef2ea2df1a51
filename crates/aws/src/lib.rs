//! AWS integration for ocideploy
//!
//! This crate exchanges AWS credentials for Amazon ECR registry
//! credentials via the [`ecr`] module.

pub mod ecr;

pub use ecr::EcrTokenExchange;
