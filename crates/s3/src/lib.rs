//! xfer-s3: S3 backend for xfer
//!
//! This crate is the only one that depends on the AWS SDK. It provides
//! [`S3Client`], an implementation of `xfer_core::BackendClient` bound to a
//! single bucket.

pub mod client;

pub use client::S3Client;
