//! Container registry support.
//!
//! A from-scratch implementation of the slice of the registry v2
//! protocol the builder needs: scoped bearer-token auth, manifest
//! fetch/put, blob fetch and the chunked blob-upload flow.

pub mod auth;
pub mod client;
pub mod manifest;

pub use auth::{Access, RegistryAction, RegistryUser, TokenIssuer};
pub use client::{Registry, RegistryClient};
pub use manifest::{ImageRef, Layer, Manifest};
