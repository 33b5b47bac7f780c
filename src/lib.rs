//! Main crate for the `acme_txt_solver` application.
//!
//! Answers ACME DNS-01 challenges by publishing TXT records through a DNS provider, while keeping
//! every other value under the same name intact. This allows a wildcard certificate and its base
//! domain to be validated concurrently, as both use the same `_acme-challenge` name.
//!
//! For more information, choose one of the modules below.
//! The following modules might be of interest if you want to add new functionality:
//! - [`provider`]s are DNS providers such as Cloudflare that ultimately serve the TXT records
//! - [`registry`] maps provider names from the solver configuration to provider constructors
//! - [`reconcile`] merges challenge values into the existing record set and removes them again
//! - [`dispatcher`] is the entry point for present and clean-up requests

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod plan;
pub mod provider;
pub mod reconcile;
pub mod registry;
pub mod zone;
