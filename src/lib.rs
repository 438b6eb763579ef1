//! # casc (CAS single-sign-on client)
//!
//! `casc` lets a web application delegate authentication to a CAS server.
//!
//! ## Login round trip
//!
//! - **Redirect out:** anonymous users are sent to `<cas>/login?service=<callback>`.
//! - **Callback:** the CAS server redirects back to `/casc/finish?ticket=ST-...`;
//!   the ticket is validated with a single request against the version-specific
//!   validation endpoint (`/validate`, `/serviceValidate` or `/p3/serviceValidate`).
//! - **Hooks:** the validated identity and attributes run through an ordered,
//!   immutable hook chain that may rewrite them or veto the login.
//! - **Session:** only on success are the identity and the allowlisted attributes
//!   written to the session. Failures never touch the session.
//!
//! ## Proxy tickets
//!
//! With proxy mode on, validation asks the CAS server for a Proxy Granting
//! Ticket delivered through `/casc/pgtcallback`. The PGT is kept in the session
//! and used to mint Proxy Tickets for third-party services.

pub mod api;
pub mod cas;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
