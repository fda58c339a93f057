//! # Fotujo (Photo Album API)
//!
//! `fotujo` is a small photo-album HTTP service. Its core is the request
//! admission and session trust layer:
//!
//! - **Rate limiting:** one token bucket per client address, swept when idle,
//!   so memory stays bounded to the set of active clients.
//! - **Authentication:** opaque bearer tokens. The raw token is handed to the
//!   client exactly once; the database only ever stores a SHA-256 hash.
//! - **Authorization:** capability codes (e.g. `photo:read`) checked by set
//!   membership, never by role.
//! - **Graceful shutdown:** on SIGINT/SIGTERM the listener drains with a
//!   bounded ceiling and tracked background work (outbound mail) is awaited
//!   before the process reports its outcome.
//!
//! Tokens come in two scopes, `activation` and `authentication`; a token is
//! never valid across scopes. Absent and expired tokens are indistinguishable
//! to callers so the API cannot be used as an existence or expiry oracle.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
