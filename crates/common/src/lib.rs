//! Opaque id minting shared by the fluxlive crates.
//!
//! Error types live with the crates that produce them; the only thing
//! every layer genuinely shares is how connections and instances are
//! named.

pub mod id;
