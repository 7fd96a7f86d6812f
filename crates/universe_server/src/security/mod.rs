//! Admission checks for incoming connections.
//!
//! A client proves who it is with the token carried in its handshake. The
//! token is verified by a [`TokenVerifier`] and its subject is then matched
//! against the user id the client claims with [`authorize`].

pub mod token;

pub use token::{authorize, Claims, Hs256Verifier, TokenVerifier};
