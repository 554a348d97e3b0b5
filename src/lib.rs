//! A multi-threaded engine for secure multi-party computation over replicated, Shamir and
//! MAC-authenticated secret sharing.
//!
//! Every worker thread owns one [party::Session] with its own connections. The
//! [thread::machine::Machine] splits requests over the workers and keeps track of how much
//! preprocessed material has been consumed.
pub mod config;
pub mod input;
pub mod network;
pub mod open;
pub mod party;
pub mod prep;
pub mod processor;
pub mod protocol;
pub mod share;
pub mod thread;
pub mod util;
