//! Two-party secure exact pattern matching.
//!
//! One party holds a short pattern, the other a longer text. Running the protocol, both learn
//! which windows of the text equal the pattern without revealing their inputs otherwise. String
//! comparison is reduced to the comparison of fixed-size digests of locally computed, randomly
//! masked differences, so that only one secure equality test per window is needed.
//!
//! ## Main Components
//!
//! * [`protocol`]: The [`protocol::exact_match`] function which executes the protocol for a single
//!   party, and [`protocol::simulate_exact_match`] for running both parties in one process.
//! * [`backend`]: The two-party secret-sharing engine the protocol is built on, together with the
//!   [dealer](backend::dealer) providing its correlated randomness.
//! * [`channel`]: Communication abstractions for exchanging data between parties.
//! * [`crypto`]: The keyed digest compression.
//! * [`stats`]: Timing and communication statistics.
//!
//! ## Example
//!
//! ```
//! use exact_pm::protocol::simulate_exact_match;
//!
//! # async fn example() -> Result<(), exact_pm::protocol::Aborted> {
//! let (pattern_holder, text_holder) = simulate_exact_match(b"AB", b"XABY", 1).await?;
//! assert!(pattern_holder.found());
//! assert!(text_holder.matches()[1].matched);
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! The protocol is secure against semi-honest parties, assuming the dealer does not collude with
//! either of them. Both parties learn the match bit of every window, not only whether the pattern
//! occurs somewhere in the text.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod backend;
pub mod channel;
pub mod crypto;
pub mod protocol;
pub mod stats;
