//! Opening of the match bits and the per-window outcome.
use serde::{Deserialize, Serialize};

use crate::{
    backend::{Backend, Bit, Opened, Wire},
    channel::Channel,
    protocol::{Error, Phase},
};

/// Whether a single window matched the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowMatch {
    /// Index of the window, i.e. its offset in the text.
    pub window: usize,
    /// True iff the window equals the pattern.
    pub matched: bool,
}

/// Registers the reconstruction of every match bit for both parties.
///
/// The openings are registered together with the equality circuit so that they are evaluated
/// by the same barrier.
pub(crate) fn open_match_bits<C: Channel>(
    backend: &mut Backend<'_, C>,
    match_bits: &[Wire<Bit>],
) -> Vec<Wire<Opened>> {
    match_bits.iter().map(|bit| backend.open(bit)).collect()
}

/// Reads the opened match bits after the barrier.
pub(crate) fn collect_matches<C: Channel>(
    backend: &Backend<'_, C>,
    opened: &[Wire<Opened>],
) -> Result<Vec<WindowMatch>, Error> {
    opened
        .iter()
        .enumerate()
        .map(|(window, wire)| {
            let matched = backend
                .read_share(wire)
                .map_err(Error::backend_at(Phase::Aggregate, Some(window), None))?;
            Ok(WindowMatch { window, matched })
        })
        .collect()
}

/// The pattern was found iff at least one window matched.
pub(crate) fn found(matches: &[WindowMatch]) -> bool {
    matches.iter().any(|m| m.matched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn found_iff_any_window_matched() {
        let m = |window, matched| WindowMatch { window, matched };
        assert!(!found(&[]));
        assert!(!found(&[m(0, false), m(1, false)]));
        assert!(found(&[m(0, false), m(1, true), m(2, false)]));
    }
}
