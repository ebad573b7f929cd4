//! The two roles of the protocol: sharing the characters and computing the masked differences.
//!
//! Both parties register their character inputs in the same order, first every pattern position,
//! then every (window, position) pair of the text. A text byte that appears in several windows is
//! shared once per window, so every window gets independent randomness.
use crate::{
    backend::{Backend, Byte, Wire},
    channel::Channel,
    protocol::{Error, Phase, window::Windows},
};

/// Shares of all characters held by one party after the first barrier.
#[derive(Debug)]
pub(crate) struct CharacterShares {
    /// One share per pattern position.
    pub(crate) pattern: Vec<Wire<Byte>>,
    /// One share per window and position.
    pub(crate) text: Vec<Vec<Wire<Byte>>>,
}

/// The role-specific part of the protocol.
pub(crate) trait Holder {
    /// Name of the role, used in logs.
    const ROLE: &'static str;

    /// Registers the inputs of all pattern and text characters.
    fn share_characters<C: Channel>(
        &self,
        backend: &mut Backend<'_, C>,
        windows: &Windows,
    ) -> Result<CharacterShares, Error>;

    /// The masked difference of a single position from the local shares of both characters.
    ///
    /// The results of both roles agree iff the text and the pattern character are equal.
    fn compute_masked_diff(&self, text_share: u8, pattern_share: u8) -> u8;

    /// The masked-difference vector of every window.
    fn masked_diffs<C: Channel>(
        &self,
        backend: &Backend<'_, C>,
        shares: &CharacterShares,
    ) -> Result<Vec<Vec<u8>>, Error> {
        let phase = Phase::ComputeDigests;
        let pattern = shares
            .pattern
            .iter()
            .enumerate()
            .map(|(p, wire)| {
                backend
                    .read_share(wire)
                    .map_err(Error::backend_at(phase, None, Some(p)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut diffs = Vec::with_capacity(shares.text.len());
        for (w, window) in shares.text.iter().enumerate() {
            let mut diff = Vec::with_capacity(window.len());
            for (p, (wire, &pattern_share)) in window.iter().zip(&pattern).enumerate() {
                let text_share = backend
                    .read_share(wire)
                    .map_err(Error::backend_at(phase, Some(w), Some(p)))?;
                diff.push(self.compute_masked_diff(text_share, pattern_share));
            }
            diffs.push(diff);
        }
        Ok(diffs)
    }
}

/// The party that knows the pattern.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PatternHolder<'a> {
    pub(crate) pattern: &'a [u8],
}

/// The party that knows the text.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TextHolder<'a> {
    pub(crate) text: &'a [u8],
}

impl Holder for PatternHolder<'_> {
    const ROLE: &'static str = "pattern holder";

    fn share_characters<C: Channel>(
        &self,
        backend: &mut Backend<'_, C>,
        windows: &Windows,
    ) -> Result<CharacterShares, Error> {
        let phase = Phase::ShareCharacters;
        let peer = backend.party().peer();
        let pattern = self
            .pattern
            .iter()
            .map(|&c| backend.provide_own_byte(c))
            .collect();
        let mut text = Vec::with_capacity(windows.count());
        for w in windows.iter() {
            let mut window = Vec::with_capacity(windows.pattern_size());
            for p in 0..windows.pattern_size() {
                let wire = backend
                    .receive_other_byte(peer)
                    .map_err(Error::backend_at(phase, Some(w), Some(p)))?;
                window.push(wire);
            }
            text.push(window);
        }
        Ok(CharacterShares { pattern, text })
    }

    fn compute_masked_diff(&self, text_share: u8, pattern_share: u8) -> u8 {
        text_share.wrapping_sub(pattern_share).wrapping_neg()
    }
}

impl Holder for TextHolder<'_> {
    const ROLE: &'static str = "text holder";

    fn share_characters<C: Channel>(
        &self,
        backend: &mut Backend<'_, C>,
        windows: &Windows,
    ) -> Result<CharacterShares, Error> {
        let phase = Phase::ShareCharacters;
        let peer = backend.party().peer();
        let mut pattern = Vec::with_capacity(windows.pattern_size());
        for p in 0..windows.pattern_size() {
            let wire = backend
                .receive_other_byte(peer)
                .map_err(Error::backend_at(phase, None, Some(p)))?;
            pattern.push(wire);
        }
        let text = windows
            .iter()
            .map(|w| {
                self.text[windows.offsets(w)]
                    .iter()
                    .map(|&c| backend.provide_own_byte(c))
                    .collect::<Vec<_>>()
            })
            .collect();
        Ok(CharacterShares { pattern, text })
    }

    fn compute_masked_diff(&self, text_share: u8, pattern_share: u8) -> u8 {
        text_share.wrapping_sub(pattern_share)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    /// Both roles' masked differences of one position, for plaintexts `t` and `p`.
    fn masked_pair(t: u8, p: u8, r_t: u8, r_p: u8) -> (u8, u8) {
        // The text holder owns `t` and keeps `r_t`, the pattern holder owns `p` and keeps `r_p`.
        let pattern_holder = PatternHolder { pattern: &[] };
        let text_holder = TextHolder { text: &[] };
        (
            pattern_holder.compute_masked_diff(t.wrapping_sub(r_t), r_p),
            text_holder.compute_masked_diff(r_t, p.wrapping_sub(r_p)),
        )
    }

    proptest! {
        #[test]
        fn masked_diffs_agree_on_equal_characters(c: u8, r_t: u8, r_p: u8) {
            let (a, b) = masked_pair(c, c, r_t, r_p);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn masked_diffs_differ_by_the_character_difference(t: u8, p: u8, r_t: u8, r_p: u8) {
            let (a, b) = masked_pair(t, p, r_t, r_p);
            prop_assert_eq!(a.wrapping_sub(b), p.wrapping_sub(t));
            prop_assert_eq!(a == b, t == p);
        }
    }
}
