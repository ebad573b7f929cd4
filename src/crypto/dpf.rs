//! Distributed point function over the 8-bit domain with a single-bit output.
//!
//! This is the tree construction of Boyle, Gilboa and Ishai
//! (<https://eprint.iacr.org/2018/707>) specialised to `u8` inputs and the XOR group `{0, 1}`.
//! The point function `f(x) = β` iff `x = α` (otherwise `0`) is split into two keys such
//! that `eval(0, k₀, x) ^ eval(1, k₁, x) = f(x)` while each key on its own looks random.
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crypto::aes_hash::PRG_HASHES;

/// Bit length of the input domain.
const DEPTH: usize = 8;

type Seed = [u8; 16];

/// `CW`, one correction word per tree level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CorrectionWord {
    s: Seed,
    tl: bool,
    tr: bool,
}

/// One party's key for the point function.
///
/// Only `seed` differs between the two keys of a pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct DpfKey {
    seed: Seed,
    cws: [CorrectionWord; DEPTH],
    cw_out: bool,
}

/// Length-doubling PRG `G(s) = (sₗ, tₗ, sᵣ, tᵣ)` built from two fixed-key MMO hashes.
///
/// The control bit is the least significant bit of the first byte, which is then cleared.
fn expand(seed: &Seed) -> [(Seed, bool); 2] {
    PRG_HASHES.each_ref().map(|hash| {
        let mut s = hash.cr_hash_block(seed);
        let t = s[0] & 1 == 1;
        s[0] &= 0xfe;
        (s, t)
    })
}

/// Maps a leaf seed into the output group.
fn convert(seed: &Seed) -> bool {
    seed[15] & 1 == 1
}

fn xor_if(mut s: Seed, cond: bool, cw: &Seed) -> Seed {
    if cond {
        s.iter_mut().zip(cw).for_each(|(s, c)| *s ^= c);
    }
    s
}

/// Generates the two keys for the point function `f_{α,β}`.
pub(crate) fn generate(alpha: u8, beta: bool, rng: &mut impl Rng) -> [DpfKey; 2] {
    let seeds: [Seed; 2] = [rng.random(), rng.random()];
    let mut s = seeds;
    let mut t = [false, true];
    let mut cws = [CorrectionWord {
        s: [0; 16],
        tl: false,
        tr: false,
    }; DEPTH];
    for (i, cw) in cws.iter_mut().enumerate() {
        // MSB first, the tree is walked from the high bit to the low bit.
        let alpha_i = (alpha >> (DEPTH - 1 - i)) & 1 == 1;
        let [(s0l, t0l), (s0r, t0r)] = expand(&s[0]);
        let [(s1l, t1l), (s1r, t1r)] = expand(&s[1]);
        let (keep, lose) = if alpha_i { (1, 0) } else { (0, 1) };
        let s0 = [s0l, s0r];
        let s1 = [s1l, s1r];
        let mut s_cw = s0[lose];
        s_cw.iter_mut().zip(&s1[lose]).for_each(|(a, b)| *a ^= b);
        let tl = t0l ^ t1l ^ alpha_i ^ true;
        let tr = t0r ^ t1r ^ alpha_i;
        *cw = CorrectionWord { s: s_cw, tl, tr };
        let t_keep = [[t0l, t0r][keep], [t1l, t1r][keep]];
        let t_cw_keep = [tl, tr][keep];
        s = [
            xor_if(s0[keep], t[0], &s_cw),
            xor_if(s1[keep], t[1], &s_cw),
        ];
        t = [t_keep[0] ^ (t[0] & t_cw_keep), t_keep[1] ^ (t[1] & t_cw_keep)];
    }
    let cw_out = beta ^ convert(&s[0]) ^ convert(&s[1]);
    seeds.map(|seed| DpfKey { seed, cws, cw_out })
}

/// Evaluates the key of `party` (`false` is the first party) at `x`, yielding an XOR share of `f(x)`.
pub(crate) fn eval(party: bool, key: &DpfKey, x: u8) -> bool {
    let mut s = key.seed;
    let mut t = party;
    for (i, cw) in key.cws.iter().enumerate() {
        let [(sl, tl), (sr, tr)] = expand(&s);
        let (sl, sr) = (xor_if(sl, t, &cw.s), xor_if(sr, t, &cw.s));
        let (tl, tr) = (tl ^ (t & cw.tl), tr ^ (t & cw.tr));
        if (x >> (DEPTH - 1 - i)) & 1 == 1 {
            (s, t) = (sr, tr);
        } else {
            (s, t) = (sl, tl);
        }
    }
    convert(&s) ^ (t & key.cw_out)
}
