//! Two-party exact pattern matching.
//!
//! One party holds a pattern, the other a longer text. Both learn for every window of the text
//! whether it equals the pattern, and nothing else about the other party's input. Each
//! repetition runs through the [`Phase`]s in order:
//!
//! 1. Every pattern character and every character of every text window is additively shared.
//! 2. Each party locally combines its shares into a masked difference per window and position.
//!    The two parties' vectors are identical exactly for windows equal to the pattern.
//! 3. The vectors are folded and compressed into 32-byte digests, which are shared again.
//! 4. An equality circuit over the shared digests yields one match bit per window, which is
//!    opened to both parties.
//!
//! Correlated randomness for the equality circuit is provided by a [dealer](crate::backend::dealer)
//! that never sees any input.
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{Level, debug, instrument, warn};

use crate::{
    backend::{self, Backend, DEALER, PeerId, dealer, finish},
    channel::{Channel, SimpleChannel},
    crypto::{AesCompressor, DEFAULT_DIGEST_KEY, DIGEST_LEN},
    stats::{AccumulatedStats, RepetitionStats},
};

mod aggregate;
mod digest;
mod equality;
mod role;
mod window;

pub use aggregate::WindowMatch;
pub use digest::fold_block;
pub use window::Windows;

use role::{Holder, PatternHolder, TextHolder};

/// Why the inputs were rejected before any communication took place.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidInput {
    /// The pattern or the text is empty.
    #[error("pattern ({pattern_size} bytes) and text ({text_size} bytes) must not be empty")]
    Empty {
        /// Length of the pattern.
        pattern_size: usize,
        /// Length of the text.
        text_size: usize,
    },
    /// The pattern is not shorter than the text.
    #[error("the pattern ({pattern_size} bytes) must be shorter than the text ({text_size} bytes)")]
    PatternNotShorter {
        /// Length of the pattern.
        pattern_size: usize,
        /// Length of the text.
        text_size: usize,
    },
    /// Zero repetitions were requested.
    #[error("at least one repetition is required")]
    NoRepetitions,
}

/// Errors that abort a repetition.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The inputs violate the size constraints.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInput),
    /// The backend failed, typically because of a communication failure.
    #[error("backend failure in phase {phase}{}: {source}", location(.window, .byte))]
    Backend {
        /// The phase in which the failure occurred.
        phase: Phase,
        /// The window being processed, if any.
        window: Option<usize>,
        /// The position or digest byte being processed, if any.
        byte: Option<usize>,
        /// The underlying backend error.
        source: backend::Error,
    },
    /// A window has a digest without bytes, so no match bit can be derived for it.
    #[error("the digest of window {window} is empty")]
    EmptyDigest {
        /// The window without digest bytes.
        window: usize,
    },
}

fn location(window: &Option<usize>, byte: &Option<usize>) -> String {
    match (window, byte) {
        (Some(w), Some(b)) => format!(" (window {w}, byte {b})"),
        (Some(w), None) => format!(" (window {w})"),
        (None, Some(b)) => format!(" (byte {b})"),
        (None, None) => String::new(),
    }
}

impl Error {
    /// Wraps a backend error raised in `phase`.
    pub(crate) fn backend(phase: Phase) -> impl FnOnce(backend::Error) -> Self {
        Self::backend_at(phase, None, None)
    }

    /// Wraps a backend error raised in `phase` while processing the given window and byte.
    pub(crate) fn backend_at(
        phase: Phase,
        window: Option<usize>,
        byte: Option<usize>,
    ) -> impl FnOnce(backend::Error) -> Self {
        move |source| Self::Backend {
            phase,
            window,
            byte,
            source,
        }
    }
}

/// The protocol failed, after completing some repetitions.
#[derive(Debug, thiserror::Error)]
#[error("aborted after {} completed repetition(s): {error}", .completed.len())]
pub struct Aborted {
    /// Results of the repetitions that completed before the failure.
    pub completed: Vec<RepetitionResult>,
    /// The failure.
    #[source]
    pub error: Error,
}

impl Aborted {
    fn early(error: impl Into<Error>) -> Self {
        Self {
            completed: vec![],
            error: error.into(),
        }
    }
}

/// The steps of a single repetition, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Nothing has happened yet.
    Init,
    /// Registering the sharing of all characters.
    ShareCharacters,
    /// The first barrier, evaluating the character sharing.
    Run1,
    /// Computing masked differences and digests locally.
    ComputeDigests,
    /// Registering the sharing of the digests.
    ShareDigests,
    /// Registering the equality circuit and the openings of its outputs.
    BuildEqualityCircuit,
    /// The second barrier, evaluating the equality circuit.
    Run2,
    /// Reading the opened match bits.
    Aggregate,
    /// The repetition is complete.
    Done,
}

impl Phase {
    /// The phase that follows this one.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Init => Some(Phase::ShareCharacters),
            Phase::ShareCharacters => Some(Phase::Run1),
            Phase::Run1 => Some(Phase::ComputeDigests),
            Phase::ComputeDigests => Some(Phase::ShareDigests),
            Phase::ShareDigests => Some(Phase::BuildEqualityCircuit),
            Phase::BuildEqualityCircuit => Some(Phase::Run2),
            Phase::Run2 => Some(Phase::Aggregate),
            Phase::Aggregate => Some(Phase::Done),
            Phase::Done => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "INIT",
            Phase::ShareCharacters => "SHARE_CHARACTERS",
            Phase::Run1 => "RUN_1",
            Phase::ComputeDigests => "COMPUTE_DIGESTS",
            Phase::ShareDigests => "SHARE_DIGESTS",
            Phase::BuildEqualityCircuit => "BUILD_EQUALITY_CIRCUIT",
            Phase::Run2 => "RUN_2",
            Phase::Aggregate => "AGGREGATE",
            Phase::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// The private input of a party, which also determines its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartyInput {
    /// The party holds the pattern.
    Pattern(Vec<u8>),
    /// The party holds the text.
    Text(Vec<u8>),
}

impl PartyInput {
    /// The windows, given the size of the other party's input.
    pub fn windows(&self, expected_peer_size: usize) -> Result<Windows, InvalidInput> {
        match self {
            PartyInput::Pattern(pattern) => Windows::new(pattern.len(), expected_peer_size),
            PartyInput::Text(text) => Windows::new(expected_peer_size, text.len()),
        }
    }

    fn role(&self) -> &'static str {
        match self {
            PartyInput::Pattern(_) => PatternHolder::ROLE,
            PartyInput::Text(_) => TextHolder::ROLE,
        }
    }
}

/// Parameters of a run, which must be consistent between both parties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// The local party.
    pub party: PeerId,
    /// Length of the other party's input.
    pub expected_peer_size: usize,
    /// Number of independent repetitions of the protocol.
    pub num_repetitions: usize,
    /// Channel index of the dealer.
    pub dealer: usize,
    /// Key of the digest compression, must be the same for both parties.
    pub digest_key: [u8; 16],
    /// Only build the circuits of every repetition, without executing them.
    ///
    /// Nothing is sent to the peer or the dealer. The statistics of each repetition list the
    /// number of gates per barrier, the match results stay empty.
    #[serde(default)]
    pub no_run: bool,
}

impl Config {
    /// A single repetition using the default dealer index and digest key.
    pub fn new(party: PeerId, expected_peer_size: usize) -> Self {
        Self {
            party,
            expected_peer_size,
            num_repetitions: 1,
            dealer: DEALER,
            digest_key: DEFAULT_DIGEST_KEY,
            no_run: false,
        }
    }

    /// Sets the number of repetitions.
    pub fn with_repetitions(mut self, num_repetitions: usize) -> Self {
        self.num_repetitions = num_repetitions;
        self
    }

    /// Builds the circuits without executing them, see [`Config::no_run`].
    pub fn with_no_run(mut self, no_run: bool) -> Self {
        self.no_run = no_run;
        self
    }
}

/// The outcome of a single repetition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepetitionResult {
    /// One entry per window, in window order. Empty if the circuits were not executed.
    pub matches: Vec<WindowMatch>,
    /// Whether any window matched.
    pub found: bool,
    /// Backend statistics of the repetition.
    pub stats: RepetitionStats,
}

/// The outcome of all repetitions of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchReport {
    /// One entry per repetition.
    pub repetitions: Vec<RepetitionResult>,
    /// Statistics accumulated over all repetitions.
    pub stats: AccumulatedStats,
}

impl MatchReport {
    /// Whether the pattern was found (in the last repetition).
    pub fn found(&self) -> bool {
        self.repetitions.last().is_some_and(|r| r.found)
    }

    /// The per-window results of the last repetition.
    pub fn matches(&self) -> &[WindowMatch] {
        self.repetitions
            .last()
            .map(|r| r.matches.as_slice())
            .unwrap_or_default()
    }
}

impl FromIterator<RepetitionResult> for MatchReport {
    fn from_iter<I: IntoIterator<Item = RepetitionResult>>(iter: I) -> Self {
        let mut report = MatchReport::default();
        for result in iter {
            report.stats.add(&result.stats);
            report.repetitions.push(result);
        }
        report
    }
}

/// Checks the configuration and input, returning the windows to compare.
fn validate(config: &Config, input: &PartyInput) -> Result<Windows, InvalidInput> {
    if config.num_repetitions == 0 {
        return Err(InvalidInput::NoRepetitions);
    }
    input.windows(config.expected_peer_size)
}

/// Runs the exact matching protocol for one party.
///
/// The peer must be reachable at the channel index of `config.party.peer()` and call this
/// function with the complementary input, the dealer at `config.dealer`. Invalid inputs are
/// rejected before anything is sent. When the dealer was contacted, it is told that the party is
/// done, also if a repetition failed. With [`Config::no_run`], nothing is sent at all.
#[instrument(level = Level::DEBUG, skip_all, fields(party = %config.party, role = input.role()), err)]
pub async fn exact_match(
    channel: &impl Channel,
    config: &Config,
    input: &PartyInput,
) -> Result<MatchReport, Aborted> {
    let windows = validate(config, input).map_err(Aborted::early)?;
    let compressor = AesCompressor::new(config.digest_key);
    let result = match input {
        PartyInput::Pattern(pattern) => {
            let holder = PatternHolder { pattern };
            repeat(channel, config, &holder, &windows, &compressor).await
        }
        PartyInput::Text(text) => {
            let holder = TextHolder { text };
            repeat(channel, config, &holder, &windows, &compressor).await
        }
    };
    if config.no_run {
        return result;
    }
    let finished = finish(channel, config.dealer)
        .await
        .map_err(Error::backend(Phase::Done));
    match (result, finished) {
        (Ok(report), Ok(())) => Ok(report),
        (Ok(report), Err(error)) => Err(Aborted {
            completed: report.repetitions,
            error,
        }),
        (Err(aborted), _) => Err(aborted),
    }
}

async fn repeat<H: Holder>(
    channel: &impl Channel,
    config: &Config,
    holder: &H,
    windows: &Windows,
    compressor: &AesCompressor,
) -> Result<MatchReport, Aborted> {
    let mut report = MatchReport::default();
    for repetition in 0..config.num_repetitions {
        let run = Repetition {
            backend: Backend::new(channel, config.party, config.dealer),
            holder,
            windows,
            compressor,
            no_run: config.no_run,
            phase: Phase::Init,
        };
        match run.execute().await {
            Ok(result) => {
                debug!(repetition, found = result.found, "repetition done");
                report.stats.add(&result.stats);
                report.repetitions.push(result);
            }
            Err(error) => {
                warn!(repetition, %error, "repetition failed");
                return Err(Aborted {
                    completed: report.repetitions,
                    error,
                });
            }
        }
    }
    Ok(report)
}

/// The state of a single repetition.
struct Repetition<'a, 'ch, C: Channel, H: Holder> {
    backend: Backend<'ch, C>,
    holder: &'a H,
    windows: &'a Windows,
    compressor: &'a AesCompressor,
    no_run: bool,
    phase: Phase,
}

impl<C: Channel, H: Holder> Repetition<'_, '_, C, H> {
    fn advance(&mut self) {
        if let Some(next) = self.phase.next() {
            debug!(party = %self.backend.party(), role = H::ROLE, from = %self.phase, to = %next, "phase");
            self.phase = next;
        }
    }

    /// Ends the barrier of the current phase, or only records its gates if nothing is executed.
    async fn barrier(&mut self, label: &str) -> Result<(), Error> {
        if self.no_run {
            self.backend.skip_as(label);
            return Ok(());
        }
        self.backend
            .execute_as(label)
            .await
            .map_err(Error::backend(self.phase))
    }

    async fn execute(mut self) -> Result<RepetitionResult, Error> {
        self.advance();
        let characters = self
            .holder
            .share_characters(&mut self.backend, self.windows)?;

        self.advance();
        self.barrier("run 1").await?;

        self.advance();
        let digests = if self.no_run {
            // The circuits do not depend on the digest values.
            vec![[0; DIGEST_LEN]; self.windows.count()]
        } else {
            let masked_diffs = self.holder.masked_diffs(&self.backend, &characters)?;
            digest::compute_digests(self.compressor, &masked_diffs)
        };

        self.advance();
        let shared = digest::share_digests(&mut self.backend, &digests)?;

        self.advance();
        let match_bits = equality::build_equality_circuit(&mut self.backend, &shared)?;
        let opened = aggregate::open_match_bits(&mut self.backend, &match_bits);

        self.advance();
        self.barrier("run 2").await?;

        self.advance();
        let matches = if self.no_run {
            vec![]
        } else {
            aggregate::collect_matches(&self.backend, &opened)?
        };
        let found = aggregate::found(&matches);

        self.advance();
        Ok(RepetitionResult {
            matches,
            found,
            stats: self.backend.into_stats(),
        })
    }
}

/// Runs both parties and the dealer in-process, returning the reports of the pattern holder and
/// of the text holder.
pub async fn simulate_exact_match(
    pattern: &[u8],
    text: &[u8],
    num_repetitions: usize,
) -> Result<(MatchReport, MatchReport), Aborted> {
    let pattern_input = PartyInput::Pattern(pattern.to_vec());
    let text_input = PartyInput::Text(text.to_vec());
    let pattern_config = Config::new(PeerId::First, text.len()).with_repetitions(num_repetitions);
    let text_config = Config::new(PeerId::Second, pattern.len()).with_repetitions(num_repetitions);
    validate(&pattern_config, &pattern_input).map_err(Aborted::early)?;

    let [pattern_channel, text_channel, dealer_channel]: [SimpleChannel; 3] =
        SimpleChannel::channels(3)
            .try_into()
            .expect("parties is 3");
    let (dealt, pattern_report, text_report) = tokio::join!(
        dealer::dealer(&dealer_channel),
        exact_match(&pattern_channel, &pattern_config, &pattern_input),
        exact_match(&text_channel, &text_config, &text_input),
    );
    if let Err(e) = dealt {
        warn!("dealer failed: {e}");
    }
    Ok((pattern_report?, text_report?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_advance_in_order() {
        let mut phase = Phase::Init;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            seen.push(next);
            phase = next;
        }
        assert_eq!(seen.len(), 9);
        assert_eq!(seen[2], Phase::Run1);
        assert_eq!(seen[6], Phase::Run2);
        assert_eq!(phase, Phase::Done);
        assert_eq!(Phase::BuildEqualityCircuit.to_string(), "BUILD_EQUALITY_CIRCUIT");
    }

    #[test]
    fn zero_repetitions_are_invalid() {
        let config = Config::new(PeerId::First, 4).with_repetitions(0);
        let input = PartyInput::Pattern(b"AB".to_vec());
        assert_eq!(validate(&config, &input), Err(InvalidInput::NoRepetitions));
    }

    #[test]
    fn error_names_phase_and_location() {
        let e = Error::backend_at(Phase::ShareDigests, Some(3), Some(17))(
            backend::Error::Unresolvable(1),
        );
        let msg = e.to_string();
        assert!(msg.contains("SHARE_DIGESTS"), "{msg}");
        assert!(msg.contains("window 3, byte 17"), "{msg}");
    }

    #[tokio::test]
    async fn no_run_builds_circuits_without_communication() -> Result<(), Aborted> {
        // A lone channel: any message to the peer or the dealer would fail.
        let [channel]: [SimpleChannel; 1] = SimpleChannel::channels(1)
            .try_into()
            .expect("parties is 1");
        let config = Config::new(PeerId::First, 4)
            .with_repetitions(2)
            .with_no_run(true);
        let report = exact_match(&channel, &config, &PartyInput::Pattern(b"AB".to_vec())).await?;
        assert_eq!(report.repetitions.len(), 2);
        for r in &report.repetitions {
            assert!(r.matches.is_empty());
            assert!(!r.found);
            let gates: Vec<(&str, usize)> = r
                .stats
                .barriers
                .iter()
                .map(|b| (b.label.as_str(), b.gates))
                .collect();
            // 2 pattern and 3 * 2 text characters; per window 32 * 2 digest inputs,
            // 32 * 4 NEG/ADD/HAM/DPF gates, 31 ANDs and one opening.
            assert_eq!(gates, vec![("run 1", 8), ("run 2", 3 * (64 + 128 + 31 + 1))]);
            assert_eq!(r.stats.bytes_sent(), 0);
        }
        assert_eq!(report.stats.bytes_sent(), 0);
        Ok(())
    }

    #[test]
    fn reports_collect_repetitions() {
        let result = |found| RepetitionResult {
            matches: vec![WindowMatch {
                window: 0,
                matched: found,
            }],
            found,
            stats: RepetitionStats::default(),
        };
        let report: MatchReport = [result(false), result(true)].into_iter().collect();
        assert_eq!(report.repetitions.len(), 2);
        assert_eq!(report.stats.repetitions, 2);
        assert!(report.found());
    }

    #[tokio::test]
    async fn pattern_is_found_in_the_middle() -> Result<(), Aborted> {
        let (pattern_report, text_report) = simulate_exact_match(b"AB", b"XABY", 1).await?;
        for report in [&pattern_report, &text_report] {
            let matched: Vec<bool> = report.matches().iter().map(|m| m.matched).collect();
            assert_eq!(matched, vec![false, true, false]);
            assert!(report.found());
        }
        Ok(())
    }
}
