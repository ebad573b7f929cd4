//! Runs one party (or the dealer) of the secure exact pattern matching protocol over TCP.
use std::{net::SocketAddr, path::PathBuf, process::ExitCode, str::FromStr};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use exact_pm::{
    backend::{DEALER, PeerId, dealer::dealer},
    channel::SimpleChannel,
    protocol::{self, Aborted, Config, MatchReport, PartyInput, Windows, exact_match},
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

use crate::tcp_channel::TcpChannel;

mod tcp_channel;

/// Two-party secure exact pattern matching.
///
/// One party provides a pattern, the other a text. Both learn which windows of the text equal
/// the pattern. A third process acts as the dealer of correlated randomness.
///
/// Logging can be controlled with an EnvFilter via the `EXACT_PM_LOG` environment variable.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Runs one of the two parties.
    Party(PartyArgs),
    /// Runs the dealer, serving both parties until they are done.
    Dealer {
        /// The socket address to listen on.
        #[arg(long, default_value = "127.0.0.1:8200")]
        listen: SocketAddr,
    },
}

#[derive(Debug, Args)]
struct PartyArgs {
    /// A JSON file with any of the options below, options on the command line take precedence.
    #[arg(long)]
    config_file: Option<PathBuf>,
    /// Id of this party, 0 or 1.
    #[arg(long)]
    my_id: Option<usize>,
    /// A party as `id,host,port`, given once for each of the two parties.
    #[arg(long = "party", num_args = 1)]
    parties: Vec<PartyAddr>,
    /// Address of the dealer as `host:port` [default: 127.0.0.1:8200]
    #[arg(long)]
    dealer: Option<String>,
    /// The pattern, makes this party the pattern holder.
    #[arg(long, conflicts_with_all = ["text", "pattern_size"])]
    pattern: Option<String>,
    /// Length of the other party's text.
    #[arg(long)]
    text_size: Option<usize>,
    /// The text, makes this party the text holder.
    #[arg(long)]
    text: Option<String>,
    /// Length of the other party's pattern.
    #[arg(long)]
    pattern_size: Option<usize>,
    /// Number of repetitions of the protocol [default: 1]
    #[arg(long)]
    repetitions: Option<usize>,
    /// Prints the report as JSON.
    #[arg(long)]
    json: bool,
    /// Only builds the circuits and reports their size, without connecting to anyone.
    #[arg(long)]
    no_run: bool,
}

/// The contents of a `--config-file`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PartyFile {
    my_id: Option<usize>,
    parties: Vec<PartyAddr>,
    dealer: Option<String>,
    pattern: Option<String>,
    text_size: Option<usize>,
    text: Option<String>,
    pattern_size: Option<usize>,
    repetitions: Option<usize>,
    json: bool,
    no_run: bool,
}

impl PartyArgs {
    /// Fills every option missing on the command line from the config file, if any.
    async fn merge_config_file(mut self) -> anyhow::Result<Self> {
        let Some(path) = &self.config_file else {
            return Ok(self);
        };
        let file = fs::read_to_string(path)
            .await
            .with_context(|| format!("could not read '{}'", path.display()))?;
        let file: PartyFile = serde_json::from_str(&file)
            .with_context(|| format!("'{}' has an invalid format", path.display()))?;
        self.my_id = self.my_id.or(file.my_id);
        if self.parties.is_empty() {
            self.parties = file.parties;
        }
        self.dealer = self.dealer.or(file.dealer);
        if self.pattern.is_none() && self.text.is_none() {
            self.pattern = file.pattern;
            self.text = file.text;
        }
        self.text_size = self.text_size.or(file.text_size);
        self.pattern_size = self.pattern_size.or(file.pattern_size);
        self.repetitions = self.repetitions.or(file.repetitions);
        self.json |= file.json;
        self.no_run |= file.no_run;
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PartyAddr {
    id: usize,
    host: String,
    port: u16,
}

impl PartyAddr {
    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for PartyAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [id, host, port] = s.split(',').collect::<Vec<_>>()[..] else {
            return Err(format!("expected `id,host,port`, got `{s}`"));
        };
        Ok(Self {
            id: id.trim().parse().map_err(|e| format!("invalid id `{id}`: {e}"))?,
            host: host.trim().to_string(),
            port: port
                .trim()
                .parse()
                .map_err(|e| format!("invalid port `{port}`: {e}"))?,
        })
    }
}

/// The report printed with `--json`.
#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    name: &'static str,
    party_id: usize,
    role: &'static str,
    no_run: bool,
    #[serde(flatten)]
    report: &'a MatchReport,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("tracing initialization failed: {e:#}");
        return ExitCode::FAILURE;
    }
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Party(args) => run_party(args).await,
        Command::Dealer { listen } => run_dealer(listen).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_env_var("EXACT_PM_LOG")
        .with_default_directive("exact_pm=info".parse()?)
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

async fn run_party(args: PartyArgs) -> anyhow::Result<()> {
    let args = args.merge_config_file().await?;
    let me = PeerId::try_from(args.my_id.context("--my-id is required")?)?;
    let (input, expected_peer_size) = match (args.pattern, args.text_size, args.text, args.pattern_size)
    {
        (Some(pattern), Some(text_size), None, None) => {
            (PartyInput::Pattern(pattern.into_bytes()), text_size)
        }
        (None, None, Some(text), Some(pattern_size)) => {
            (PartyInput::Text(text.into_bytes()), pattern_size)
        }
        _ => bail!("either --pattern with --text-size or --text with --pattern-size is required"),
    };
    let role = match input {
        PartyInput::Pattern(_) => "pattern holder",
        PartyInput::Text(_) => "text holder",
    };
    let windows = input
        .windows(expected_peer_size)
        .context("the pattern must be shorter than the text")?;
    let config = Config::new(me, expected_peer_size)
        .with_repetitions(args.repetitions.unwrap_or(1))
        .with_no_run(args.no_run);

    let result = if args.no_run {
        // Nothing is sent when the circuits are not executed.
        let channels = SimpleChannel::channels(DEALER + 1);
        exact_match(&channels[me.index()], &config, &input).await
    } else {
        let find = |id: PeerId| {
            args.parties
                .iter()
                .find(|p| p.id == id.index())
                .with_context(|| format!("no --party given for id {id}"))
        };
        let own = find(me)?;
        let peer = find(me.peer())?;
        let dealer_addr = args.dealer.as_deref().unwrap_or("127.0.0.1:8200");
        let channel = TcpChannel::party(me, &own.addr(), &peer.addr(), dealer_addr).await?;
        exact_match(&channel, &config, &input).await
    };
    let (report, error) = split_result(result);

    if args.json {
        let json = JsonReport {
            name: "exact_pm",
            party_id: me.index(),
            role,
            no_run: args.no_run,
            report: &report,
            error: error.as_ref().map(|e| e.to_string()),
        };
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        print_report(&report, &windows, args.no_run);
    }
    match error {
        None => Ok(()),
        Some(e) => Err(anyhow::Error::new(e).context(format!(
            "exact pattern matching failed after {} completed repetition(s)",
            report.repetitions.len()
        ))),
    }
}

/// Separates the repetitions completed before a failure from the failure itself.
fn split_result(result: Result<MatchReport, Aborted>) -> (MatchReport, Option<protocol::Error>) {
    match result {
        Ok(report) => (report, None),
        Err(Aborted { completed, error }) => (completed.into_iter().collect(), Some(error)),
    }
}

fn print_report(report: &MatchReport, windows: &Windows, no_run: bool) {
    for (i, repetition) in report.repetitions.iter().enumerate() {
        let stats = &repetition.stats;
        if no_run {
            let gates: Vec<String> = stats
                .barriers
                .iter()
                .map(|b| format!("{}: {} gates", b.label, b.gates))
                .collect();
            println!("repetition {i}: circuits built, not executed ({})", gates.join(", "));
            continue;
        }
        let found: Vec<String> = repetition
            .matches
            .iter()
            .filter(|m| m.matched)
            .map(|m| m.window.to_string())
            .collect();
        let cost = format!("{:.3?}, {} bytes sent", stats.duration(), stats.bytes_sent());
        if found.is_empty() {
            println!("repetition {i}: pattern not found ({cost})");
        } else {
            println!("repetition {i}: pattern found at {} ({cost})", found.join(", "));
        }
    }
    println!(
        "{} windows of {} bytes in a text of {} bytes",
        windows.count(),
        windows.pattern_size(),
        windows.text_size()
    );
    if !no_run {
        println!("{}", report.stats);
    }
}

async fn run_dealer(listen: SocketAddr) -> anyhow::Result<()> {
    let channel = TcpChannel::dealer(&listen.to_string()).await?;
    dealer(&channel).await.context("dealer failed")
}

#[cfg(test)]
mod tests {
    use exact_pm::{
        protocol::{InvalidInput, RepetitionResult, WindowMatch},
        stats::RepetitionStats,
    };

    use super::*;

    fn args(extra: &[&str]) -> PartyArgs {
        let cli = Cli::parse_from([&["exact-pm", "party"][..], extra].concat());
        match cli.command {
            Command::Party(args) => args,
            Command::Dealer { .. } => unreachable!("parsed a party"),
        }
    }

    #[test]
    fn parses_party_addresses() {
        let addr: PartyAddr = "1, localhost ,8101".parse().unwrap();
        assert_eq!((addr.id, addr.addr()), (1, "localhost:8101".to_string()));
        assert!("1,localhost".parse::<PartyAddr>().is_err());
        assert!("x,localhost,1".parse::<PartyAddr>().is_err());
    }

    #[tokio::test]
    async fn command_line_overrides_config_file() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!("exact-pm-{}.json", std::process::id()));
        let file = r#"{
            "my_id": 0,
            "parties": [{"id": 0, "host": "127.0.0.1", "port": 8100}],
            "pattern": "AB",
            "text_size": 4,
            "repetitions": 3,
            "no_run": true
        }"#;
        fs::write(&path, file).await?;
        let merged = args(&["--config-file", path.to_str().unwrap(), "--repetitions", "2"])
            .merge_config_file()
            .await;
        fs::remove_file(&path).await?;
        let merged = merged?;
        assert_eq!(merged.my_id, Some(0));
        assert_eq!(merged.parties.len(), 1);
        assert_eq!(merged.pattern.as_deref(), Some("AB"));
        assert_eq!(merged.text_size, Some(4));
        assert_eq!(merged.repetitions, Some(2));
        assert!(merged.no_run);
        Ok(())
    }

    #[tokio::test]
    async fn no_run_party_needs_no_peer() -> anyhow::Result<()> {
        let args = args(&["--my-id", "1", "--text", "XABY", "--pattern-size", "2", "--no-run"]);
        run_party(args).await
    }

    #[test]
    fn aborted_runs_keep_completed_repetitions() -> anyhow::Result<()> {
        let completed = RepetitionResult {
            matches: vec![
                WindowMatch {
                    window: 0,
                    matched: false,
                },
                WindowMatch {
                    window: 1,
                    matched: true,
                },
            ],
            found: true,
            stats: RepetitionStats::default(),
        };
        let aborted = Aborted {
            completed: vec![completed],
            error: InvalidInput::NoRepetitions.into(),
        };
        let (report, error) = split_result(Err(aborted));
        assert_eq!(report.repetitions.len(), 1);
        assert!(report.found());
        let json = JsonReport {
            name: "exact_pm",
            party_id: 1,
            role: "text holder",
            no_run: false,
            report: &report,
            error: error.map(|e| e.to_string()),
        };
        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&json)?)?;
        assert_eq!(json["party_id"], 1);
        assert_eq!(json["repetitions"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["repetitions"][0]["matches"][1]["matched"], true);
        assert!(json["error"].as_str().is_some_and(|e| e.contains("repetition")));
        Ok(())
    }
}
