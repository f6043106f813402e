use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

use signaldesk::config::Settings;
use signaldesk::logging;
use signaldesk::replay::{read_records, replay, summarize};

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    if let Err(err) = logging::init_stderr_tracing() {
        eprintln!("warning: {err:#}");
    }

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tests/fixtures/replay_session.jsonl"));
    let settings = Settings::from_env();

    let file = File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
    let input = read_records(BufReader::new(file))?;
    info!(
        records = input.records.len(),
        malformed = input.malformed.len(),
        path = %path.display(),
        "replaying"
    );

    // Record timestamps drive the aggregator clock, so cooldowns still apply.
    let malformed = input.malformed.len();
    let outcome = replay(
        input.records,
        settings.workers,
        settings.risk_scoring,
        settings.controls(),
    );
    let summary = summarize(&outcome, malformed);

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
