//! The stenographer: tails one AI-CLI session file and emits each
//! user→assistant exchange exactly once, in source order, as verbatim
//! transcript records in the intake queue.

pub mod emit;
pub mod positions;
pub mod records;
pub mod tailer;

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

use crate::config::ScrivenerConfig;
use emit::{write_transcript, TranscriptRecord};
use positions::PositionFile;
use records::SessionKind;

/// One full pass over the session file: parse, pair, emit, persist position.
/// Returns the number of exchanges emitted.
///
/// The position file is rewritten after every emission, so a crash re-emits
/// at most the exchange that was in flight — which the persist stage's
/// idempotency key rejects.
pub fn tick(
    session: &Path,
    kind: SessionKind,
    queue_dir: &Path,
    position_file: &PositionFile,
) -> Result<u64> {
    if !session.exists() {
        // Missing files are waited out, not errored.
        return Ok(0);
    }

    let records = match tailer::read_session(session, kind) {
        Ok(records) => records,
        Err(e) if e.is_transient() => {
            warn!(error = %e, "session not readable this tick");
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };

    let (last_position, mut exchange_count) = position_file.load();
    let result = tailer::collect_exchanges(&records, last_position);

    let session_name = session
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".into());

    let mut emitted = 0u64;
    for exchange in result.exchanges {
        let record = TranscriptRecord::new(
            exchange_count,
            exchange.user,
            exchange.assistant,
            kind.source_tag(),
            &session_name,
        );
        write_transcript(queue_dir, &record)?;
        exchange_count += 1;
        emitted += 1;
        position_file.store(session, result.new_position, exchange_count)?;
    }

    if emitted == 0 {
        // Still persist position movement past noise records.
        position_file.store(session, result.new_position, exchange_count)?;
    }

    Ok(emitted)
}

/// Run the stenographer for one session file until shutdown (or one pass
/// with `once`).
pub async fn run(
    config: &ScrivenerConfig,
    session: PathBuf,
    kind: Option<SessionKind>,
    once: bool,
) -> Result<()> {
    let kind = kind.unwrap_or_else(|| SessionKind::infer(&session));
    let queue_dir = config.client_dumps_dir();
    let position_file = PositionFile::for_session(&config.positions_dir(), &session);

    info!(
        session = %session.display(),
        source = kind.source_tag(),
        "stenographer watching session"
    );

    let interval = std::time::Duration::from_secs(config.steno.check_interval_seconds);
    let mut total = 0u64;

    loop {
        match tick(&session, kind, &queue_dir, &position_file) {
            Ok(0) => {}
            Ok(n) => {
                total += n;
                info!(emitted = n, total, "exchanges transcribed");
            }
            Err(e) => {
                warn!(error = %e, "tick failed; will retry");
            }
        }

        if once {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_signal() => {
                info!(total, "stenographer shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub(crate) async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
