//! CLI command implementations
//!
//! Every command loads and validates the configuration first. Commands
//! other than `init` refuse to run against an uninitialized data directory,
//! and the store refuses to open over a corrupt log.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::config::StationConfig;
use crate::failover::FailoverManager;
use crate::health_server::{HealthServer, HealthState, PeerStatus};
use crate::observability::{log_event, log_event_with_fields, Event, FileAuditLog, Logger};
use crate::peer::{HttpHealthProbe, PeerMonitor};
use crate::store::{EventStore, LogWriter, StoreOptions};
use crate::tap::{LineTapSource, LogFeedback, StationIdentity, TapHandler};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Name of the audit trail under `<data_dir>/data/`
pub const AUDIT_LOG_FILE_NAME: &str = "audit.log";

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Run { config } => run_station(&config),
        Command::Export {
            config,
            session,
            output,
        } => export(&config, session.as_deref(), output.as_deref()),
        Command::Anomalies { config, session } => anomalies(&config, session.as_deref()),
        Command::ManualAdd {
            config,
            token,
            stage,
            operator,
            reason,
            timestamp,
            session,
        } => manual_add(
            &config,
            &ManualAddRequest {
                token_id: token,
                stage,
                operator_id: operator,
                reason,
                timestamp,
                session_id: session,
            },
        ),
        Command::Remove {
            config,
            event_id,
            operator,
            reason,
        } => remove(&config, event_id, &operator, &reason),
        Command::NextId { config, session } => next_id(&config, session.as_deref()),
    }
}

/// Create the data directory and an empty event log.
pub fn init(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let data_dir = config.data_path();

    if is_initialized(data_dir) {
        return Err(CliError::already_initialized());
    }

    let writer = LogWriter::open(data_dir)
        .map_err(|e| CliError::config_error(format!("Failed to create data directory: {}", e)))?;
    FileAuditLog::open(audit_log_path(data_dir))
        .map_err(|e| CliError::config_error(format!("Failed to create audit log: {}", e)))?;

    write_response(json!({
        "initialized": true,
        "log": writer.path().display().to_string(),
    }))
}

/// Run the station until the tap source is exhausted.
///
/// Startup order:
/// 1. configuration
/// 2. store replay
/// 3. peer monitor (if configured) wired to the failover manager
/// 4. health server
/// 5. tap loop on stdin
pub fn run_station(config_path: &Path) -> CliResult<()> {
    log_event(Event::StationStart);
    let config = load_config(config_path)?;
    let store = Arc::new(open_store(&config)?);
    let failover = Arc::new(
        FailoverManager::new(config.primary_stage.clone(), config.fallback_stages.clone())
            .with_metrics(Arc::clone(store.metrics())),
    );

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;
    rt.block_on(serve_station(config, store, failover))
}

async fn serve_station(
    config: StationConfig,
    store: Arc<EventStore>,
    failover: Arc<FailoverManager>,
) -> CliResult<()> {
    let monitor = match &config.peer {
        Some(peer) => {
            let probe = HttpHealthProbe::new(peer).map_err(|e| CliError::boot_failed(e.to_string()))?;
            let on_down = Arc::clone(&failover);
            let on_recovered = Arc::clone(&failover);
            let monitor = Arc::new(
                PeerMonitor::builder(peer.clone(), probe)
                    .metrics(Arc::clone(store.metrics()))
                    .on_down(move || {
                        on_down.enable_failover();
                    })
                    .on_recovered(move || {
                        on_recovered.disable_failover();
                    })
                    .build(),
            );
            monitor.start();
            Some(monitor)
        }
        None => None,
    };

    let state = Arc::new(HealthState {
        device_id: config.device_id.clone(),
        session_id: config.session_id.clone(),
        store: Arc::clone(&store),
        failover: Arc::clone(&failover),
        peer: monitor
            .clone()
            .map(|m| m as Arc<dyn PeerStatus>),
    });
    let server = HealthServer::bind(&config.health_addr(), state)
        .await
        .map_err(|e| {
            CliError::boot_failed(format!("Failed to bind {}: {}", config.health_addr(), e))
        })?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_task = tokio::spawn(server.serve(async move {
        let _ = shutdown_rx.await;
    }));

    let handler = TapHandler::new(
        store,
        failover,
        Box::new(LogFeedback),
        StationIdentity {
            device_id: config.device_id.clone(),
            session_id: config.session_id.clone(),
            auto_init_start_id: config.auto_init_start_id,
        },
    );
    log_event_with_fields(
        Event::StationReady,
        &[
            ("device_id", &config.device_id),
            ("primary_stage", &config.primary_stage),
            ("session_id", &config.session_id),
        ],
    );

    let taps = tokio::task::spawn_blocking(move || {
        let mut source = LineTapSource::stdin();
        handler.run(&mut source)
    })
    .await
    .map_err(|e| CliError::io_error(format!("Tap loop failed: {}", e)))??;

    log_event(Event::ShutdownStart);
    if let Some(monitor) = &monitor {
        monitor.stop().await;
    }
    let _ = shutdown_tx.send(());
    server_task
        .await
        .map_err(|e| CliError::io_error(format!("Health server task failed: {}", e)))??;
    log_event_with_fields(
        Event::ShutdownComplete,
        &[("taps_processed", &taps.to_string())],
    );

    write_response(json!({ "taps_processed": taps }))
}

/// Write live events as CSV to a file or stdout.
pub fn export(config_path: &Path, session: Option<&str>, output: Option<&Path>) -> CliResult<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;

    match output {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                CliError::io_error(format!("Failed to create {}: {}", path.display(), e))
            })?;
            let mut writer = BufWriter::new(file);
            let rows = store.export_csv(&mut writer, session)?;
            writer.flush()?;
            write_response(json!({
                "rows": rows,
                "output": path.display().to_string(),
            }))
        }
        None => {
            let mut stdout = io::stdout().lock();
            store.export_csv(&mut stdout, session)?;
            Ok(())
        }
    }
}

/// Print the anomaly report.
pub fn anomalies(config_path: &Path, session: Option<&str>) -> CliResult<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let report = store.get_anomalies(session.unwrap_or(&config.session_id));
    write_response(serde_json::to_value(report)?)
}

/// Parameters of `manual-add`.
#[derive(Debug, Clone)]
pub struct ManualAddRequest {
    pub token_id: String,
    pub stage: String,
    pub operator_id: String,
    pub reason: String,
    /// RFC 3339; now when absent
    pub timestamp: Option<String>,
    pub session_id: Option<String>,
}

pub fn manual_add(config_path: &Path, request: &ManualAddRequest) -> CliResult<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;

    let timestamp = match &request.timestamp {
        Some(raw) => parse_timestamp(raw)?,
        None => store.now(),
    };
    let session_id = request.session_id.as_deref().unwrap_or(&config.session_id);

    let result = store.add_manual_event(
        &request.token_id,
        &request.stage,
        timestamp,
        session_id,
        &request.operator_id,
        &request.reason,
    );
    if let Some(error) = &result.error {
        return Err(CliError::rejected(error.to_string()));
    }

    write_response(json!({
        "outcome": result.outcome.as_str(),
        "event": result.event,
        "provenance": result.provenance,
    }))
}

pub fn remove(config_path: &Path, event_id: u64, operator_id: &str, reason: &str) -> CliResult<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let deleted = store.remove_event(event_id, operator_id, reason)?;
    write_response(json!({ "deleted": deleted }))
}

pub fn next_id(config_path: &Path, session: Option<&str>) -> CliResult<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let issued = store.get_next_auto_init_token_id(
        session.unwrap_or(&config.session_id),
        config.auto_init_start_id,
    );
    write_response(serde_json::to_value(issued)?)
}

/// Load config and apply its log level.
fn load_config(config_path: &Path) -> CliResult<StationConfig> {
    let config = StationConfig::load(config_path)?;
    Logger::set_min_severity(config.log_severity()?);
    log_event_with_fields(
        Event::ConfigLoaded,
        &[
            ("config", &config_path.display().to_string()),
            ("data_dir", &config.data_dir),
            ("device_id", &config.device_id),
        ],
    );
    Ok(config)
}

/// Open the durable store with the file audit trail.
fn open_store(config: &StationConfig) -> CliResult<EventStore> {
    let data_dir = config.data_path();
    if !is_initialized(data_dir) {
        return Err(CliError::not_initialized());
    }

    let audit = FileAuditLog::open(audit_log_path(data_dir))
        .map_err(|e| CliError::boot_failed(format!("Failed to open audit log: {}", e)))?;
    let options = StoreOptions {
        audit: Arc::new(audit),
        anomaly_config: config.anomalies.clone(),
        ..StoreOptions::default()
    };

    EventStore::open(data_dir, config.workflow()?, options).map_err(|e| {
        if e.is_locked() {
            CliError::rejected(format!("Data directory is in use by a running station: {}", e))
        } else {
            CliError::boot_failed(format!("Store open failed: {}", e))
        }
    })
}

/// `<data_dir>/data/audit.log`
pub fn audit_log_path(data_dir: &Path) -> PathBuf {
    data_dir.join("data").join(AUDIT_LOG_FILE_NAME)
}

fn is_initialized(data_dir: &Path) -> bool {
    LogWriter::log_path(data_dir).exists()
}

fn parse_timestamp(raw: &str) -> CliResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CliError::rejected(format!("Invalid timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::errors::CliErrorCode;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("tapstation.json");
        let config = json!({
            "device_id": "st-1",
            "session_id": "day-1",
            "data_dir": dir.path().join("station").display().to_string(),
            "primary_stage": "QUEUE_JOIN",
            "log_level": "error",
        });
        fs::write(&path, config.to_string()).unwrap();
        path
    }

    #[test]
    fn test_init_twice_fails() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        init(&config).unwrap();
        assert!(dir.path().join("station/data/events.log").exists());
        assert!(dir.path().join("station/data/audit.log").exists());

        let err = init(&config).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::AlreadyInitialized);
    }

    #[test]
    fn test_commands_require_init() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        let err = next_id(&config, None).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::NotInitialized);
    }

    #[test]
    fn test_manual_add_is_durable_and_audited() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        init(&config).unwrap();

        manual_add(
            &config,
            &ManualAddRequest {
                token_id: "007".into(),
                stage: "EXIT".into(),
                operator_id: "admin".into(),
                reason: "reader offline".into(),
                timestamp: Some("2024-07-01T10:00:00Z".into()),
                session_id: None,
            },
        )
        .unwrap();

        let loaded = StationConfig::load(&config).unwrap();
        let store = open_store(&loaded).unwrap();
        assert_eq!(store.get_event_count("day-1"), 1);
        let audit = fs::read_to_string(audit_log_path(loaded.data_path())).unwrap();
        assert!(audit.contains("MANUAL_EVENT_ADDED"));
        assert!(audit.contains("reader offline"));
    }

    #[test]
    fn test_admin_command_refused_while_station_holds_store() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        init(&config).unwrap();

        let loaded = StationConfig::load(&config).unwrap();
        let station = open_store(&loaded).unwrap();
        let issued = station.get_next_auto_init_token_id("day-1", 1);

        let err = next_id(&config, None).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::Rejected);
        assert!(err.to_string().contains("TAP_STORE_LOCKED"));

        drop(station);
        let reopened = open_store(&loaded).unwrap();
        let next = reopened.get_next_auto_init_token_id("day-1", 1);
        assert_eq!(next.numeric_id, issued.numeric_id + 1);
    }

    #[test]
    fn test_remove_unknown_event_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir);
        init(&config).unwrap();
        let err = remove(&config, 42, "admin", "cleanup").unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::Rejected);
    }

    #[test]
    fn test_bad_timestamp_rejected() {
        assert!(parse_timestamp("yesterday").is_err());
        assert_eq!(
            parse_timestamp("2024-07-01T12:00:00+02:00").unwrap(),
            parse_timestamp("2024-07-01T10:00:00Z").unwrap()
        );
    }
}
