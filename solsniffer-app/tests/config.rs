use solsniffer_app::{
    config::{load_config, AppConfig, Environment},
    error::AppError,
};
use solsniffer_connector::config::{CheckpointMode, DelayType};
use solsniffer_logger::{LogFormat, LogOutput};
use std::io::Write;

const SAMPLE: &str = r#"
[app]
name = "sniffer-eu"
environment = "staging-canary"
db-path = "/var/lib/solsniffer"

[app.log]
level = "debug"
format = "json"

[connector.solana]
rpc-url = "https://api.devnet.solana.com"
commitment = "finalized"

[connector.solana.ws]
scheme = "wss"
host = "api.devnet.solana.com"
path = "/"

[connector.monitor]
wallets = ["9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM"]
tokens = ["EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"]
health-check-interval-secs = 15

[connector.backfill]
chunk-size = 25
checkpoint-mode = "per-block"

[connector.retry.database]
attempts = 5
delay-ms = 100
delay-type = "exponential"
"#;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn loads_a_toml_file_with_defaults_for_missing_keys() {
    let file = write_config(SAMPLE);
    let config = load_config(Some(file.path().to_str().unwrap())).unwrap();

    assert_eq!(config.app.environment, Environment::StagingCanary);
    assert_eq!(config.app.db_path, "/var/lib/solsniffer");
    assert_eq!(config.app.log.level, "debug");
    assert_eq!(config.app.log.format, LogFormat::Json);
    assert_eq!(config.app.log.output, LogOutput::Stdout);

    let connector = &config.connector;
    assert_eq!(connector.solana.ws.url().unwrap().as_str(), "wss://api.devnet.solana.com/");
    assert_eq!(connector.monitor.health_check_interval_secs, 15);
    assert_eq!(connector.backfill.chunk_size, 25);
    assert_eq!(connector.backfill.max_concurrency, 5);
    assert_eq!(connector.backfill.checkpoint_mode, CheckpointMode::PerBlock);
    assert_eq!(connector.retry.database.attempts, 5);
    assert_eq!(connector.retry.database.delay_type, DelayType::Exponential);
    assert_eq!(connector.retry.websocket.attempts, 10);

    config.validate().unwrap();
}

#[test]
fn missing_wallets_fail_validation() {
    let file = write_config(&SAMPLE.replace(
        r#"wallets = ["9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM"]"#,
        "wallets = []",
    ));
    let config = load_config(Some(file.path().to_str().unwrap())).unwrap();

    assert!(matches!(config.validate(), Err(AppError::InvalidConfig(_))));
}

#[test]
fn empty_db_path_fails_validation() {
    let mut config = AppConfig::default();
    config.connector.monitor.wallets = vec!["wallet".to_string()];
    config.connector.monitor.tokens = vec!["mint".to_string()];
    config.validate().unwrap();

    config.app.db_path = "  ".to_string();
    assert!(matches!(config.validate(), Err(AppError::InvalidConfig(_))));
}

#[test]
fn unknown_commitment_is_rejected() {
    let file = write_config(&SAMPLE.replace(r#"commitment = "finalized""#, r#"commitment = "eventually""#));
    assert!(load_config(Some(file.path().to_str().unwrap())).is_err());
}

#[test]
fn environment_overrides_the_file() {
    std::env::set_var("SOLSNIFFER__APP__NAME", "sniffer-from-env");
    let file = write_config(SAMPLE);
    let config = load_config(Some(file.path().to_str().unwrap())).unwrap();
    std::env::remove_var("SOLSNIFFER__APP__NAME");

    assert_eq!(config.app.name, "sniffer-from-env");
}
