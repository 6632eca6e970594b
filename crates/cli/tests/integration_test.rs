use autotrader_advisory::AdvisoryClient;
use autotrader_core::test_util::MockVenue;
use autotrader_core::{AdvisoryConfig, ExecutionMode, ProviderConfig, TradingConfig};
use autotrader_orchestrator::{CycleDatabase, CycleEngine, CycleOutcome, NoIndicators, Trigger};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPLY: &str = concat!(
    "Breadth is healthy and BTC holds support.\n",
    r#"<tooluse>{"kind": "trade_in", "info": "breakout", "args": {"target": "BTC/USDT", "side": "LONG", "count_usdt": 120, "stop_loss_price": 58500}}</tooluse>"#,
    "\n",
    r#"<tooluse>{"kind": "update_memory", "info": "notes", "args": {"content": "Long BTC from 60000, stop 58500."}}</tooluse>"#,
);

fn completion(content: &str) -> Value {
    json!({
        "model": "test-model-1",
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 900, "completion_tokens": 120, "total_tokens": 1020}
    })
}

fn provider(name: &str, server: &MockServer) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        base_url: server.uri(),
        api_key: "test-key".to_string(),
        model: "test-model".to_string(),
    }
}

fn reply_file(name: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("autotrader-{}-{name}.txt", std::process::id()));
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn test_full_cycle_against_http_advisory() {
    let primary = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .expect(1)
        .mount(&primary)
        .await;

    let backup = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("BTC/USDT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(REPLY)))
        .expect(1)
        .mount(&backup)
        .await;

    let advisory = AdvisoryClient::from_config(&AdvisoryConfig {
        providers: vec![provider("primary", &primary), provider("backup", &backup)],
        attempt_timeout_secs: 5,
        ..AdvisoryConfig::default()
    })
    .unwrap();

    let venue = Arc::new(MockVenue::new().with_market("BTC/USDT", dec!(60000)));
    let database = CycleDatabase::new_in_memory().await.unwrap();
    let trading = TradingConfig {
        symbols: vec!["BTC/USDT".to_string()],
        execution_mode: ExecutionMode::Live,
        ..TradingConfig::default()
    };
    let engine = CycleEngine::new(
        venue.clone(),
        advisory,
        Arc::new(NoIndicators),
        database.clone(),
        trading,
    );

    let record = engine.run_cycle(Trigger::Scheduled).await.unwrap();

    assert_eq!(record.outcome(), CycleOutcome::Success);
    assert_eq!(record.summary.provider.as_deref(), Some("backup"));
    assert_eq!(record.summary.model.as_deref(), Some("test-model-1"));
    assert_eq!(record.summary.tokens_used, Some(1020));
    assert_eq!(record.summary.command_count, 2);

    let trade = record.results().next().unwrap();
    assert!(trade.is_success());
    assert_eq!(trade.order_ids.len(), 2);

    let positions = venue.current_positions();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].size, dec!(0.002));
    assert_eq!(venue.resting_orders().len(), 1);

    assert_eq!(
        database.memory().await.unwrap().content,
        "Long BTC from 60000, stop 58500."
    );
    let stored = database.cycle(record.id()).await.unwrap().unwrap();
    assert_eq!(stored.commands, record.commands);
    assert_eq!(stored.summary.reasoning, record.summary.reasoning);
}

#[test]
fn test_decode_command_prints_summary() {
    let file = reply_file("summary", REPLY);

    let output = Command::new(env!("CARGO_BIN_EXE_autotrader"))
        .arg("decode")
        .arg(&file)
        .output()
        .unwrap();
    std::fs::remove_file(&file).ok();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Breadth is healthy and BTC holds support."));
    assert!(stdout.contains("COMMANDS (2):"));
    assert!(stdout.contains("[TRADE] LONG BTC/USDT: breakout"));
    assert!(stdout.contains("[MEMORY] Long BTC from 60000"));
    assert!(!stdout.contains("WARNING"));
}

#[test]
fn test_decode_command_json_output() {
    let file = reply_file("json", "No blocks today.");

    let output = Command::new(env!("CARGO_BIN_EXE_autotrader"))
        .args(["decode", "--json"])
        .arg(&file)
        .output()
        .unwrap();
    std::fs::remove_file(&file).ok();

    assert!(output.status.success());
    let commands: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(commands, json!([]));
}

#[test]
fn test_decode_missing_file_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_autotrader"))
        .args(["decode", "/definitely/not/here.txt"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
