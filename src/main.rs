//! Transfer Authorization - interactive walkthrough
//!
//! Creates one transfer request against the in-memory store and walks it
//! through the code challenge from the terminal:
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────────┐    ┌──────────┐
//! │  stdin   │───▶│  Engine  │───▶│ Console mail │───▶│  stdout  │
//! │ (codes)  │    │  (FSM)   │    │   catcher    │    │ (codes)  │
//! └──────────┘    └──────────┘    └──────────────┘    └──────────┘
//! ```
//!
//! Commands at the prompt: a code, `resend`, `cancel`, `status`, `quit`.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, BufReader};

use transfer_authz::authorization::{
    AuthorizationEngine, Clock, DeliveryContext, InMemoryTransferStore, NotificationGateway,
    SweepWorker, SystemClock,
};
use transfer_authz::config::AppConfig;
use transfer_authz::{ClientMetadata, NewTransferRequest};

// ============================================================
// ARGS
// ============================================================

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

// ============================================================
// CONSOLE GATEWAY
// ============================================================

/// Prints codes instead of sending them. Development only.
struct ConsoleGateway;

#[async_trait]
impl NotificationGateway for ConsoleGateway {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn deliver_code(
        &self,
        recipient: &str,
        code_value: &str,
        code_name: &str,
        context: &DeliveryContext,
    ) -> bool {
        println!();
        println!("  ┌─ mail catcher ─────────────────────────────");
        println!("  │ To:      {}", recipient);
        println!(
            "  │ Subject: {} {}/{} for transfer {}",
            code_name, context.code_order, context.total_codes, context.reference
        );
        println!(
            "  │ Body:    Confirm {} to {} with {}",
            context.amount, context.destination_account, code_value
        );
        println!("  └────────────────────────────────────────────");
        tracing::debug!(recipient, context = %context.to_json(), "Code printed to console");
        true
    }
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = transfer_authz::logging::init_logging(&app_config);

    tracing::info!("Starting transfer authorization walkthrough in {} mode", env);

    let recipient = get_arg(&["--recipient"]).unwrap_or_else(|| "user@example.com".to_string());
    let destination = get_arg(&["--to"]).unwrap_or_else(|| "DE89370400440532013000".to_string());
    let amount: Decimal = get_arg(&["--amount"])
        .unwrap_or_else(|| "150.00".to_string())
        .parse()
        .context("Invalid --amount")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Arc::new(AuthorizationEngine::new(
        Arc::new(InMemoryTransferStore::new()),
        Arc::new(ConsoleGateway),
        clock.clone(),
        app_config.authorization.clone(),
    ));

    let sweeper = SweepWorker::new(engine.clone(), clock, app_config.sweep.clone());
    tokio::spawn(async move {
        sweeper.run().await;
    });

    let request = engine
        .create_transfer_request(NewTransferRequest {
            recipient,
            destination_account: destination,
            amount,
            description: get_arg(&["--description"]),
        })
        .await?;
    let reference = request.reference().clone();

    println!("=== Transfer {} ===", reference);
    println!(
        "{} to {}, {} code(s) required, expires at {}",
        request.amount(),
        request.destination_account(),
        request.total_codes(),
        request.expires_at()
    );

    let client = ClientMetadata::new(Some("127.0.0.1"), Some("transfer_authz-cli"));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match engine.get_current_code(&reference).await? {
            Some(current) => println!(
                "\nEnter {} ({} of {}, {} attempt(s) left):",
                current.code_name,
                current.code_order,
                request.total_codes(),
                current.attempts_remaining
            ),
            None => break,
        }

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match line.trim() {
            "" => continue,
            "quit" => break,
            "resend" => {
                let delivered = engine.resend_current_code(&reference).await?;
                println!("Resent: {}", delivered);
            }
            "cancel" => {
                engine.cancel(&reference).await?;
                println!("Transfer cancelled.");
                break;
            }
            "status" => {
                let current = engine.get_transfer_request(&reference).await?;
                println!(
                    "Status: {}, failed attempts: {}",
                    current.status(),
                    current.failed_attempts_total()
                );
            }
            code => {
                let result = engine.submit_code(&reference, code, &client).await?;
                println!("{}", result.user_message());
                if result.is_terminal() {
                    break;
                }
            }
        }
    }

    let final_state = engine.get_transfer_request(&reference).await?;
    println!("\n=== Final status: {} ===", final_state.status());
    for attempt in engine.attempt_history(&reference).await? {
        println!(
            "  #{} code {} at {}: {}",
            attempt.sequence(),
            attempt.code_order(),
            attempt.attempted_at().format("%H:%M:%S"),
            if attempt.success() { "ok" } else { "rejected" }
        );
    }

    Ok(())
}
