//! `mcp-concierge`: line-oriented driver for the orchestration engine.
//!
//! Reads commands from stdin, one per line:
//!
//! ```text
//! recommend <query>
//! connect <server>
//! disconnect <server>
//! list
//! tools
//! call <tool> [json-args]
//! call <server>/<tool> [json-args]
//! reload
//! quit
//! ```

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use mcp_concierge::config::{find_config_path, load_config};
use mcp_concierge::{DisconnectOutcome, OrchestrationContext, OrchestratorConfig, Session};

/// Bytes of tool output echoed per call.
const MAX_OUTPUT_BYTES: usize = 8 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let config = match find_config_path(&cwd) {
        Some(path) => load_config(&path).with_context(|| format!("loading {}", path.display()))?,
        None => OrchestratorConfig::default(),
    };

    mcp_concierge::telemetry::init_tracing(&config.log).context("initialising logging")?;

    let context = OrchestrationContext::from_config(config).context("building orchestrator")?;
    let report = context.init().await;
    println!(
        "{} servers in catalog, {} indexed",
        context.catalog().len(),
        report.indexed
    );

    let session = context.open_session().await;
    let result = run_repl(&context, &session).await;

    session.close().await;
    context.shutdown().await;
    result
}

async fn run_repl(context: &OrchestrationContext, session: &Session) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        match command {
            "quit" | "exit" => break,
            "recommend" => {
                let k = context.config().recommend.default_k;
                let ranked = session.recommend_scored(rest, k).await;
                if ranked.is_empty() {
                    println!("no matching servers");
                }
                for rec in ranked {
                    println!("{:<24} {:.3}  {}", rec.name, rec.score, rec.description);
                }
            }
            "connect" => match session.connect(rest).await {
                Ok(info) => println!(
                    "connected to {} ({} tools: {})",
                    info.server_name,
                    info.tool_names.len(),
                    info.tool_names.join(", ")
                ),
                Err(e) => println!("error: {e}"),
            },
            "disconnect" => match session.disconnect(rest).await {
                DisconnectOutcome::Disconnected { forced: false } => println!("disconnected {rest}"),
                DisconnectOutcome::Disconnected { forced: true } => {
                    println!("disconnected {rest} (terminated)")
                }
                DisconnectOutcome::NotConnected => println!("{rest} was not connected"),
            },
            "list" => {
                let connected = session.list_connected().await;
                if connected.is_empty() {
                    println!("no connected servers");
                }
                for info in connected {
                    println!(
                        "{:<24} {:<12} {}",
                        info.server_name,
                        info.state.to_string(),
                        info.tool_names.join(", ")
                    );
                }
            }
            "tools" => {
                for tool in session.tool_definitions().await {
                    let shadowed = if tool.shadowed.is_empty() {
                        String::new()
                    } else {
                        format!(" (also on {})", tool.shadowed.join(", "))
                    };
                    println!("{}/{}{}  {}", tool.server_name, tool.name, shadowed, tool.description);
                }
            }
            "call" => match parse_call(rest) {
                Ok((server, tool, args)) => {
                    let outcome = match server {
                        Some(server) => session.invoke_tool_on(server, tool, args).await,
                        None => session.invoke_tool(tool, args).await,
                    };
                    match outcome {
                        Ok(result) => println!("{}", result.render_for_conversation(MAX_OUTPUT_BYTES)),
                        Err(e) => println!("error: {e}"),
                    }
                }
                Err(e) => println!("error: {e:#}"),
            },
            "reload" => match context.reload().await {
                Ok(report) => println!("catalog reloaded, {} indexed", report.indexed),
                Err(e) => println!("error: {e}"),
            },
            other => println!("unknown command '{other}'"),
        }
    }
    Ok(())
}

/// Split `[server/]tool [json]` into its parts. Missing args mean `{}`.
fn parse_call(input: &str) -> Result<(Option<&str>, &str, serde_json::Value)> {
    let (target, args) = input.split_once(char::is_whitespace).unwrap_or((input, ""));
    anyhow::ensure!(!target.is_empty(), "usage: call [server/]tool [json-args]");

    let args = if args.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(args.trim()).context("arguments must be JSON")?
    };
    match target.split_once('/') {
        Some((server, tool)) => Ok((Some(server), tool, args)),
        None => Ok((None, target, args)),
    }
}
