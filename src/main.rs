//! wolfies-sms-relay - CLI for the SMS to Telegram relay daemon
//!
//! Every subcommand is one request to the daemon over its UNIX socket.
//!
//! CHANGELOG:
//! - 10/19/2026 - Relay subcommands replace the iMessage commands
//! - 01/10/2026 - Initial scaffold with CLI skeleton

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use wolfies_sms_relay::client::{ClientError, DaemonClient};
use wolfies_sms_relay::config::{parse_list, FilterMode};
use wolfies_sms_relay::db::connection::default_socket_path;
use wolfies_sms_relay::output::{self, OutputControls};

/// Control the SMS relay daemon: credentials, filters, activity, history.
#[derive(Parser, Debug)]
#[command(name = "wolfies-sms-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Compact JSON output (no whitespace)
    #[arg(long, global = true)]
    compact: bool,

    /// Comma-separated field allowlist
    #[arg(long, global = true)]
    fields: Option<String>,

    /// Truncate text fields to this length
    #[arg(long, global = true)]
    max_text_chars: Option<u32>,

    /// Daemon socket path (default: <data dir>/daemon.sock)
    #[arg(long, global = true)]
    socket: Option<String>,

    /// Request timeout (seconds)
    #[arg(long, global = true, default_value_t = 10.0)]
    timeout: f64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    // =========================================================================
    // STATE
    // =========================================================================
    /// Show relay state, last error and counters
    Status,

    /// Start forwarding
    Activate,

    /// Stop forwarding (cancels pending retries)
    Deactivate,

    // =========================================================================
    // CONFIGURATION
    // =========================================================================
    /// Show the current configuration (token masked)
    Config,

    /// Set the Telegram bot token and destination chat
    SetRelay {
        /// Bot token from @BotFather
        #[arg(long)]
        token: Option<String>,

        /// Destination chat ID
        #[arg(long)]
        destination: Option<String>,
    },

    /// Replace filter lists (comma separated; empty string clears)
    SetFilters {
        /// Phone numbers
        #[arg(long)]
        numbers: Option<String>,

        /// Keywords (case-insensitive substrings)
        #[arg(long)]
        keywords: Option<String>,
    },

    /// Set filter mode: blacklist or whitelist
    SetMode {
        mode: FilterMode,
    },

    /// Turn forward notifications on or off
    SetNotify {
        #[arg(value_parser = clap::builder::BoolishValueParser::new())]
        enabled: bool,
    },

    // =========================================================================
    // STATS / HISTORY
    // =========================================================================
    /// Show forwarding counters
    Stats,

    /// List forwarded messages, most recent first
    History {
        /// Max records
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Delete one history record
    Delete {
        /// Record ID
        id: String,
    },

    /// Deactivate and erase config, history and stats
    ClearAll {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    // =========================================================================
    // BRIDGE / TESTING
    // =========================================================================
    /// Push a message into the relay as if it had just arrived
    Inject {
        #[arg(long)]
        sender: String,

        /// Message text
        body: Vec<String>,

        /// Arrival time (RFC 3339, default now)
        #[arg(long)]
        received_at: Option<String>,
    },

    /// Report that the platform granted the SMS capability
    Grant,

    /// Report that the SMS capability was revoked
    Revoke,

    /// Ask the platform bridge for the SMS capability and wait for the answer
    RequestPermission,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let output_controls = OutputControls {
        json: cli.json,
        compact: cli.compact,
        fields: cli.fields.clone(),
        max_text_chars: cli.max_text_chars,
    };

    let socket = cli
        .socket
        .as_deref()
        .map(|s| PathBuf::from(shellexpand::tilde(s).to_string()))
        .unwrap_or_else(default_socket_path);
    let client = DaemonClient::new(socket, Duration::from_secs_f64(cli.timeout.max(0.1)));

    match run(&client, cli.command, &output_controls) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            if output_controls.wants_json() {
                println!("{}", output::format_error(e.code(), &e.to_string()));
            } else {
                eprintln!("Error: {}", e);
            }
            ExitCode::from(1)
        }
    }
}

fn run(client: &DaemonClient, command: Command, out: &OutputControls) -> Result<(), ClientError> {
    match command {
        Command::Status => {
            let result = client.request("status", HashMap::new())?;
            out.print(&result, render_status);
        }
        Command::Activate => {
            let result = client.request("activate", HashMap::new())?;
            out.print(&result, render_state);
        }
        Command::Deactivate => {
            let result = client.request("deactivate", HashMap::new())?;
            out.print(&result, render_state);
        }
        Command::Config => {
            let result = client.request("config", HashMap::new())?;
            out.print(&result, render_config);
        }
        Command::SetRelay { token, destination } => {
            let mut params = HashMap::new();
            if let Some(token) = token {
                params.insert("relay_token".to_string(), json!(token));
            }
            if let Some(destination) = destination {
                params.insert("relay_destination_id".to_string(), json!(destination));
            }
            let result = client.request("update_config", params)?;
            out.print(&result, |v| render_config(&v["config"]));
        }
        Command::SetFilters { numbers, keywords } => {
            let mut params = HashMap::new();
            if let Some(numbers) = numbers {
                params.insert("filter_numbers".to_string(), json!(parse_list(&numbers)));
            }
            if let Some(keywords) = keywords {
                params.insert("filter_keywords".to_string(), json!(parse_list(&keywords)));
            }
            let result = client.request("update_config", params)?;
            out.print(&result, |v| render_config(&v["config"]));
        }
        Command::SetMode { mode } => {
            let params = HashMap::from([("mode".to_string(), json!(mode))]);
            let result = client.request("update_config", params)?;
            out.print(&result, |v| render_config(&v["config"]));
        }
        Command::SetNotify { enabled } => {
            let params = HashMap::from([("notify_on_forward".to_string(), json!(enabled))]);
            let result = client.request("update_config", params)?;
            out.print(&result, |v| render_config(&v["config"]));
        }
        Command::Stats => {
            let result = client.request("stats", HashMap::new())?;
            out.print(&result, render_stats);
        }
        Command::History { limit } => {
            let mut params = HashMap::new();
            if let Some(limit) = limit {
                params.insert("limit".to_string(), json!(limit));
            }
            let result = client.request("history", params)?;
            out.print(&result, render_history);
        }
        Command::Delete { id } => {
            let result = client.request("delete_record", HashMap::from([("id".to_string(), json!(id))]))?;
            out.print(&result, |v| format!("Deleted {}", v["deleted"].as_str().unwrap_or("")));
        }
        Command::ClearAll { yes } => {
            if !yes {
                eprintln!("This erases the relay token, filters, history and stats. Re-run with --yes.");
                return Ok(());
            }
            let result = client.request("clear_all", HashMap::new())?;
            out.print(&result, |_| "All relay data cleared; forwarding is off.".to_string());
        }
        Command::Inject {
            sender,
            body,
            received_at,
        } => {
            let mut params = HashMap::from([
                ("sender".to_string(), json!(sender)),
                ("body".to_string(), json!(body.join(" "))),
            ]);
            if let Some(received_at) = received_at {
                params.insert("received_at".to_string(), json!(received_at));
            }
            let result = client.request("message", params)?;
            out.print(&result, |v| {
                format!("Queued (relay is {})", v["state"].as_str().unwrap_or("unknown"))
            });
        }
        Command::Grant => report_permission(client, out, true)?,
        Command::Revoke => report_permission(client, out, false)?,
        Command::RequestPermission => {
            let result = client.request("request_permission", HashMap::new())?;
            out.print(&result, |v| {
                if v["granted"].as_bool().unwrap_or(false) {
                    "Permission granted".to_string()
                } else {
                    "Permission not granted".to_string()
                }
            });
        }
    }
    Ok(())
}

fn report_permission(client: &DaemonClient, out: &OutputControls, granted: bool) -> Result<(), ClientError> {
    let params = HashMap::from([("granted".to_string(), json!(granted))]);
    let result = client.request("permission", params)?;
    out.print(&result, |v| {
        format!(
            "Permission: {}  Relay: {}",
            text(&v["permission"]),
            text(&v["state"])
        )
    });
    Ok(())
}

// ============================================================================
// Human rendering
// ============================================================================

fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

fn render_error_kind(v: &Value) -> String {
    match v["kind"].as_str() {
        Some("relay") => format!("relay {}", text(&v["relay"])),
        Some(kind) => kind.to_string(),
        None => "none".to_string(),
    }
}

fn render_state(v: &Value) -> String {
    format!("Relay is {}", text(&v["state"]))
}

fn render_status(v: &Value) -> String {
    let mut lines = vec![
        format!("State:        {}", text(&v["state"])),
        format!("Permission:   {}", text(&v["permission"])),
        format!(
            "Credentials:  {}",
            if v["credentials_configured"].as_bool().unwrap_or(false) {
                "configured"
            } else {
                "missing"
            }
        ),
        format!("Last error:   {}", render_error_kind(&v["last_error"])),
        format!("Retries:      {} pending", text(&v["pending_retries"])),
        format!(
            "Forwarded:    {} total, {} today (last: {})",
            text(&v["total_forwarded"]),
            text(&v["today_forwarded"]),
            text(&v["last_forwarded"])
        ),
    ];
    if let Some(notices) = v["recent_notices"].as_array() {
        for notice in notices.iter().rev() {
            lines.push(format!(
                "  -> {} at {}",
                text(&notice["sender"]),
                text(&notice["forwarded_at"])
            ));
        }
    }
    lines.join("\n")
}

fn render_list(v: &Value) -> String {
    match v.as_array() {
        Some(items) if !items.is_empty() => items.iter().map(text).collect::<Vec<_>>().join(", "),
        _ => "(none)".to_string(),
    }
}

fn render_config(v: &Value) -> String {
    [
        format!("Token:        {}", text(&v["relay_token"])),
        format!("Destination:  {}", text(&v["relay_destination_id"])),
        format!("Mode:         {}", text(&v["mode"])),
        format!("Numbers:      {}", render_list(&v["filter_numbers"])),
        format!("Keywords:     {}", render_list(&v["filter_keywords"])),
        format!("Notify:       {}", text(&v["notify_on_forward"])),
    ]
    .join("\n")
}

fn render_stats(v: &Value) -> String {
    format!(
        "Total forwarded: {}\nToday:           {}\nLast forwarded:  {}",
        text(&v["total_forwarded"]),
        text(&v["today_forwarded"]),
        text(&v["last_forwarded"])
    )
}

fn render_history(v: &Value) -> String {
    let records = match v["records"].as_array() {
        Some(records) if !records.is_empty() => records,
        _ => return "No forwarded messages.".to_string(),
    };
    records
        .iter()
        .map(|r| {
            format!(
                "[{}] {} {} ({} attempt(s))\n    {}\n    id: {}",
                text(&r["outcome"]),
                text(&r["received_at"]),
                text(&r["sender"]),
                text(&r["attempts"]),
                text(&r["body"]),
                text(&r["id"])
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
