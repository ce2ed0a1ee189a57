// hivectl — thin IPC CLI client (§6)
//
// Connects to the daemon's loopback TCP port (read from `daemon.port` in the
// home directory), sends one newline-terminated JSON request, and prints the
// newline-terminated JSON response. No teacher analogue exists for this —
// the teacher is a Tauri app with no CLI — so this follows the pack-wide
// convention of a `clap`-derived subcommand binary.

use clap::{Parser, Subcommand};
use hive::daemon::Runtime;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "hivectl", about = "Talk to a running hive daemon over its loopback IPC port")]
struct Cli {
    /// Override the home directory (defaults to HIVE_HOME or ~/.hive).
    #[arg(long)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check whether the daemon is reachable.
    Ping,
    /// Print the daemon's current status.
    Status,
    /// Ask the daemon to shut down.
    Stop,
    /// Enqueue a task for the background worker.
    Task {
        /// Task title; also the prompt sent to the orchestrator.
        title: String,
        /// Explicit task id; a fresh UUID is generated if omitted.
        #[arg(long)]
        id: Option<String>,
        /// Agent id to run the task under (defaults to the primary agent).
        #[arg(long)]
        agent_id: Option<String>,
    },
    /// Cancel a queued or running task by id.
    TaskCancel { id: String },
    /// Reload every platform integration adapter.
    IntegrationsReload,
    /// Send one message to the webchat bridge and print the reply.
    Chat {
        text: String,
        /// Sender id the integration auth gate checks (defaults to "local").
        #[arg(long, default_value = "local")]
        from: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let home = match cli.home {
        Some(home) => home,
        None => match Runtime::resolve_home() {
            Ok(home) => home,
            Err(err) => {
                eprintln!("hivectl: {err}");
                std::process::exit(1);
            }
        },
    };

    match cli.command {
        Command::Chat { text, from } => {
            let request = json!({ "from": from, "text": text });
            match send_request(&home, "webchat.port", &request) {
                Ok(response) => match response.get("text").and_then(Value::as_str) {
                    Some(text) => println!("{text}"),
                    None => println!(
                        "{}",
                        serde_json::to_string_pretty(&response).unwrap_or_default()
                    ),
                },
                Err(err) => {
                    eprintln!("hivectl: {err}");
                    std::process::exit(1);
                }
            }
            return;
        }
        ref other => {
            let request = daemon_request(other);
            match send_request(&home, "daemon.port", &request) {
                Ok(response) => {
                    println!("{}", serde_json::to_string_pretty(&response).unwrap_or_default());
                }
                Err(err) => {
                    eprintln!("hivectl: {err}");
                    std::process::exit(1);
                }
            }
        }
    }
}

fn daemon_request(command: &Command) -> Value {
    match command {
        Command::Ping => json!({ "type": "ping" }),
        Command::Status => json!({ "type": "status" }),
        Command::Stop => json!({ "type": "stop" }),
        Command::Task { title, id, agent_id } => {
            let id = id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let mut payload = json!({ "id": id, "title": title });
            if let Some(agent_id) = agent_id {
                payload["agent_id"] = json!(agent_id);
            }
            json!({ "type": "task", "payload": payload })
        }
        Command::TaskCancel { id } => json!({ "type": "task_cancel", "id": id }),
        Command::IntegrationsReload => json!({ "type": "integrations_reload" }),
        Command::Chat { .. } => unreachable!("handled before daemon_request is called"),
    }
}

fn read_port(home: &std::path::Path, port_file: &str) -> Result<u16, String> {
    let raw = std::fs::read_to_string(home.join(port_file)).map_err(|e| {
        format!("could not read {port_file} (is the daemon running?): {e}")
    })?;
    raw.trim()
        .parse()
        .map_err(|e| format!("{port_file} did not contain a valid port number: {e}"))
}

fn send_request(home: &std::path::Path, port_file: &str, request: &Value) -> Result<Value, String> {
    let port = read_port(home, port_file)?;
    let mut stream = TcpStream::connect(("127.0.0.1", port))
        .map_err(|e| format!("could not connect on port {port}: {e}"))?;
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .map_err(|e| e.to_string())?;

    let mut body = serde_json::to_string(request).map_err(|e| e.to_string())?;
    body.push('\n');
    stream.write_all(body.as_bytes()).map_err(|e| e.to_string())?;

    let mut response_raw = String::new();
    stream
        .read_to_string(&mut response_raw)
        .map_err(|e| format!("failed to read response: {e}"))?;

    serde_json::from_str(response_raw.trim_end()).map_err(|e| format!("invalid JSON response: {e}"))
}
