// Hive Daemon IPC
//
// Loopback TCP, one request per connection, newline-terminated JSON in and
// out (§6). No teacher analogue — the teacher's IPC is Tauri's in-process
// command bridge — so this is authored fresh against spec §6's wire table,
// using the same `tokio::net::TcpListener` + per-connection task shape the
// teacher reaches for in its websocket-backed channel adapters.

use super::Runtime;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Accept connections until a `stop` command (or the stop sentinel via the
/// heartbeat loop) requests shutdown. Returns the process exit code.
pub async fn serve(runtime: Arc<Runtime>, listener: TcpListener) -> i32 {
    loop {
        if runtime.is_shutting_down() {
            return 0;
        }

        let accepted = tokio::time::timeout(
            std::time::Duration::from_millis(250),
            listener.accept(),
        )
        .await;

        let (stream, _addr) = match accepted {
            Ok(Ok(pair)) => pair,
            Ok(Err(_)) => continue,
            Err(_) => continue, // timed out; loop back to re-check shutdown
        };

        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(&runtime, stream).await {
                log::warn!(target: "daemon", "ipc connection error: {err}");
            }
        });

        if runtime.is_shutting_down() {
            return 0;
        }
    }
}

async fn handle_connection(
    runtime: &Arc<Runtime>,
    stream: tokio::net::TcpStream,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;
    if bytes_read == 0 {
        return Ok(());
    }

    let response = match serde_json::from_str::<Value>(line.trim_end()) {
        Ok(request) => dispatch(runtime, request).await,
        Err(_) => json!({ "error": "Invalid JSON" }),
    };

    let mut body = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
    body.push('\n');
    write_half.write_all(body.as_bytes()).await?;
    write_half.flush().await
}

async fn dispatch(runtime: &Arc<Runtime>, request: Value) -> Value {
    let Some(command_type) = request.get("type").and_then(Value::as_str) else {
        return json!({ "error": "Invalid JSON" });
    };

    match command_type {
        "ping" => json!({
            "pong": true,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }),
        "status" => status_response(runtime),
        "stop" => {
            runtime.request_shutdown();
            json!({ "acknowledged": true })
        }
        "task" => task_response(runtime, request.get("payload")),
        "task_cancel" => task_cancel_response(runtime, request.get("id").and_then(Value::as_str)),
        "integrations_reload" => {
            runtime.reload_integrations();
            json!({ "ok": true })
        }
        other => json!({ "error": format!("Unknown command type: {other}") }),
    }
}

fn status_response(runtime: &Arc<Runtime>) -> Value {
    let agent = runtime.store.primary_agent().ok().flatten();
    let provider = runtime.provider.read();
    let episodes = agent
        .as_ref()
        .and_then(|a| runtime.store.count_episodes(&a.id).ok())
        .unwrap_or(0);
    let conversations = runtime.store.count_conversations().unwrap_or(0);

    let mut integrations = serde_json::Map::new();
    for (platform, status) in runtime.adapter_status.read().iter() {
        integrations.insert(platform.clone(), json!(status));
    }

    json!({
        "pid": std::process::id(),
        "uptime": format!("{}s", runtime.uptime_seconds()),
        "uptimeSeconds": runtime.uptime_seconds(),
        "agent": agent.as_ref().map(|a| &a.name),
        "provider": provider.kind(),
        "model": provider.default_model(),
        "memoryStats": {
            "episodes": episodes,
            "conversations": conversations,
        },
        "ctxEnabled": runtime.long_term_memory.is_some(),
        "taskWorker": {
            "activeTaskId": runtime.task_worker.active_task_id(),
        },
        "integrations": integrations,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

fn task_response(runtime: &Arc<Runtime>, payload: Option<&Value>) -> Value {
    let Some(payload) = payload else {
        return json!({ "accepted": false, "error": "missing payload" });
    };
    let Some(id) = payload.get("id").and_then(Value::as_str) else {
        return json!({ "accepted": false, "error": "missing payload.id" });
    };
    let Some(title) = payload.get("title").and_then(Value::as_str) else {
        return json!({ "accepted": false, "error": "missing payload.title" });
    };
    let agent_id = payload.get("agent_id").and_then(Value::as_str);

    match runtime.task_worker.enqueue(id, title, agent_id) {
        Ok(task) => json!({ "accepted": true, "id": task.id }),
        Err(err) => json!({ "accepted": false, "error": err.to_string() }),
    }
}

fn task_cancel_response(runtime: &Arc<Runtime>, id: Option<&str>) -> Value {
    let Some(id) = id else {
        return json!({ "ok": false, "error": "missing id" });
    };
    match runtime.task_worker.request_cancel(id) {
        Ok(()) => json!({ "ok": true }),
        Err(err) => json!({ "ok": false, "error": err.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn ping_returns_pong_true() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::boot(dir.path().join("home")).await.unwrap();
        let response = dispatch(&runtime, json!({"type": "ping"})).await;
        assert_eq!(response["pong"], json!(true));
    }

    #[tokio::test]
    async fn unknown_command_type_reports_the_type() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::boot(dir.path().join("home")).await.unwrap();
        let response = dispatch(&runtime, json!({"type": "bogus"})).await;
        assert_eq!(response["error"], json!("Unknown command type: bogus"));
    }

    #[tokio::test]
    async fn task_without_payload_is_not_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::boot(dir.path().join("home")).await.unwrap();
        let response = dispatch(&runtime, json!({"type": "task"})).await;
        assert_eq!(response["accepted"], json!(false));
    }

    #[tokio::test]
    async fn task_then_cancel_round_trips_through_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::boot(dir.path().join("home")).await.unwrap();
        let response = dispatch(
            &runtime,
            json!({"type": "task", "payload": {"id": "t-000001", "title": "echo hello"}}),
        )
        .await;
        assert_eq!(response["accepted"], json!(true));

        let cancel = dispatch(&runtime, json!({"type": "task_cancel", "id": "t-000001"})).await;
        assert_eq!(cancel["ok"], json!(true));
    }

    #[tokio::test]
    async fn stop_sets_shutdown_flag() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::boot(dir.path().join("home")).await.unwrap();
        assert!(!runtime.is_shutting_down());
        let response = dispatch(&runtime, json!({"type": "stop"})).await;
        assert_eq!(response["acknowledged"], json!(true));
        assert!(runtime.is_shutting_down());
    }
}
