// Hive Daemon Entrypoint
//
// Thin binary wrapper around `hive::daemon::Runtime` (§4.K). All the actual
// boot/shutdown logic lives in the library so `hivectl`/tests can reach it
// too; this binary only resolves the home directory, wires up logging, and
// translates the runtime's exit code into a process exit — mirroring the
// teacher's `lib.rs` `run()` / `main.rs` split.

use hive::daemon::Runtime;
use log::LevelFilter;

#[tokio::main]
async fn main() {
    let home = match Runtime::resolve_home() {
        Ok(home) => home,
        Err(err) => {
            eprintln!("hived: {err}");
            std::process::exit(1);
        }
    };

    let log_level = std::env::var("HIVE_LOG_LEVEL")
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    let echo_stderr = std::env::var("HIVE_FOREGROUND").is_ok();
    if let Err(err) = hive::logging::init(home.join("daemon.log"), echo_stderr, log_level) {
        eprintln!("hived: failed to initialize logging: {err}");
    }

    let runtime = match Runtime::boot(home).await {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!(target: "daemon", "boot failed: {err}");
            std::process::exit(1);
        }
    };

    let exit_code = runtime.run().await;
    std::process::exit(exit_code);
}
