//! Router Simulator
//!
//! Serves the handful of web UI pages router-watchdog talks to, so the
//! watchdog can be exercised without a hotspot on the desk.
//!
//! Usage: cargo run --features sim --bin router-sim -- [--bind 127.0.0.1:8080]
//!        [--password admin] [--fail-login] [--start-disconnected]
//!
//! Then point `device.address` at the bind address.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use clap::Parser;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::time::{sleep, Duration};

/// How long the simulated radio takes to come back after autoconnect is re-enabled
const REASSOCIATE_DELAY: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "router-sim")]
#[command(about = "Fake cellular hotspot web UI for router-watchdog")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
    /// Admin password the fake router accepts
    #[arg(long, default_value = "admin")]
    password: String,
    /// Reject every login
    #[arg(long)]
    fail_login: bool,
    /// Start with the WAN link down
    #[arg(long)]
    start_disconnected: bool,
}

struct Sim {
    password: String,
    fail_login: bool,
    token: String,
    next_session: u64,
    authenticated: bool,
    connection: &'static str,
    autoconnect: String,
}

type Shared = Arc<Mutex<Sim>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let token = format!("{:x}", chrono::Utc::now().timestamp_millis());
    let sim = Sim {
        password: cli.password,
        fail_login: cli.fail_login,
        token,
        next_session: 1,
        authenticated: false,
        connection: if cli.start_disconnected {
            "Disconnected"
        } else {
            "Connected"
        },
        autoconnect: "HomeNetwork".to_string(),
    };

    println!("📶 router-watchdog Router Simulator");
    println!("  Listening: http://{}", cli.bind);
    println!("  WAN: {}", sim.connection);
    if sim.fail_login {
        println!("  Logins: always rejected");
    }
    println!();

    let app = Router::new()
        .route("/sess_cd_tmp", get(session))
        .route("/api/model.json", get(model))
        .route("/Forms/config", post(config))
        .route("/index.html", get(|| async { "<html><body>MR1100</body></html>" }))
        .route("/success.json", get(|| async { Json(json!({ "result": "ok" })) }))
        .route("/error.json", get(|| async { Json(json!({ "result": "error" })) }))
        .with_state(Arc::new(Mutex::new(sim)));

    let listener = TcpListener::bind(&cli.bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn session(State(sim): State<Shared>) -> Response {
    let mut sim = lock(&sim);
    let id = sim.next_session;
    sim.next_session += 1;
    sim.authenticated = false;
    println!("🍪 New session {}", id);

    (
        [(header::SET_COOKIE, format!("sessionId={}; Path=/", id))],
        "",
    )
        .into_response()
}

async fn model(State(sim): State<Shared>) -> Json<serde_json::Value> {
    let sim = lock(&sim);
    let role = if sim.authenticated { "Admin" } else { "Guest" };
    Json(json!({
        "general": { "model": "MR1100", "manufacturer": "Netgear" },
        "session": { "secToken": sim.token, "userRole": role },
        "wwan": {
            "connection": sim.connection,
            "autoconnect": sim.autoconnect,
            "signalStrength": { "bars": 4 }
        },
        "sim": { "status": "Ready" }
    }))
}

async fn config(State(shared): State<Shared>, Form(form): Form<HashMap<String, String>>) -> Redirect {
    let field = |name: &str| form.get(name).map(String::as_str).unwrap_or_default();
    let ok = field("ok_redirect").to_string();
    let err = field("err_redirect").to_string();

    let mut sim = lock(&shared);
    if field("token") != sim.token {
        println!("⛔ Form with bad token");
        return Redirect::to(&err);
    }

    if let Some(password) = form.get("session.password") {
        if sim.fail_login || *password != sim.password {
            println!("❌ Login rejected");
            return Redirect::to(&err);
        }
        sim.authenticated = true;
        println!("✅ Login ok");
        return Redirect::to(&ok);
    }

    if let Some(mode) = form.get("wwan.autoconnect") {
        if !sim.authenticated {
            println!("⛔ Setting change without login");
            return Redirect::to(&err);
        }
        println!("🔧 wwan.autoconnect = {}", mode);
        sim.autoconnect = mode.clone();
        match mode.as_str() {
            "Never" => sim.connection = "Disconnected",
            "HomeNetwork" => {
                sim.connection = "Connecting";
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    sleep(REASSOCIATE_DELAY).await;
                    let mut sim = lock(&shared);
                    if sim.autoconnect == "HomeNetwork" {
                        sim.connection = "Connected";
                        println!("📡 WAN connected");
                    }
                });
            }
            _ => return Redirect::to(&err),
        }
        return Redirect::to(&ok);
    }

    Redirect::to(&err)
}

fn lock(sim: &Shared) -> std::sync::MutexGuard<'_, Sim> {
    sim.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
