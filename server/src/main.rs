use std::{net::SocketAddr, sync::Arc, time::Instant};

use anyhow::Result;
use axum::{routing::{get, post}, Json, Router, response::{IntoResponse, Response}};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use clap::Parser;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::{io::{AsyncBufReadExt, BufReader}, signal, task};
use tokio::sync::Mutex as AsyncMutex;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use persona_mcp_server::clock::SystemClock;
use persona_mcp_server::config::Config;
use persona_mcp_server::storage::{MemoryBackend, SledBackend, StateBackend};
use persona_mcp_server::tools::{self, ToolDescriptor};
use persona_mcp_server::{PersonaError, PersonaService};

const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Parser, Debug)]
#[command(name = "persona-mcp-server", version, about = "MCP server for assistant persona management")]
struct Cli {
	/// Bind address for the HTTP server (overrides HTTP_BIND / PORT; empty disables HTTP)
	#[arg(long)]
	bind: Option<String>,

	/// Data directory root
	#[arg(long, env = "DATA_DIR")]
	data_dir: Option<String>,

	/// Persona id used as the fallback default
	#[arg(long, env = "DEFAULT_PERSONA_ID")]
	default_persona: Option<String>,

	/// Serve MCP over stdio only
	#[arg(long)]
	no_http: bool,

	/// Keep all state in memory (nothing is written to disk)
	#[arg(long)]
	in_memory: bool,
}

struct AppState {
	start_time: Instant,
	service: AsyncMutex<PersonaService>,
}

#[derive(Serialize)]
struct Health { status: &'static str }

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
	uptime_ms: u128,
	personas: usize,
	active_persona_id: Option<String>,
	default_persona_id: String,
	active_blends: usize,
	tools: usize,
}

#[inline]
fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>, details: Option<serde_json::Value>) -> Response {
	let body = serde_json::json!({ "error": { "code": code, "message": message.into(), "details": details } });
	(status, Json(body)).into_response()
}

fn error_response(err: &PersonaError) -> Response {
	let status = match err {
		PersonaError::NotFound { .. } => StatusCode::NOT_FOUND,
		PersonaError::AlreadyExists { .. } => StatusCode::CONFLICT,
		PersonaError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
		PersonaError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
	};
	let details = match err {
		PersonaError::Internal { operation, .. } => Some(json!({ "operation": operation })),
		_ => None,
	};
	json_error(status, err.code(), err.to_string(), details)
}

#[tokio::main]
async fn main() -> Result<()> {
	init_tracing();
	let env_cfg = Config::load().unwrap_or_else(|err| {
		warn!(%err, "invalid environment configuration, using defaults");
		Config::default()
	});
	let cli = Cli::parse();

	let data_dir = cli.data_dir.clone().unwrap_or_else(|| env_cfg.data_dir.clone());
	let default_persona = cli.default_persona.clone().unwrap_or_else(|| env_cfg.default_persona_id.clone());
	let http_enabled = !cli.no_http && cli.bind.as_deref() != Some("");
	let bind_addr: SocketAddr = match cli.bind.as_deref() {
		Some(b) if !b.is_empty() => b.parse()?,
		_ => env_cfg.bind,
	};

	let backend: Arc<dyn StateBackend> = if cli.in_memory {
		info!("Using in-memory state");
		Arc::new(MemoryBackend::new())
	} else {
		info!(%data_dir, "Opening persona storage");
		Arc::new(SledBackend::open(&data_dir)?)
	};
	let service = PersonaService::new(backend, Arc::new(SystemClock), &default_persona);
	let state = Arc::new(AppState { start_time: Instant::now(), service: AsyncMutex::new(service) });

	let mut tasks = Vec::new();

	if http_enabled {
		let http_state = state.clone();
		info!(%bind_addr, "Starting HTTP server");
		let listener = tokio::net::TcpListener::bind(bind_addr).await?;
		let http_task = task::spawn(async move {
			let app = build_router(http_state);
			if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
				error!(%err, "HTTP server error");
			}
		});
		tasks.push(http_task);
	}

	let stdio_state = state.clone();
	let mut stdio_task = task::spawn(async move { run_stdio(stdio_state).await; });

	// Without HTTP there is nothing left to serve once the client closes stdin.
	if http_enabled {
		signal::ctrl_c().await?;
		info!("Shutdown signal received");
	} else {
		tokio::select! {
			res = signal::ctrl_c() => { res?; info!("Shutdown signal received"); }
			_ = &mut stdio_task => info!("stdin closed, exiting"),
		}
	}
	stdio_task.abort();
	for t in tasks { t.abort(); }
	Ok(())
}

fn init_tracing() {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	// stdout carries JSON-RPC, so logs go to stderr
	let fmt_layer = fmt::layer().with_target(false).with_ansi(false).with_writer(std::io::stderr);
	tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
}

fn build_router(state: Arc<AppState>) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/status", get(status))
		.route("/tools", get(list_tools_route))
		.route("/tools/:name", post(call_tool_route))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

async fn health() -> Json<Health> { Json(Health { status: "ok" }) }

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
	let service = state.service.lock().await;
	let store = service.store();
	Json(StatusResponse {
		uptime_ms: state.start_time.elapsed().as_millis(),
		personas: store.len(),
		active_persona_id: store.active_id_raw().map(str::to_string),
		default_persona_id: store.default_id().to_string(),
		active_blends: service.active_blend_count(),
		tools: tools::list_tools().len(),
	})
}

async fn list_tools_route() -> Json<Vec<ToolDescriptor>> { Json(tools::list_tools()) }

async fn call_tool_route(State(state): State<Arc<AppState>>, Path(name): Path<String>, body: Bytes) -> Response {
	let args: JsonValue = if body.iter().all(u8::is_ascii_whitespace) {
		JsonValue::Null
	} else {
		match serde_json::from_slice(&body) {
			Ok(v) => v,
			Err(e) => return json_error(StatusCode::BAD_REQUEST, "INVALID_REQUEST", format!("malformed JSON body: {}", e), None),
		}
	};
	let mut service = state.service.lock().await;
	match tools::call_tool(&mut *service, &name, args) {
		Ok(out) => (StatusCode::OK, Json(out.into_json())).into_response(),
		Err(err) => error_response(&err),
	}
}

fn rpc_result(id: JsonValue, result: JsonValue) -> JsonValue {
	json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: JsonValue, code: i64, message: impl Into<String>, data: Option<JsonValue>) -> JsonValue {
	let mut err = json!({ "code": code, "message": message.into() });
	if let Some(d) = data { err["data"] = d; }
	json!({ "jsonrpc": "2.0", "id": id, "error": err })
}

/// Handles one newline-delimited JSON-RPC message. Notifications (no id)
/// produce no response.
async fn handle_rpc(state: &AppState, line: &str) -> Option<JsonValue> {
	let line = line.trim();
	if line.is_empty() { return None; }
	let v: JsonValue = match serde_json::from_str(line) {
		Ok(x) => x,
		Err(e) => return Some(rpc_error(JsonValue::Null, -32700, format!("Parse error: {}", e), None)),
	};
	let id = match v.get("id") {
		Some(id) if !id.is_null() => id.clone(),
		_ => return None,
	};
	let method = v.get("method").and_then(|m| m.as_str()).unwrap_or("");
	let params = v.get("params").cloned().unwrap_or_else(|| json!({}));

	match method {
		"initialize" => Some(rpc_result(id, json!({
			"serverInfo": { "name": "persona-mcp", "version": env!("CARGO_PKG_VERSION") },
			"protocolVersion": PROTOCOL_VERSION,
			"capabilities": { "tools": { "listChanged": false } },
			"instructions": "Persona manager: switch, edit, blend and get suggestions for assistant personas."
		}))),
		"ping" => Some(rpc_result(id, json!({}))),
		"tools/list" => {
			let tools = tools::list_tools().into_iter().map(|t| json!({
				"name": t.name,
				"description": t.description,
				"inputSchema": t.input_schema,
			})).collect::<Vec<_>>();
			Some(rpc_result(id, json!({ "tools": tools })))
		}
		"tools/call" => {
			let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
			let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
			let mut service = state.service.lock().await;
			match tools::call_tool(&mut *service, name, arguments) {
				Ok(out) => Some(rpc_result(id, json!({ "content": [ { "type": "text", "text": out.into_text() } ] }))),
				Err(err) => {
					warn!(tool = %name, %err, "tool call failed");
					Some(rpc_error(id, err.rpc_code(), err.to_string(), Some(json!({ "code": err.code() }))))
				}
			}
		}
		_ => Some(rpc_error(id, -32601, format!("Unknown method: {}", method), None)),
	}
}

async fn run_stdio(state: Arc<AppState>) {
	let stdin = tokio::io::stdin();
	let mut reader = BufReader::new(stdin).lines();
	while let Ok(Some(line)) = reader.next_line().await {
		if let Some(out) = handle_rpc(&state, &line).await {
			println!("{}", out);
		}
	}
}

async fn shutdown_signal() {
	let _ = signal::ctrl_c().await;
}
