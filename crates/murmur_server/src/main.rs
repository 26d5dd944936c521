#![forbid(unsafe_code)]

mod config;
mod server;
mod util;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context as _;
use murmur_util::endpoint::{Scheme, WsEndpoint};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::server::connection::{ConnectionSettings, serve};
use crate::server::context::ServerContext;
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::hub::HubConfig;
use crate::server::import::import_legacy;
use crate::server::store::open_store;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: murmur_server [--bind ws://host:port] [--import DIR]\n\
\n\
Options:\n\
\t--bind    Bind endpoint (default: ws://127.0.0.1:18300)\n\
\t         Format: ws://host:port\n\
\t--import  Import users.db/groups.db/messages.db from DIR into the store, then exit\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

struct Args {
	bind: SocketAddr,
	import_dir: Option<PathBuf>,
}

fn parse_args() -> Args {
	let mut bind_endpoint = "ws://127.0.0.1:18300".to_string();
	let mut import_dir = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected ws://host:port)");
					usage_and_exit();
				}
				bind_endpoint = v;
			}
			"--import" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				import_dir = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let bind = WsEndpoint::parse(&bind_endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});
	if bind.scheme == Scheme::Wss {
		eprintln!("the server listens on plain ws://; terminate TLS in front of it");
		usage_and_exit();
	}

	let bind = bind.to_socket_addr_if_ip_literal().unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	Args { bind, import_dir }
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,murmur_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("murmur_server");
				global::set_tracer_provider(tracer_provider);

				base.with(tracing_opentelemetry::layer().with_tracer(tracer)).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = crate::config::default_config_path()?;
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	let store = open_store(server_cfg.persistence.database_url.as_deref())
		.await
		.context("open store")?;

	if let Some(dir) = args.import_dir {
		let report = import_legacy(store.as_ref(), &dir).await?;
		info!(
			users = report.users,
			groups = report.groups,
			messages = report.messages,
			skipped = report.skipped,
			"import finished"
		);
		return Ok(());
	}

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let ctx = ServerContext::new(
		store,
		HubConfig {
			max_frame_bytes: server_cfg.server.max_frame_bytes,
		},
	);
	let settings = ConnectionSettings {
		allowed_origins: server_cfg.server.allowed_origins.clone(),
		outbound_queue_capacity: server_cfg.server.outbound_queue_capacity,
		max_frame_bytes: server_cfg.server.max_frame_bytes,
	};

	let listener = TcpListener::bind(args.bind)
		.await
		.with_context(|| format!("bind {}", args.bind))?;
	info!(bind = %args.bind, origins = settings.allowed_origins.len(), "murmur_server: listening");

	health_state.mark_ready();

	tokio::select! {
		res = serve(listener, ctx, settings) => res,
		() = shutdown_signal() => {
			info!("murmur_server: shutdown signal received; stopping");
			Ok(())
		}
	}
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			warn!(error = %e, "failed to listen for ctrl-c");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut sig) => {
				sig.recv().await;
			}
			Err(e) => {
				warn!(error = %e, "failed to listen for SIGTERM");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {}
		() = terminate => {}
	}
}
