#![forbid(unsafe_code)]

use anyhow::Context as _;
use murmur_client_core::{ChatState, ClientConfig, ClientRequest, DEFAULT_ENDPOINT, ResilientSocket, ServerEvent};
use murmur_domain::{Group, Message, Recipient, UserId, UserPresence};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{info, warn};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: murmur_client --name NAME [--connect ws://host:port] [--json]\n\
\n\
Options:\n\
\t--connect  Server endpoint (default: {DEFAULT_ENDPOINT})\n\
\t--name     Display name to claim\n\
\t--json     Print events as JSON lines\n\
\t--help     Show this help\n\
\n\
Input lines:\n\
\tuser:<id> TEXT    send a direct message\n\
\tgroup:<id> TEXT   send a group message\n\
\t/fetch user:<id>  load a conversation\n\
"
	);
	std::process::exit(2)
}

struct Args {
	config: ClientConfig,
	name: String,
	json: bool,
}

fn parse_args() -> Args {
	let mut endpoint = DEFAULT_ENDPOINT.to_string();
	let mut name = None;
	let mut json = false;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--connect" => endpoint = it.next().unwrap_or_else(|| usage_and_exit()),
			"--name" => name = Some(it.next().unwrap_or_else(|| usage_and_exit())),
			"--json" => json = true,
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let config = ClientConfig::from_ws_endpoint(&endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});
	let name = name.unwrap_or_else(|| usage_and_exit());
	Args { config, name, json }
}

/// Parse one input line into a request.
fn parse_line(line: &str) -> Result<Option<ClientRequest>, String> {
	let line = line.trim();
	if line.is_empty() {
		return Ok(None);
	}
	if let Some(rest) = line.strip_prefix("/fetch ") {
		let recipient: Recipient = rest.parse().map_err(|e| format!("{e}"))?;
		return Ok(Some(ClientRequest::FetchConversation { recipient }));
	}
	let (target, body) = line
		.split_once(char::is_whitespace)
		.ok_or_else(|| "expected `user:<id> TEXT` or `group:<id> TEXT`".to_string())?;
	let recipient: Recipient = target.parse().map_err(|e| format!("{e}"))?;
	Ok(Some(ClientRequest::SendMessage {
		body: body.trim().to_string(),
		recipient,
	}))
}

fn render(state: &ChatState, event: &ServerEvent) -> Option<String> {
	match event {
		ServerEvent::Error { kind, message, .. } => Some(format!("! {kind}: {message}")),
		ServerEvent::Welcome { user_id, users, groups } => Some(format!(
			"* signed in as {user_id} ({} users, {} groups)",
			users.len(),
			groups.len()
		)),
		ServerEvent::UserAdded(p) => Some(format!("* new user {} ({})", p.user.name, p.user.id)),
		ServerEvent::UserOnline(id) | ServerEvent::UserOffline(id) => {
			let name = state.users.get(id).map(|p| p.user.name.as_str()).unwrap_or("?");
			let verb = if matches!(event, ServerEvent::UserOnline(_)) { "online" } else { "offline" };
			Some(format!("* {name} is {verb}"))
		}
		ServerEvent::Conversation { recipient, messages } => {
			let mut out = format!("-- {recipient} ({} messages)", messages.len());
			for m in messages {
				out.push_str(&format!("\n[{}] {}: {}", m.id, m.sender, m.body));
			}
			Some(out)
		}
		ServerEvent::MessageSent(m) => Some(format!("[{}] {} -> {}: {}", m.id, m.sender, m.recipient, m.body)),
		ServerEvent::GroupAdded(g) => Some(format!("* joined group {} ({})", g.name, g.id)),
		ServerEvent::GroupDeleted(id) => Some(format!("* group {id} is gone")),
		_ => None,
	}
}

/// Machine-readable form of the events a script cares about.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JsonLine<'a> {
	Error {
		code: &'static str,
		message: &'a str,
	},
	Welcome {
		user_id: UserId,
		users: &'a [UserPresence],
		groups: &'a [Group],
	},
	Presence {
		user_id: UserId,
		online: bool,
	},
	Conversation {
		recipient: Recipient,
		messages: &'a [Message],
	},
	Message {
		message: &'a Message,
	},
	Group {
		group: &'a Group,
	},
}

fn render_json(event: &ServerEvent) -> Option<String> {
	let line = match event {
		ServerEvent::Error { kind, message, .. } => JsonLine::Error {
			code: kind.as_str(),
			message,
		},
		ServerEvent::Welcome { user_id, users, groups } => JsonLine::Welcome {
			user_id: *user_id,
			users,
			groups,
		},
		ServerEvent::UserOnline(id) => JsonLine::Presence {
			user_id: *id,
			online: true,
		},
		ServerEvent::UserOffline(id) => JsonLine::Presence {
			user_id: *id,
			online: false,
		},
		ServerEvent::Conversation { recipient, messages } => JsonLine::Conversation {
			recipient: *recipient,
			messages,
		},
		ServerEvent::MessageSent(message) => JsonLine::Message { message },
		ServerEvent::GroupAdded(group) | ServerEvent::GroupEdited(group) => JsonLine::Group { group },
		_ => return None,
	};
	match serde_json::to_string(&line) {
		Ok(s) => Some(s),
		Err(e) => {
			warn!(error = %e, "failed to serialize event");
			None
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn,murmur_client=info,murmur_client_core=info".into()),
		)
		.with_target(false)
		.init();

	let args = parse_args();
	info!(url = %args.config.url, name = %args.name, "starting client");

	let socket = ResilientSocket::websocket(args.config);
	let mut events = socket.subscribe_all();
	socket
		.claim_identity(args.name.clone())
		.await
		.context("claim identity")?;

	let json = args.json;
	let printer = tokio::spawn(async move {
		let mut state = ChatState::new();
		while let Some(event) = events.recv().await {
			state.apply(&event);
			let line = if json { render_json(&event) } else { render(&state, &event) };
			if let Some(line) = line {
				println!("{line}");
			}
		}
	});

	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	while let Some(line) = lines.next_line().await.context("read stdin")? {
		match parse_line(&line) {
			Ok(Some(request)) => {
				if let Err(e) = socket.send(request).await {
					warn!(error = %e, "send failed");
				}
			}
			Ok(None) => {}
			Err(e) => eprintln!("{e}"),
		}
	}

	socket.shutdown().await;
	printer.abort();
	Ok(())
}
