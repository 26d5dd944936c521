#![forbid(unsafe_code)]

pub mod endpoint {
	use std::fmt;
	use std::net::SocketAddr;

	/// WebSocket scheme of an endpoint.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub enum Scheme {
		Ws,
		Wss,
	}

	impl Scheme {
		pub const fn as_str(self) -> &'static str {
			match self {
				Scheme::Ws => "ws",
				Scheme::Wss => "wss",
			}
		}
	}

	/// Parsed `ws://host:port` (or `wss://host:port`) endpoint.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct WsEndpoint {
		pub scheme: Scheme,
		pub host: String,
		pub port: u16,
	}

	impl WsEndpoint {
		/// Returns `host:port` (IPv6 stays bracketed).
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		/// Full URL suitable for a WebSocket client.
		pub fn url(&self) -> String {
			format!("{}://{}/", self.scheme.as_str(), self.hostport())
		}

		/// Convert to `SocketAddr` only if the host is an IP literal.
		pub fn to_socket_addr_if_ip_literal(&self) -> Result<SocketAddr, String> {
			self.hostport()
				.parse()
				.map_err(|_| format!("host must be an IP literal (DNS names not supported here): {}", self.host))
		}

		/// Parse `ws://host:port` or `wss://host:port`.
		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err("endpoint must be non-empty (expected ws://host:port)".to_string());
			}

			let (scheme, rest) = if let Some(rest) = s.strip_prefix("ws://") {
				(Scheme::Ws, rest)
			} else if let Some(rest) = s.strip_prefix("wss://") {
				(Scheme::Wss, rest)
			} else {
				return Err(format!("invalid endpoint (expected ws://host:port or wss://host:port): {s}"));
			};

			let rest = rest.strip_suffix('/').unwrap_or(rest);
			if rest.contains('/') || rest.contains('?') || rest.contains('#') {
				return Err(format!("invalid endpoint (path/query/fragment not supported): {s}"));
			}

			let (host, port_str) = rest
				.rsplit_once(':')
				.ok_or_else(|| format!("invalid endpoint (missing :port): {s}"))?;

			let host = host.trim();
			if host.is_empty() {
				return Err(format!("invalid endpoint host: {s}"));
			}

			if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
				return Err(format!("invalid endpoint host (IPv6 must be bracketed like ws://[::1]:18300): {s}"));
			}

			let port: u16 = port_str
				.trim()
				.parse()
				.ok()
				.filter(|p| *p != 0)
				.ok_or_else(|| format!("invalid endpoint port (expected 1..=65535): {s}"))?;

			Ok(Self {
				scheme,
				host: host.to_string(),
				port,
			})
		}
	}

	impl fmt::Display for WsEndpoint {
		fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			write!(f, "{}://{}", self.scheme.as_str(), self.hostport())
		}
	}

}
