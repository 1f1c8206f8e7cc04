use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use anyhow::{bail, Context};
use clap::Parser;

use crate::engine::{EngineConfig, DEFAULT_BLOCKED_PAGE_URL};
use crate::stats::{normalize_tz_offset_minutes, tz_offset_from_minutes};

pub const DEFAULT_PORT: u16 = 17600;

#[derive(Parser, Debug)]
#[command(name = "focus_core", version)]
pub struct Args {
    /// Listen address.
    ///
    /// Accepts:
    /// - ip:port (recommended), e.g. 127.0.0.1:17600
    /// - ip (implies port 17600), e.g. 127.0.0.1
    /// - localhost or localhost:port
    #[arg(long, default_value = "127.0.0.1:17600")]
    pub listen: String,

    /// SQLite database path.
    #[arg(long, default_value = "./data/focus-core.db")]
    pub db: PathBuf,

    /// Offset from UTC (minutes) at which calendar days roll over, e.g. 480 for UTC+8.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub tz_offset_minutes: i32,

    /// Page that blocked navigations are redirected to.
    #[arg(long, default_value = DEFAULT_BLOCKED_PAGE_URL)]
    pub blocked_page_url: String,
}

impl Args {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            tz_offset: tz_offset_from_minutes(normalize_tz_offset_minutes(Some(
                self.tz_offset_minutes,
            ))),
            blocked_page_url: self.blocked_page_url.clone(),
        }
    }
}

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn listen_host(host: &str) -> Option<IpAddr> {
    if host == "localhost" {
        return Some(LOOPBACK);
    }
    host.parse().ok()
}

/// Resolves `--listen` to a socket address. A bare host (`ip` or
/// `localhost`) listens on [`DEFAULT_PORT`]; `::1:17600` is read as an
/// unbracketed IPv6 host plus port.
pub fn parse_listen(input: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Some(ip) = listen_host(input) {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    let Some((ip, port)) = input
        .rsplit_once(':')
        .and_then(|(host, port)| listen_host(host).map(|ip| (ip, port)))
    else {
        bail!("focus_core cannot listen on '{input}': expected ip, ip:port or localhost[:port]");
    };
    let port: u16 = port
        .parse()
        .with_context(|| format!("focus_core cannot listen on '{input}': port must be 0-65535"))?;
    Ok(SocketAddr::new(ip, port))
}
