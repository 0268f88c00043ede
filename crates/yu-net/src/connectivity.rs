//! Connectivity checks: resolver, ping, DNS, TCP and HTTP

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};
use yu_exec::Executor;

use crate::error::NetError;

/// Upper bound for a single `dig` or `ping` run
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

fn default_resolv_conf() -> PathBuf {
    PathBuf::from("/etc/resolv.conf")
}

fn default_external_ip() -> SocketAddr {
    SocketAddr::from(([8, 8, 8, 8], 53))
}

fn default_connect_timeout_secs() -> u64 {
    3
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_probe_hostname() -> String {
    "google.com".to_string()
}

fn default_probe_url() -> String {
    "http://www.google.com".to_string()
}

/// Probe targets and limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    #[serde(default = "default_resolv_conf")]
    pub resolv_conf: PathBuf,

    /// Address for the raw TCP reachability check
    #[serde(default = "default_external_ip")]
    pub external_ip: SocketAddr,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Name looked up when testing a DNS server
    #[serde(default = "default_probe_hostname")]
    pub probe_hostname: String,

    #[serde(default = "default_probe_url")]
    pub probe_url: String,

    /// Proxy for HTTP probes, `host:port` or a URL
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            resolv_conf: default_resolv_conf(),
            external_ip: default_external_ip(),
            connect_timeout_secs: default_connect_timeout_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            probe_hostname: default_probe_hostname(),
            probe_url: default_probe_url(),
            proxy: None,
        }
    }
}

/// Result of [`ConnectivityChecker::check_connectivity`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityStatus {
    pub resolv_conf: PathBuf,
    pub can_access_external_ip: bool,
    pub dns_list: Vec<String>,
    /// First configured server that answers ping and resolves the configured hostname
    pub working_dns: Option<String>,
    pub can_name_resolve_address: bool,
    pub can_access_external_url: bool,
    pub proxy_used: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "DNS servers configured in {}:",
            self.resolv_conf.display()
        )?;
        for dns in &self.dns_list {
            writeln!(f, " {dns}")?;
        }

        match &self.working_dns {
            Some(dns) => writeln!(f, "The DNS that will be used for name resolution is {dns}\n")?,
            None => writeln!(f, "No working DNS found\n")?,
        }

        if self.can_access_external_ip {
            writeln!(f, "Can access external IP addresses")?;
        } else {
            writeln!(f, "Can't access external IP addresses")?;
        }

        if self.can_access_external_url {
            writeln!(f, "Can access external URLs")?;
        } else {
            writeln!(f, "Can't access external URLs")?;
        }

        if let Some(proxy) = &self.proxy_used {
            writeln!(f, "Proxy used: {proxy}")?;
        }
        Ok(())
    }
}

/// Runs reachability probes from the local machine
pub struct ConnectivityChecker {
    executor: Arc<dyn Executor>,
    http: reqwest::Client,
    config: ConnectivityConfig,
}

impl ConnectivityChecker {
    /// Build a checker; the configured proxy, if any, applies to every HTTP request
    ///
    /// # Errors
    /// `InvalidProxy` when the proxy cannot be parsed
    pub fn new(executor: Arc<dyn Executor>, config: ConnectivityConfig) -> Result<Self, NetError> {
        let http = build_client(config.proxy.as_deref(), config.http_timeout())?;
        Ok(Self {
            executor,
            http,
            config,
        })
    }

    pub fn config(&self) -> &ConnectivityConfig {
        &self.config
    }

    /// `nameserver` entries of the resolver file, in order
    ///
    /// # Errors
    /// `ResolverConfig` when the file cannot be read
    pub async fn get_configured_dns_servers(&self) -> Result<Vec<String>, NetError> {
        let path = &self.config.resolv_conf;
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| NetError::ResolverConfig {
                    path: path.display().to_string(),
                    source,
                })?;
        Ok(parse_nameservers(&contents))
    }

    /// Whether the system resolver answers for `address`
    pub async fn can_name_resolve_address(&self, address: &str) -> bool {
        self.probe("dig", &["+time=3", "+retry=2", address]).await
    }

    /// Whether `server` answers a lookup for `address`
    pub async fn can_name_resolve_address_with(&self, server: &str, address: &str) -> bool {
        let at_server = format!("@{server}");
        self.probe("dig", &[at_server.as_str(), "+time=3", "+retry=2", address])
            .await
    }

    pub async fn can_name_resolve_external_address(&self) -> bool {
        self.can_name_resolve_address(&self.config.probe_hostname)
            .await
    }

    pub async fn check_ping(&self, host: &str) -> bool {
        self.probe("ping", &[host, "-i", "0.5", "-c", "5", "-w", "5"])
            .await
    }

    /// Ping each host in turn
    pub async fn check_ping_list<S: AsRef<str>>(&self, hosts: &[S]) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        for host in hosts {
            let host = host.as_ref();
            results.insert(host.to_string(), self.check_ping(host).await);
        }
        results
    }

    /// HTTP GET `url`; any transport error or non-2xx status is `false`
    ///
    /// An explicit `proxy` overrides the configured one for this request.
    #[instrument(skip(self))]
    pub async fn can_access_web_address(&self, url: &str, proxy: Option<&str>) -> bool {
        let client = match proxy {
            Some(proxy) => match build_client(Some(proxy), self.config.http_timeout()) {
                Ok(client) => client,
                Err(e) => {
                    warn!(error = %e, "cannot use proxy");
                    return false;
                }
            },
            None => self.http.clone(),
        };

        match client.get(url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(url = %url, status = %response.status(), "web address returned error status");
                false
            }
            Err(e) => {
                debug!(url = %url, error = %e, "web address unreachable");
                false
            }
        }
    }

    /// TCP connect to the configured external address within the connect timeout
    pub async fn can_reach_external_ip(&self) -> bool {
        let addr = self.config.external_ip;
        match tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(addr = %addr, error = %e, "external IP unreachable");
                false
            }
            Err(_) => {
                debug!(addr = %addr, "external IP connect timed out");
                false
            }
        }
    }

    /// Run every check and collect the report
    ///
    /// The URL is fetched whether or not a DNS server answered.
    ///
    /// # Errors
    /// `ResolverConfig` when the resolver file exists but cannot be read
    #[instrument(skip(self))]
    pub async fn check_connectivity(&self) -> Result<ConnectivityStatus, NetError> {
        let can_access_external_ip = self.can_reach_external_ip().await;

        let dns_list = match self.get_configured_dns_servers().await {
            Ok(list) => list,
            Err(NetError::ResolverConfig { source, path })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                warn!(path = %path, "resolver configuration not found");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut working_dns = None;
        for dns in &dns_list {
            if !self.check_ping(dns).await {
                debug!(dns = %dns, "DNS server does not answer ping");
                continue;
            }
            if self
                .can_name_resolve_address_with(dns, &self.config.probe_hostname)
                .await
            {
                working_dns = Some(dns.clone());
                break;
            }
        }

        let can_access_external_url = self
            .can_access_web_address(&self.config.probe_url, None)
            .await;

        let status = ConnectivityStatus {
            resolv_conf: self.config.resolv_conf.clone(),
            can_access_external_ip,
            can_name_resolve_address: working_dns.is_some(),
            working_dns,
            dns_list,
            can_access_external_url,
            proxy_used: self.config.proxy.clone(),
            checked_at: Utc::now(),
        };

        info!(
            external_ip = status.can_access_external_ip,
            working_dns = ?status.working_dns,
            external_url = status.can_access_external_url,
            "connectivity check completed"
        );
        Ok(status)
    }

    async fn probe(&self, program: &str, args: &[&str]) -> bool {
        match self
            .executor
            .run_with_timeout(program, args, PROBE_TIMEOUT)
            .await
        {
            Ok(output) => output.success(),
            Err(e) => {
                debug!(program = %program, error = %e, "probe could not run");
                false
            }
        }
    }
}

impl ConnectivityConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn build_client(proxy: Option<&str>, timeout: Duration) -> Result<reqwest::Client, NetError> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(proxy) = proxy {
        let url = if proxy.contains("://") {
            proxy.to_string()
        } else {
            format!("http://{proxy}")
        };
        let proxy_cfg = reqwest::Proxy::all(url.as_str()).map_err(|source| NetError::InvalidProxy {
            proxy: proxy.to_string(),
            source,
        })?;
        builder = builder.proxy(proxy_cfg);
    }
    Ok(builder.build()?)
}

/// Second field of every `nameserver` line
fn parse_nameservers(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter(|line| line.starts_with("nameserver"))
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}
