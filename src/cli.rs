use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "swarmwatch")]
#[command(about = "Aggregate Docker Swarm state and relay cluster events to dashboards")]
#[command(version)]
pub struct Args {
    /// Manager API (socket proxy with write access to the swarm endpoints)
    #[arg(
        long,
        env = "MANAGER_API_URL",
        default_value = "http://dsproxy_rw:2375",
        value_name = "URL"
    )]
    pub manager_url: String,

    /// DNS name resolving to one address per node agent
    #[arg(
        long,
        env = "READONLY_PROXY_DNS",
        default_value = "tasks.dsproxy_ro",
        value_name = "NAME"
    )]
    pub agent_dns: String,

    /// Port the node agents listen on
    #[arg(long, env = "READONLY_PROXY_PORT", default_value_t = 2375, value_name = "PORT")]
    pub agent_port: u16,

    /// Seconds between container stats samples
    #[arg(long, env = "STATS_INTERVAL", default_value_t = 5, value_name = "SECS")]
    pub stats_interval: u64,

    /// How long terminal tasks stay visible (defaults to the stats interval)
    #[arg(long, env = "TRANSIENT_TTL_MS", value_name = "MS")]
    pub retention_ttl_ms: Option<u64>,

    /// Highest engine API version to use, e.g. v1.43
    #[arg(long, env = "DOCKER_API_VERSION", value_name = "VERSION")]
    pub api_version: Option<String>,

    /// Seconds between node agent discovery passes
    #[arg(long, default_value_t = 60, value_name = "SECS")]
    pub discovery_interval: u64,

    /// Seconds between SSE heartbeat comments
    #[arg(long, default_value_t = 15, value_name = "SECS")]
    pub heartbeat_interval: u64,

    /// Reconnect delay advertised to SSE clients
    #[arg(long, default_value_t = 10_000, value_name = "MS")]
    pub retry_ms: u64,

    /// Stats requests in flight per node agent
    #[arg(long, default_value_t = 6, value_name = "N")]
    pub sample_concurrency: usize,

    /// Timeout for manager and agent requests, in seconds
    #[arg(long, default_value_t = 10, value_name = "SECS")]
    pub request_timeout: u64,

    /// Keep the last good nodes/services/tasks when a refresh fails
    #[arg(long)]
    pub keep_stale_on_error: bool,

    /// Address to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0", value_name = "ADDR")]
    pub bind_addr: String,

    /// Port for the HTTP server
    #[arg(short, long, env = "PORT", default_value_t = 8080, value_name = "PORT")]
    pub port: u16,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Path to a .env file providing any of the environment settings
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Print the resolved configuration and exit
    #[arg(long)]
    pub dry_run: bool,
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

use crate::config::MonitorConfig;

/// Format the resolved configuration for `--dry-run`.
pub fn format_dry_run(config: &MonitorConfig) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "swarmwatch v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));

    output.push_str("Upstream:\n");
    output.push_str(&format!("  Manager:      {}\n", config.manager_url));
    output.push_str(&format!(
        "  Node agents:  {}:{}\n",
        config.agent_dns, config.agent_port
    ));
    match config.api_version {
        Some(v) => output.push_str(&format!("  API version:  at most {}\n", v)),
        None => output.push_str("  API version:  negotiated with the engine\n"),
    }
    output.push_str(&format!(
        "  Timeout:      {}s\n\n",
        config.request_timeout.as_secs()
    ));

    output.push_str("Loops:\n");
    output.push_str(&format!(
        "  Stats:        every {}s, {} per node\n",
        config.stats_interval.as_secs(),
        config.sample_concurrency
    ));
    output.push_str(&format!(
        "  Discovery:    every {}s\n",
        config.discovery_interval.as_secs()
    ));
    output.push_str(&format!(
        "  Retention:    {}ms\n",
        config.retention_ttl.as_millis()
    ));
    output.push_str(&format!(
        "  On failure:   {}\n\n",
        if config.keep_stale_on_error {
            "keep last snapshot"
        } else {
            "reset resource"
        }
    ));

    output.push_str("Server:\n");
    output.push_str(&format!("  Listen:       {}\n", config.listen_addr()));
    output.push_str(&format!(
        "  SSE:          heartbeat {}s, retry {}ms\n",
        config.heartbeat_interval.as_secs(),
        config.retry.as_millis()
    ));

    output.push_str("\nValidation: PASSED\n");
    output.push_str("Remove --dry-run to start monitoring.\n");

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["swarmwatch"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_overrides() {
        let args = parse(&[
            "--manager-url",
            "http://manager:2375",
            "--agent-dns",
            "tasks.agent",
            "--stats-interval",
            "2",
            "--retention-ttl-ms",
            "7000",
            "--api-version",
            "v1.43",
            "--keep-stale-on-error",
            "-p",
            "9000",
            "-vv",
        ]);

        assert_eq!(args.manager_url, "http://manager:2375");
        assert_eq!(args.agent_dns, "tasks.agent");
        assert_eq!(args.stats_interval, 2);
        assert_eq!(args.retention_ttl_ms, Some(7000));
        assert_eq!(args.api_version.as_deref(), Some("v1.43"));
        assert!(args.keep_stale_on_error);
        assert_eq!(args.port, 9000);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_rejects_non_numeric_interval() {
        let result = Args::try_parse_from(["swarmwatch", "--stats-interval", "soon"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_dry_run_output() {
        let args = parse(&["--manager-url", "http://manager:2375", "--api-version", "1.43"]);
        let config = MonitorConfig::from_args(&args).unwrap();

        let output = format_dry_run(&config);

        assert!(output.contains("Manager:      http://manager:2375"));
        assert!(output.contains("at most v1.43"));
        assert!(output.contains("Validation: PASSED"));
    }
}
