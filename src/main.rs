use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use netdash::config::NetdashConfig;
use netdash::dns::{Record, Resolver};
use netdash::probes::{
    EventSink, Family, ProbeEvent, ProbeLauncher, ProbeOptions, ProbeRequest, SessionOutcome,
    SinkClosed, SystemLookup,
};

#[derive(Parser)]
#[command(
    name = "netdash",
    about = "Network diagnostics dashboard: cached DNS lookups and live ping",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $NETDASH_CONFIG, then /etc/netdash/netdash.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Bind address (overrides the config file)
        #[arg(long)]
        bind: Option<String>,

        /// Name server to save before serving; may be repeated
        #[arg(long = "dns-server")]
        dns_servers: Vec<String>,
    },

    /// Resolve a name once and print the answer
    Lookup {
        /// Name to resolve (an IP address for PTR lookups)
        name: String,

        /// Record type: A, AAAA, MX, NS, PTR, TXT or SRV
        #[arg(long = "type", default_value = "A")]
        record_type: String,

        /// Name server to ask, `ip` or `ip:port`
        #[arg(long)]
        server: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Ping a host, printing one JSON line per event
    Ping {
        /// Host name or IP address
        target: String,

        /// Address family: auto, ipv4 or ipv6
        #[arg(long, default_value = "auto")]
        family: String,

        /// Number of packets
        #[arg(long)]
        count: Option<u32>,

        /// Payload size in bytes
        #[arg(long)]
        size: Option<u32>,

        /// Seconds between packets
        #[arg(long)]
        interval: Option<f64>,

        /// Time to live
        #[arg(long)]
        ttl: Option<u8>,

        /// Set the don't-fragment bit
        #[arg(long)]
        no_fragment: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_path) = match &cli.config {
        Some(path) => (NetdashConfig::load_or_init(path)?, path.clone()),
        None => NetdashConfig::load_or_default(),
    };

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json || config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Serve { bind, dns_servers } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(
                bind = %config.server.bind,
                config = %config_path.display(),
                "Starting netdash daemon"
            );
            netdash::serve(config, config_path, &dns_servers).await?;
        }
        Commands::Lookup {
            name,
            record_type,
            server,
            json,
        } => {
            let resolver = Resolver::from_system();
            match resolver.resolve(&name, &record_type, server.as_deref()).await {
                Ok(result) if json => println!("{}", serde_json::to_string_pretty(&result)?),
                Ok(result) => {
                    println!("Server: {}", result.server);
                    if result.records.is_empty() {
                        println!("(no records)");
                    }
                    for record in &result.records {
                        println!("  {}", describe(record));
                    }
                }
                Err(e) => {
                    if json {
                        println!("{}", serde_json::json!({ "error": e.to_string() }));
                    }
                    return Err(e.into());
                }
            }
        }
        Commands::Ping {
            target,
            family,
            count,
            size,
            interval,
            ttl,
            no_fragment,
        } => {
            let request = ProbeRequest {
                target,
                family: family.parse::<Family>()?,
                options: ProbeOptions {
                    count,
                    size,
                    interval,
                    ttl,
                    no_fragment,
                },
            };
            let launcher =
                ProbeLauncher::new(config.ping.program.clone(), Some(config.ping.default_count));
            let mut sink = StdoutSink;
            let session = launcher.open(&request, &SystemLookup, &sink).await?;
            tracing::info!(session = %session.id(), target = %session.target(), "Running ping");
            if session.run(&mut sink).await == SessionOutcome::Disconnected {
                tracing::info!("ping interrupted");
            }
        }
    }

    Ok(())
}

fn describe(record: &Record) -> String {
    match record {
        Record::Address { address } => address.clone(),
        Record::MailExchange { host, priority } => format!("{} (priority {})", host, priority),
        Record::Host { host } => host.clone(),
        Record::Text { text } => format!("{:?}", text),
        Record::Service {
            target,
            port,
            priority,
            weight,
        } => format!(
            "{}:{} (priority {}, weight {})",
            target, port, priority, weight
        ),
    }
}

/// Writes each event as one JSON line; ctrl-c counts as the consumer
/// going away.
struct StdoutSink;

#[async_trait]
impl EventSink for StdoutSink {
    async fn send(&mut self, event: ProbeEvent) -> Result<(), SinkClosed> {
        let line = serde_json::to_string(&event).map_err(|_| SinkClosed)?;
        println!("{}", line);
        Ok(())
    }

    async fn closed(&mut self) {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
