use std::{error::Error, net::IpAddr, sync::Arc};

use clap::Parser;
use log::{info, warn};
use netcore::{
    Config, ConsoleLog, Dispatch, Environment, FileLog, LogSink, Server, ServerSettings,
    protocol::Echo,
};

#[derive(Debug, Parser)]
#[command(version, about = "Echo message server", long_about = None)]
struct Cli {
    /// Config file name under $NETCORE_HOME/config
    #[arg(long)]
    config: Option<String>,
    /// Address to listen on
    #[arg(long)]
    address: Option<IpAddr>,
    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,
    /// Serve connections from a pool of N worker threads
    #[arg(long, value_name = "N", conflicts_with = "no_pool")]
    pool: Option<usize>,
    /// Spawn one thread per connection
    #[arg(long)]
    no_pool: bool,
    /// Close connections beyond this many
    #[arg(long)]
    max_connections: Option<usize>,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let program = env!("CARGO_BIN_NAME");

    let (config, log): (Config, Arc<dyn LogSink>) = match Environment::from_env() {
        Ok(env) => (
            Config::from_env(&env, cli.config.as_deref())?,
            Arc::new(FileLog::new(env.log_dir(), program)),
        ),
        Err(e) => {
            warn!("{e}; using command line settings only");
            (Config::default(), Arc::new(ConsoleLog))
        }
    };

    let mut settings = ServerSettings::from_config(&config)?;
    if let Some(address) = cli.address {
        settings.address.set_ip(address);
    }
    if let Some(port) = cli.port {
        settings.address.set_port(port);
    }
    if let Some(threads) = cli.pool {
        if threads == 0 {
            return Err("--pool needs at least one worker".into());
        }
        settings.dispatch = Dispatch::Pool { threads };
    }
    if cli.no_pool {
        settings.dispatch = Dispatch::ThreadPerConnection;
    }
    if cli.max_connections.is_some() {
        settings.max_connections = cli.max_connections;
    }

    let server = Server::bind(settings, Echo, Arc::clone(&log))?;
    let connections = server.connections();
    let interrupt_log = Arc::clone(&log);
    ctrlc::set_handler(move || {
        let live = connections.live();
        info!("interrupted with {live} open connections");
        interrupt_log.write(&format!("main():interrupted:client count:{live}"));
        std::process::exit(0);
    })?;

    server.run()?;
    Ok(())
}
