use std::{error::Error, sync::Arc, time::Duration};

use clap::Parser;
use netcore::{Client, ClientSettings, ConsoleLog, cli::build_message};

#[derive(Debug, Parser)]
#[command(version, about = "Send one message to a netcore server", long_about = None)]
struct Cli {
    /// Server address, HOST:PORT
    address: String,
    /// Command code of the request
    #[arg(allow_negative_numbers = true)]
    command: i32,
    /// Request fields as KEY=TAG:VALUE, e.g. name=s:sensor count=i:3
    fields: Vec<String>,
    /// Socket read/write timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let request = build_message(cli.command, &cli.fields)?;

    let mut settings = ClientSettings::new(cli.address);
    settings.socket_timeout = cli.timeout.filter(|s| *s > 0).map(Duration::from_secs);

    let mut client = Client::with_settings(&settings, Arc::new(ConsoleLog))?;
    if request.is_close() {
        client.close()?;
        return Ok(());
    }

    let response = client.exchange(&request)?;
    println!("{response}");
    client.close()?;
    Ok(())
}
