// src/main.rs

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serial_bridge_lib::{list_serial_ports, BridgeSettings, IoError, SinkKind};

#[derive(Parser, Debug)]
#[command(name = "serial-bridge")]
#[command(version)]
#[command(about = "Publish semicolon-separated integer lines from a serial device", long_about = None)]
struct Cli {
    /// Settings file (defaults to <config dir>/serial-bridge/config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Serial device, e.g. /dev/ttyACM0 or COM3
    #[arg(short, long, value_name = "DEVICE", global = true)]
    port: Option<String>,

    #[arg(short, long, value_name = "BAUD", global = true)]
    baud: Option<u32>,

    /// Where parsed lines go
    #[arg(long, value_enum, global = true)]
    sink: Option<SinkKind>,

    /// Also write logs to timestamped files in this directory
    #[arg(long, value_name = "DIR", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge until Ctrl-C (default)
    Run,
    /// List serial ports and exit
    Ports,
}

impl Cli {
    /// Command-line flags win over the settings file.
    fn settings(&self) -> Result<BridgeSettings, IoError> {
        let mut settings = BridgeSettings::load(self.config.as_deref())?;
        if let Some(port) = &self.port {
            settings.serial.port = port.clone();
        }
        if let Some(baud) = self.baud {
            settings.serial.baud_rate = baud;
        }
        if let Some(kind) = self.sink {
            settings.sink.kind = kind;
        }
        if let Some(dir) = &self.log_dir {
            settings.logging.log_dir = Some(dir.clone());
        }
        Ok(settings)
    }
}

fn print_ports() -> Result<(), IoError> {
    let ports = list_serial_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let mut line = format!("{:<24} {}", port.port_name, port.port_type);
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            line.push_str(&format!(" {:04x}:{:04x}", vid, pid));
        }
        if let Some(product) = port.product {
            line.push_str(&format!(" {}", product));
        }
        println!("{}", line);
    }
    Ok(())
}

async fn run_cli(cli: Cli) -> Result<(), IoError> {
    match cli.command {
        Some(Command::Ports) => print_ports(),
        Some(Command::Run) | None => {
            let settings = cli.settings()?;
            serial_bridge_lib::run(settings).await.map(|_| ())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("serial-bridge: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_cli(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("serial-bridge: {}", e);
            ExitCode::FAILURE
        }
    }
}
