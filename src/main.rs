//! instrumentrs - drive bench instruments from the command line
//!
//! The transport is picked from the flags, in this order: `--mock`,
//! `--port` (serial), `--host` (TCP), `--instrument <id>` from the
//! configuration file, and finally the first enabled instrument of the
//! right type in the configuration file.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{debug, info};

use instrumentrs::common::{open_device, DeviceInterface, MockDevice};
use instrumentrs::config::{ConnectionConfig, InstrumentsConfig, DEFAULT_CONFIG_PATH};
use instrumentrs::platform::next::ts3::Ts3;
use instrumentrs::psu::aimtti::Mx100tp;
use instrumentrs::psu::PowerSupply;

#[derive(Parser)]
#[command(name = "instrumentrs")]
#[command(version, about = "Control lab power supplies and test fixtures")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Instrument id from the configuration file
    #[arg(long, global = true)]
    instrument: Option<String>,

    /// Serial port, bypasses the configuration file
    #[arg(long, global = true)]
    port: Option<String>,

    #[arg(long, global = true, default_value_t = 9600)]
    baud_rate: u32,

    /// Host name or IP address, bypasses the configuration file
    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    tcp_port: Option<u16>,

    /// Talk to a scripted device and print what would be sent
    #[arg(long, global = true)]
    mock: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// AIM-TTi MX100TP power supply
    Psu {
        #[command(subcommand)]
        action: PsuCommand,
    },
    /// NEXT TS3 fixture controller
    Ts3 {
        #[command(subcommand)]
        action: Ts3Command,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum PsuCommand {
    /// Print the *IDN? string
    Identify,
    /// Setpoints and output state of one channel
    Status {
        #[arg(long)]
        channel: u8,
    },
    /// Measured voltage and current of one channel
    Measure {
        #[arg(long)]
        channel: u8,
    },
    SetVoltage {
        #[arg(long)]
        channel: u8,
        #[arg(long)]
        volts: f64,
    },
    SetCurrent {
        #[arg(long)]
        channel: u8,
        #[arg(long)]
        amps: f64,
    },
    /// Switch one output on or off
    Output {
        #[arg(long)]
        channel: u8,
        #[arg(long, conflicts_with = "off", required_unless_present = "off")]
        on: bool,
        #[arg(long)]
        off: bool,
    },
    /// Switch every output off
    AllOff,
    /// Clear protection trips
    ResetTrip,
}

#[derive(Subcommand)]
enum Ts3Command {
    /// Check the fixture answers
    Poll,
    Version,
    ProductId,
    /// Is a DUT in the fixture
    DutPresent,
    /// Configuration date
    Date,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = InstrumentsConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    let level = match cli.verbose {
        0 => config.application.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    instrumentrs::logging::init(level);
    debug!("Loaded configuration '{}'", config.application.name);

    match &cli.command {
        Command::Psu { action } => {
            let mock = cli.mock.then(|| mock_psu(action));
            let device = connect(&cli, &config, "MX100TP", mock.clone()).await?;
            let mut psu = Mx100tp::new(device);
            run_psu(&mut psu, action).await?;
            print_dry_run(mock.as_ref());
        }
        Command::Ts3 { action } => {
            let mock = cli.mock.then(|| mock_ts3(action));
            let device = connect(&cli, &config, "TS3", mock.clone()).await?;
            let mut ts3 = Ts3::new(device);
            run_ts3(&mut ts3, action).await?;
            print_dry_run(mock.as_ref());
        }
        Command::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}

async fn connect(
    cli: &Cli,
    config: &InstrumentsConfig,
    instrument_type: &str,
    mock: Option<MockDevice>,
) -> Result<Box<dyn DeviceInterface>> {
    if let Some(mock) = mock {
        info!("Using mock {} device", instrument_type);
        return Ok(Box::new(mock));
    }

    let connection = if let Some(port) = &cli.port {
        if instrument_type == "TS3" {
            bail!("The TS3 is only supported over TCP/IP; use --host and --tcp-port");
        }
        ConnectionConfig::serial(port.clone(), cli.baud_rate)
    } else if let Some(host) = &cli.host {
        let tcp_port = cli.tcp_port.context("--host needs --tcp-port")?;
        ConnectionConfig::tcp(host.clone(), tcp_port)
    } else if let Some(id) = &cli.instrument {
        let definition = config
            .instrument(id)
            .ok_or_else(|| anyhow!("No instrument '{}' in {}", id, cli.config.display()))?;
        if definition.r#type != instrument_type {
            bail!("Instrument '{}' is a {}, not a {}", id, definition.r#type, instrument_type);
        }
        definition.connection.clone()
    } else {
        let definition = config
            .enabled_instruments()
            .into_iter()
            .find(|inst| inst.r#type == instrument_type)
            .ok_or_else(|| {
                anyhow!(
                    "No enabled {} in {}; pass --port, --host or --mock",
                    instrument_type,
                    cli.config.display()
                )
            })?;
        info!("Using configured instrument '{}'", definition.id);
        definition.connection.clone()
    };

    open_device(&connection)
        .await
        .with_context(|| format!("Failed to open {} connection", connection.method))
}

async fn run_psu<D: DeviceInterface>(psu: &mut Mx100tp<D>, action: &PsuCommand) -> Result<()> {
    match action {
        PsuCommand::Identify => println!("{}", psu.identify().await?),
        PsuCommand::Status { channel } => {
            let volts = psu.get_channel_voltage_setpoint(*channel).await?;
            let amps = psu.get_channel_current_limit_setpoint(*channel).await?;
            let on = psu.output_enabled(*channel).await?;
            println!(
                "Output {}: {} V  {} A limit  {}",
                channel,
                volts,
                amps,
                if on { "ON" } else { "OFF" }
            );
        }
        PsuCommand::Measure { channel } => {
            let volts = psu.read_voltage(*channel).await?;
            let amps = psu.read_current(*channel).await?;
            println!("Output {}: {:.3} V  {:.4} A", channel, volts, amps);
        }
        PsuCommand::SetVoltage { channel, volts } => {
            psu.set_voltage(*channel, *volts).await?;
            println!("Output {} set to {} V", channel, volts);
        }
        PsuCommand::SetCurrent { channel, amps } => {
            psu.set_current_limit(*channel, *amps).await?;
            println!("Output {} limited to {} A", channel, amps);
        }
        PsuCommand::Output { channel, on, .. } => {
            psu.set_output(*channel, *on).await?;
            println!("Output {} {}", channel, if *on { "ON" } else { "OFF" });
        }
        PsuCommand::AllOff => {
            psu.all_outputs_off().await?;
            println!("All outputs OFF");
        }
        PsuCommand::ResetTrip => {
            psu.reset_trip().await?;
            println!("Trips cleared");
        }
    }
    Ok(())
}

async fn run_ts3<D: DeviceInterface>(ts3: &mut Ts3<D>, action: &Ts3Command) -> Result<()> {
    match action {
        Ts3Command::Poll => {
            ts3.poll_device().await?;
            println!("TS3 is alive");
        }
        Ts3Command::Version => {
            let (version, build) = ts3.get_version().await?;
            println!("Firmware {} (build {})", version, build);
        }
        Ts3Command::ProductId => {
            let (article, name) = ts3.get_product_id().await?;
            println!("{} {}", article, name);
        }
        Ts3Command::DutPresent => {
            let present = ts3.get_dut_present().await?;
            println!("DUT {}", if present { "present" } else { "absent" });
        }
        Ts3Command::Date => println!("{}", ts3.get_date().await?),
    }
    Ok(())
}

/// Canned replies so a dry run completes.
fn mock_psu(action: &PsuCommand) -> MockDevice {
    let mock = MockDevice::new();
    match action {
        PsuCommand::Identify => {
            mock.push_response("THURLBY THANDAR, MX100TP, 000000, 1.00-1.00-1.00\r\n")
        }
        PsuCommand::Status { channel } => {
            mock.push_response(format!("V{} 0.000\r\n", channel));
            mock.push_response(format!("I{} 0.000\r\n", channel));
            mock.push_response("0\r\n");
        }
        PsuCommand::Measure { .. } => {
            mock.push_response("0.000V\r\n");
            mock.push_response("0.000A\r\n");
        }
        _ => {}
    }
    mock
}

fn mock_ts3(action: &Ts3Command) -> MockDevice {
    let reply = match action {
        Ts3Command::Poll => "$011;1;0000\r",
        Ts3Command::Version => "$000;13;0;0;0;0000\r",
        Ts3Command::ProductId => "$000;15;000000;MOCK;0000\r",
        Ts3Command::DutPresent => "$000;25;0;0000\r",
        Ts3Command::Date => "$000;80;2000;1;1;0;0;0;0000\r",
    };
    MockDevice::new().with_response(reply)
}

fn print_dry_run(mock: Option<&MockDevice>) {
    let Some(mock) = mock else { return };
    println!("--- sent ---");
    for command in mock.sent_commands() {
        println!("{:?}", command);
    }
}
