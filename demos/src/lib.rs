//! Command line shared by the offboard mission demos
//!
//! Both demos take the vehicle connection URL as their only required argument and exit with status 0 when the
//! mission completed, 1 otherwise.

use std::process::ExitCode;
use std::time::Duration;

use automissions::{ConnectionUrl, Mission, MissionTiming, Vehicle};
use clap::Parser;

const URL_HELP: &str = "\
Connection URL format should be :
 For TCP : tcp://[server_host][:server_port]
 For UDP : udp://[bind_host][:bind_port]
 For Serial : serial:///path/to/serial/dev[:baudrate]
For example, to connect to the simulator use URL: udp://:14540";

/// Fly a scripted offboard velocity mission
#[derive(Debug, Parser)]
#[command(version, after_help = URL_HELP)]
pub struct Args {
    /// Vehicle connection URL
    #[arg(value_parser = parse_url)]
    pub connection_url: ConnectionUrl,

    /// Seconds to wait for an autopilot heartbeat
    #[arg(long, default_value_t = 3.0, value_parser = parse_seconds)]
    pub discovery_timeout: f64,
}

/// Error message for bad arguments, followed by the accepted URL formats
fn usage_error(error: &clap::Error) -> String {
    format!("{}\n{}", error.render(), URL_HELP)
}

fn parse_url(url: &str) -> Result<ConnectionUrl, String> {
    ConnectionUrl::parse(url).map_err(|e| e.to_string())
}

fn parse_seconds(seconds: &str) -> Result<f64, String> {
    match seconds.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds > 0.0 => Ok(seconds),
        _ => Err(format!("'{}' is not a positive number of seconds", seconds)),
    }
}

/// Parse the command line, connect and fly `mission`
pub async fn run(mission: Mission) -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        // --help and --version are not failures
        Err(e) if !e.use_stderr() => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("{}", usage_error(&e));
            return ExitCode::from(1);
        }
    };

    match fly(&args, &mission).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::from(1)
        }
    }
}

async fn fly(args: &Args, mission: &Mission) -> automissions::Result<()> {
    let discovery_timeout = Duration::from_secs_f64(args.discovery_timeout);
    let vehicle = Vehicle::connect(&args.connection_url, discovery_timeout).await?;

    let result = mission.run(&vehicle, &MissionTiming::default()).await;
    vehicle.disconnect().await;

    result
}
