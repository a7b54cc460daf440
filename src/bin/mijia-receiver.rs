use clap::Parser;
use log::{error, info};
use tokio::time::{sleep, Duration};

use mijia_receiver::config::io::ConfigIO;
use mijia_receiver::config::types::ReceiverConfig;
use mijia_receiver::device::session::ReceiveManager;
use mijia_receiver::device::types::{ConnectionState, Event};
use mijia_receiver::error::AppRunError;
use mijia_receiver::init_logging;
use mijia_receiver::radio::btle::BtleRadio;

#[derive(Parser)]
#[command(
    name = "mijia-receiver",
    version,
    about = "Receive temperature and humidity readings from a LYWSD03MMC sensor"
)]
struct Args {
    /// Match this advertised device name instead of the configured one
    #[arg(long)]
    device_name: Option<String>,

    /// Run with built-in defaults, without touching the config file
    #[arg(long)]
    no_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("mijia-receiver ", env!("CARGO_PKG_VERSION")));

    let args = Args::parse();

    let mut locker;
    let _lock_guard;
    let mut config;
    if args.no_config {
        config = ReceiverConfig::default();
    } else {
        let mut config_io = ConfigIO::new_sync()?;
        // hold the file lock so only one receiver instance uses the radio
        locker = config_io.locker()?;
        _lock_guard = locker.lock()?;
        config = config_io.read().await?;
    }

    if let Some(name) = args.device_name {
        config.device_name = name;
    }

    let (radio, radio_events) = BtleRadio::new().await?;
    let manager = ReceiveManager::spawn(radio, radio_events, config);
    let mut events = manager.subscribe();

    manager.start_receiving();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing the connection");
                manager.close_connection();
                // leave the machine a moment to release the link
                sleep(Duration::from_millis(200)).await;
                break;
            }
            event = events.recv() => match event {
                Some(Event::Loading { message }) => info!("{}", message),
                Some(Event::Success { data }) => {
                    if data.state == ConnectionState::Disconnected {
                        info!("Sensor disconnected");
                        break;
                    }
                    println!(
                        "{:.2} °C  {:.0} % RH",
                        data.temperature_celsius, data.humidity_percent
                    );
                }
                Some(Event::Error { message }) => {
                    error!("{}", message);
                    break;
                }
                None => break,
            },
        }
    }

    Ok(())
}
