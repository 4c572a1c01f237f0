//! A simulated thermostat driver
//!
//! Serves one device over TCP (`--listen`, default `127.0.0.1:7624`), or
//! over stdio when started with `--stdio` by an INDI server. Setting `TARGET` starts a
//! heating or cooling run that reports Busy while `TEMP` moves and Ok once
//! it arrives. The target is remembered across restarts.
//!
//! Run with: `cargo run -p indi-sdk --example thermostat -- --help`

use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use clap::Parser;
use indi_sdk::driver::{
    DeviceDriver, DeviceHandle, Driver, DriverConfig, HandlerError, PropertyHandle,
};
use indi_sdk::logging::{init_logging, LoggingMode};
use indi_sdk::model::prelude::*;
use tracing::{info, warn};

const DEVICE: &str = "Thermostat";
const STEP: f64 = 0.5;

#[derive(Parser, Debug)]
#[command(name = "thermostat")]
#[command(about = "Simulated INDI thermostat driver")]
struct Args {
    /// Talk to an INDI server over stdin/stdout instead of listening
    #[arg(long)]
    stdio: bool,

    /// Address to accept clients on
    #[arg(short, long, default_value = "127.0.0.1:7624")]
    listen: SocketAddr,

    /// Log every protocol message
    #[arg(long)]
    debug: bool,
}

struct Heater;

impl DeviceDriver for Heater {
    fn connect(&self, device: &DeviceHandle) -> Result<(), HandlerError> {
        info!("Heater on {} powered", device.name());
        Ok(())
    }

    fn disconnect(&self, device: &DeviceHandle) -> Result<(), HandlerError> {
        info!("Heater on {} idle", device.name());
        Ok(())
    }
}

fn celsius() -> Result<NumberSpec, Box<dyn std::error::Error>> {
    Ok(NumberSpec::new(
        NumberFormat::parse("%6.2f")?,
        -50.0,
        50.0,
        STEP,
    ))
}

/// Move `temp` towards `target` one step at a time
fn run_towards(temp: PropertyHandle, target: f64) {
    thread::spawn(move || loop {
        let current = temp
            .value("VALUE")
            .and_then(|v| v.as_number())
            .unwrap_or(target);
        let delta = target - current;
        if delta.abs() <= STEP {
            if let Err(e) = temp.update([("VALUE", Value::Number(target))], State::Ok, Some("at target")) {
                warn!("Could not publish temperature: {}", e);
            }
            return;
        }
        let next = current + STEP * delta.signum();
        if let Err(e) = temp.update([("VALUE", Value::Number(next))], State::Busy, None) {
            warn!("Could not publish temperature: {}", e);
            return;
        }
        thread::sleep(Duration::from_millis(250));
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(if args.debug {
        LoggingMode::Debug
    } else {
        LoggingMode::Development
    })?;

    let config = DriverConfig::new("thermostat").with_default_config_path()?;
    let driver = Driver::new(config)?;
    let device = driver.add_device(DEVICE, Heater)?;

    let temp = device.register(
        Property::builder(DEVICE, "TEMP", PropertyKind::Number)
            .label("Temperature")
            .group("Main Control")
            .perm(Permission::ReadOnly)
            .element(Element::number("VALUE", 20.0, celsius()?).with_label("Celsius"))
            .build()?,
    )?;
    let target = device.register(
        Property::builder(DEVICE, "TARGET", PropertyKind::Number)
            .label("Target")
            .group("Main Control")
            .saveable(true)
            .element(Element::number("VALUE", 20.0, celsius()?).with_label("Celsius"))
            .build()?,
    )?;

    let heating = temp.clone();
    target.on_request(move |ctx| {
        let Some(goal) = ctx.requested_number("VALUE") else {
            return Err(HandlerError::new("TARGET needs a VALUE"));
        };
        ctx.apply()?;
        ctx.set_state(State::Ok);
        ctx.publish(Some(format!("heading for {:.2}", goal).as_str()));
        run_towards(heating.clone(), goal);
        Ok(())
    });

    temp.define()?;
    target.define()?;

    if args.stdio {
        driver.attach_stdio();
        std::future::pending::<()>().await;
        Ok(())
    } else {
        let listener = tokio::net::TcpListener::bind(args.listen).await?;
        info!("Listening on {}", args.listen);
        driver.serve(listener).await?;
        Ok(())
    }
}
