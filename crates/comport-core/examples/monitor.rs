//! Print every byte received on a serial port as hex.
//!
//! Usage: `cargo run --example monitor -- <port> [baud]`

use anyhow::{bail, Context, Result};
use comport_core::{ChannelConfig, SerialChannel};
use std::io::Write;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(port_name) = args.next() else {
        for port in SerialChannel::available_ports().context("listing serial ports")? {
            println!("{} ({})", port.port_name, port.port_type);
        }
        return Ok(());
    };
    let baud_rate = match args.next() {
        Some(baud) => baud.parse().with_context(|| format!("invalid baud rate {baud:?}"))?,
        None => 9600,
    };

    let channel = SerialChannel::builder(ChannelConfig::new(port_name, baud_rate))
        .on_port_error(|e| eprintln!("error: {e}"))
        .on_port_connected(|name| eprintln!("connected to {name}"))
        .on_byte(|b| {
            let mut out = std::io::stdout().lock();
            write!(out, "{b:02X} ")?;
            out.flush()?;
            Ok(())
        })
        .build();
    if !channel.is_valid() {
        bail!("{} is not available", channel.port_name());
    }

    channel.start_communications()?;
    while channel.is_open() {
        std::thread::sleep(Duration::from_millis(200));
    }
    Ok(())
}
