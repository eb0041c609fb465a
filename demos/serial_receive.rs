use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::time::Instant;

use xmodem_proto::{State, XmodemServer};

const SUB: u8 = 0x1a;

fn receive(port_name: &str, baud: u32) -> Result<Vec<u8>> {
    let mut port = serialport::new(port_name, baud)
        .timeout(std::time::Duration::from_millis(10))
        .open()
        .with_context(|| format!("Failed to open serial port {}", port_name))?;

    let mut writer = port.try_clone().context("Failed to clone serial port")?;
    let mut server = XmodemServer::new(move |byte: u8| {
        if let Err(err) = writer.write_all(&[byte]) {
            warn!("Serial write failed: {}", err);
        }
    });

    let started = Instant::now();
    let mut file = Vec::new();
    let mut block = [0; 128];
    let mut buf = [0; 256];

    while !server.is_done() {
        match port.read(&mut buf) {
            Ok(len) => {
                for byte in &buf[..len] {
                    server.receive_byte(*byte);
                }
            }
            Err(err) if err.kind() == ErrorKind::TimedOut => (),
            Err(err) => return Err(err).context("Serial read failed"),
        }

        let now = started.elapsed().as_millis() as u32;
        if let Some(received) = server.process(&mut block, now)? {
            info!("Block {} received", received.number);
            file.extend_from_slice(&block[..received.len]);
        }
    }

    if server.state() == State::Failure {
        bail!("Transfer failed after {} errors", server.error_count());
    }

    while file.last() == Some(&SUB) {
        file.pop();
    }
    Ok(file)
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args();
    args.next(); // Skip program name
    let out_path = args.next().context("Usage: serial_receive <output file> [port] [baud]")?;
    let port = args.next().unwrap_or_else(|| "/dev/ttyACM0".to_string());
    let baud = match args.next() {
        Some(baud) => baud.parse().context("Invalid baud rate")?,
        None => 115_200,
    };

    println!("Waiting for XMODEM sender on {}", port);
    let data = receive(&port, baud)?;
    File::create(&out_path)
        .and_then(|mut f| f.write_all(&data))
        .with_context(|| format!("Failed to write {}", out_path))?;
    println!("Received {} bytes into {}", data.len(), out_path);
    Ok(())
}
