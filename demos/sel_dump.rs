//! Dump the System Event Log of a BMC.
//!
//! Usage: sel_dump <host> [user] [password] [--clear]

use std::net::IpAddr;
use std::time::Duration;

use ipmilan::sel::SelRecord;

#[tokio::main]
async fn main() -> ipmilan::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let clear = args.iter().any(|a| a == "--clear");
    let mut plain = args.iter().filter(|a| !a.starts_with("--"));

    let Some(host) = plain.next().and_then(|h| h.parse::<IpAddr>().ok()) else {
        eprintln!("usage: sel_dump <host> [user] [password] [--clear]");
        std::process::exit(2);
    };
    let user = plain.next().cloned().unwrap_or_default();
    let password = plain.next().cloned().unwrap_or_default();

    let ipmi = ipmilan::Ipmi::new();
    let session = ipmi
        .open(
            host,
            ipmilan::SessionOptions::new()
                .user(user)
                .password(password)
                .timeout(Duration::from_secs(2)),
        )
        .await?;

    let entries = session.read_sel(clear).await?;
    println!("{} entries{}", entries.len(), if clear { " (cleared)" } else { "" });
    for entry in entries {
        match entry.record {
            SelRecord::System(event) => println!(
                "{:04x} t={} sensor {:#04x}/{:#04x} type {:#04x} {} data {:02x?}",
                entry.record_id,
                event.timestamp,
                event.sensor_type,
                event.sensor_number,
                event.event_type,
                if event.asserted { "asserted" } else { "deasserted" },
                event.event_data,
            ),
            SelRecord::OemTimestamped {
                record_type,
                timestamp,
                manufacturer_id,
                data,
            } => println!(
                "{:04x} t={timestamp} oem {record_type:#04x} vendor {manufacturer_id:#08x} {data:02x?}",
                entry.record_id,
            ),
            SelRecord::OemNotTimestamped { record_type, data } => println!(
                "{:04x} oem {record_type:#04x} {data:02x?}",
                entry.record_id,
            ),
        }
    }

    session.close().await
}
