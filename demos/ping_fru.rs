//! Probe a BMC and dump its FRU inventory.
//!
//! Usage: ping_fru <host> [user] [password]

use std::net::IpAddr;
use std::time::Duration;

#[tokio::main]
async fn main() -> ipmilan::Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(host) = args.next().and_then(|h| h.parse::<IpAddr>().ok()) else {
        eprintln!("usage: ping_fru <host> [user] [password]");
        std::process::exit(2);
    };
    let user = args.next().unwrap_or_default();
    let password = args.next().unwrap_or_default();

    let ipmi = ipmilan::Ipmi::new();
    if !ipmi.ping(host, Duration::from_secs(2)).await {
        eprintln!("{host}: no IPMI support detected");
        std::process::exit(1);
    }
    println!("{host}: IPMI supported");

    let session = ipmi
        .open(
            host,
            ipmilan::SessionOptions::new().user(user).password(password),
        )
        .await?;

    let device = session.get_device_id().await?;
    println!(
        "device {:#04x} firmware {}.{:02x} (ipmi {:x}.{:x})",
        device.device_id,
        device.firmware_major,
        device.firmware_minor,
        device.ipmi_version & 0x0F,
        device.ipmi_version >> 4,
    );

    match session.read_fru(0).await? {
        Some(inventory) => println!("{inventory:#?}"),
        None => println!("fru 0: not present"),
    }

    session.close().await
}
