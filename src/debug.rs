//! Wire-level dumps, gated on the `IPMI_DEBUG` environment variable.

use std::fmt::Write as _;
use std::sync::OnceLock;

fn enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var_os("IPMI_DEBUG").is_some_and(|value| !value.is_empty()))
}

/// Dump one datagram as hex, grouped into 4-byte columns.
pub(crate) fn dump_hex(label: &str, bytes: &[u8]) {
    if !enabled() {
        return;
    }

    let mut line = String::with_capacity(label.len() + bytes.len() * 3 + 24);
    let _ = write!(line, "ipmilan {label}, {} bytes:", bytes.len());
    for (index, byte) in bytes.iter().enumerate() {
        if index > 0 && index % 4 == 0 {
            line.push(' ');
        }
        let _ = write!(line, " {byte:02x}");
    }

    #[cfg(feature = "tracing")]
    tracing::trace!(target: "ipmilan::wire", "{line}");

    #[cfg(not(feature = "tracing"))]
    eprintln!("{line}");
}
