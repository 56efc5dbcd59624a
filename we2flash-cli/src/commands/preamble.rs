//! Preamble packet inspection.

use console::style;
use we2flash::{Preamble, XmodemVariant};

use crate::use_fancy_output;

/// Bytes per hex dump line.
const LINE_WIDTH: usize = 16;

/// Print the preamble packet for `address`/`offset` as a hex dump on stdout.
pub(crate) fn cmd_preamble(address: u32, offset: u32, variant: XmodemVariant) {
    let packet = Preamble::new(address, offset).encode(variant);

    if use_fancy_output() {
        eprintln!(
            "{} Preamble for 0x{address:08X} + 0x{offset:X} ({variant}, {} bytes)",
            style("ℹ").blue(),
            packet.len()
        );
    }

    for line in hex_dump(&packet) {
        println!("{line}");
    }
}

/// Format `data` as `offset: bytes` lines.
fn hex_dump(data: &[u8]) -> Vec<String> {
    data.chunks(LINE_WIDTH)
        .enumerate()
        .map(|(i, chunk)| {
            let bytes: Vec<String> = chunk
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect();
            format!("{:04X}: {}", i * LINE_WIDTH, bytes.join(" "))
        })
        .collect()
}
