//! Serial port discovery and classification.
//!
//! Boards such as the SenseCAP Watcher expose two serial ports through one
//! WCH dual-serial bridge (VID `0x1A86`, PID `0x55D2`): one for the Himax WE2
//! and one for the ESP32 companion. Which is which depends on the OS:
//!
//! | OS      | Himax WE2                 | ESP32 companion               |
//! |---------|---------------------------|-------------------------------|
//! | macOS   | `usbmodem…1`              | `wchusbserial…3`, `usbmodem…3` |
//! | Windows | product `…SERIAL-A`       | product `…SERIAL-B`           |
//! | Linux   | `ttyACM0` (interface 0)   | `ttyACM1` (interface 2)       |
//!
//! The name-based rules are heuristics. They hold for the drivers seen so
//! far and are the first thing to check when detection picks the wrong port.

use crate::error::{Error, Result};
use crate::port::PortInfo;

#[cfg(feature = "native")]
use {
    crate::port::{NativePortEnumerator, PortEnumerator},
    log::{debug, info, trace},
};

/// USB vendor ID of the WCH dual-serial bridge.
pub const HIMAX_VID: u16 = 0x1A86;

/// USB product ID of the WCH dual-serial bridge.
pub const HIMAX_PID: u16 = 0x55D2;

/// Name patterns tried when no port matches by VID/PID.
pub const FALLBACK_PATTERNS: &[&str] = &[
    "/dev/cu.usbmodem*",
    "/dev/tty.usbmodem*",
    "/dev/ttyACM*",
    "COM*",
];

/// Role of a serial port on a WE2 board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize),
    serde(rename_all = "snake_case")
)]
pub enum DeviceKind {
    /// Himax WE2 bootloader port.
    Himax,
    /// ESP32 companion port (reset hold only).
    Esp32Companion,
    /// Anything else.
    Unknown,
}

impl DeviceKind {
    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Himax => "Himax WE2",
            Self::Esp32Companion => "ESP32 companion",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether the port belongs to a WE2 board.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Discovered serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/cu.usbmodem5A7A0574651" or "COM3").
    pub name: String,
    /// Classified role.
    pub kind: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// USB serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// A port known only by name, classified from that name.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self::from(PortInfo {
            name: name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        })
    }

    /// Whether the port sits behind the WE2 board's USB bridge.
    pub fn is_bridge(&self) -> bool {
        self.vid == Some(HIMAX_VID) && self.pid == Some(HIMAX_PID)
    }

    /// Device name with the OS prefix and the trailing interface digit
    /// removed (`/dev/cu.usbmodem5A7A0574651` -> `5A7A057465`).
    pub fn stem(&self) -> &str {
        let base = self
            .name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.name);
        let base = ["cu.", "tty."]
            .iter()
            .find_map(|p| base.strip_prefix(p))
            .unwrap_or(base);
        let base = ["usbmodem", "wchusbserial"]
            .iter()
            .find_map(|p| base.strip_prefix(p))
            .unwrap_or(base);
        base.strip_suffix(|c: char| c.is_ascii_digit())
            .unwrap_or(base)
    }
}

impl From<PortInfo> for DetectedPort {
    fn from(info: PortInfo) -> Self {
        let mut port = Self {
            name: info.name,
            kind: DeviceKind::Unknown,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial: info.serial_number,
        };
        port.kind = classify(&port);
        port
    }
}

fn last_digit(name: &str) -> Option<u32> {
    name.chars()
        .last()
        .and_then(|c| c.to_digit(10))
}

/// Number at the end of a device name (`/dev/ttyACM12` -> 12).
fn trailing_number(name: &str) -> Option<u32> {
    let digits = name.len()
        - name
            .trim_end_matches(|c: char| c.is_ascii_digit())
            .len();
    name[name.len() - digits..]
        .parse()
        .ok()
}

/// Classify a port from its name, VID/PID and product string.
pub fn classify(port: &DetectedPort) -> DeviceKind {
    let name = port
        .name
        .to_lowercase();
    let product = port
        .product
        .as_deref()
        .unwrap_or_default()
        .to_uppercase();

    if name.contains("wchusbserial") || product.contains("SERIAL-B") {
        return DeviceKind::Esp32Companion;
    }
    if product.contains("SERIAL-A") {
        return DeviceKind::Himax;
    }
    if name.contains("usbmodem") {
        // Interface ...3 of the bridge is the ESP32 UART
        return if port.is_bridge() && last_digit(&name) == Some(3) {
            DeviceKind::Esp32Companion
        } else {
            DeviceKind::Himax
        };
    }
    if port.is_bridge() {
        return DeviceKind::Himax;
    }
    DeviceKind::Unknown
}

/// Ordering key among bridge ports: lower is more likely the Himax side.
fn himax_priority(port: &DetectedPort) -> i32 {
    if classify(port) == DeviceKind::Esp32Companion {
        return 100;
    }
    let digit = last_digit(&port.name);
    if port
        .name
        .to_lowercase()
        .contains("usbmodem")
    {
        match digit {
            Some(1) => return -100,
            Some(3) => return 100,
            _ => {},
        }
    }
    trailing_number(&port.name)
        .and_then(|n| i32::try_from(n).ok())
        .unwrap_or(99)
}

/// Whether `a` and `b` are interfaces of the same bridge.
fn same_bridge(a: &DetectedPort, b: &DetectedPort) -> bool {
    a.name != b.name
        && a.is_bridge()
        && b.is_bridge()
        && a.serial.is_some()
        && a.serial == b.serial
}

/// Reclassify bridge interfaces that names alone cannot tell apart.
///
/// On Linux both interfaces of the bridge show up as `ttyACM*`, so both
/// classify as [`DeviceKind::Himax`]. Within one bridge only the lowest
/// interface keeps that role; the others become the companion.
pub fn pair_bridge_siblings(ports: &mut [DetectedPort]) {
    let companions: Vec<usize> = ports
        .iter()
        .enumerate()
        .filter(|(_, port)| port.kind == DeviceKind::Himax)
        .filter(|(_, port)| {
            ports.iter().any(|other| {
                other.kind == DeviceKind::Himax
                    && same_bridge(port, other)
                    && himax_priority(other) < himax_priority(port)
            })
        })
        .map(|(i, _)| i)
        .collect();

    for i in companions {
        ports[i].kind = DeviceKind::Esp32Companion;
    }
}

/// Match `name` against a pattern with an optional trailing `*`.
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}

/// Pick the Himax port out of `ports`.
///
/// Order: bridge VID/PID match (best interface first), then any `usbmodem`
/// port matching a fallback pattern, then the first port matching a
/// fallback pattern.
pub fn select_himax_port(ports: &[DetectedPort]) -> Option<&DetectedPort> {
    if let Some(port) = ports
        .iter()
        .filter(|p| p.is_bridge())
        .min_by_key(|p| himax_priority(p))
    {
        return Some(port);
    }

    let matching = || {
        ports
            .iter()
            .filter(|p| {
                FALLBACK_PATTERNS
                    .iter()
                    .any(|pat| matches_pattern(&p.name, pat))
            })
    };

    matching()
        .find(|p| {
            p.name
                .to_lowercase()
                .contains("usbmodem")
        })
        .or_else(|| matching().next())
}

/// Find the ESP32 companion that shares a board with `main`.
///
/// ESP32-classified ports sharing the bridge's USB serial number with
/// `main` are tried first, then a higher interface of the same bridge, then
/// ESP32-classified ports whose device-name stem matches.
pub fn companion_for<'a>(
    main: &DetectedPort,
    candidates: &'a [DetectedPort],
) -> Option<&'a DetectedPort> {
    let others = || {
        candidates
            .iter()
            .filter(move |p| p.name != main.name)
    };
    let pick = |group: Vec<&'a DetectedPort>| {
        group
            .iter()
            .copied()
            .find(|p| classify(p) == DeviceKind::Esp32Companion)
    };

    if let Some(serial) = main
        .serial
        .as_deref()
    {
        let siblings: Vec<_> = others()
            .filter(|p| p.serial.as_deref() == Some(serial))
            .collect();
        if let Some(port) = pick(siblings) {
            return Some(port);
        }
    }

    if let Some(port) = others()
        .filter(|p| same_bridge(main, p) && himax_priority(p) > himax_priority(main))
        .max_by_key(|p| himax_priority(p))
    {
        return Some(port);
    }

    let stem = main.stem();
    if stem.is_empty() {
        return None;
    }
    pick(
        others()
            .filter(|p| p.stem() == stem)
            .collect(),
    )
}

/// Enumerate serial ports with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let ports = match NativePortEnumerator::list_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            return Vec::new();
        },
    };

    let mut detected: Vec<DetectedPort> = ports
        .into_iter()
        .map(DetectedPort::from)
        .collect();
    pair_bridge_siblings(&mut detected);

    for port in &detected {
        trace!(
            "Found port {} ({:?}, VID {:04X?}, PID {:04X?})",
            port.name, port.kind, port.vid, port.pid
        );
    }
    detected
}

/// Enumerate serial ports (no native backend: always empty).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Whether `name` is currently listed by the OS.
///
/// When enumeration itself fails the port is assumed present, and opening
/// it reports the real error.
#[cfg(feature = "native")]
pub fn port_exists(name: &str) -> bool {
    match NativePortEnumerator::list_ports() {
        Ok(ports) => ports
            .iter()
            .any(|p| p.name == name),
        Err(e) => {
            debug!("Cannot enumerate serial ports ({e}), assuming {name} exists");
            true
        },
    }
}

/// Locate the Himax WE2 port.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = detect_ports();
    let port = select_himax_port(&ports).ok_or(Error::DeviceNotFound)?;
    info!("Auto-detected {} port: {}", port.kind.name(), port.name);
    Ok(port.clone())
}

/// Locate the Himax WE2 port (no native backend: never found).
#[cfg(not(feature = "native"))]
pub fn auto_detect_port() -> Result<DetectedPort> {
    Err(Error::DeviceNotFound)
}

/// Locate the ESP32 companion for the Himax port named `main`.
#[cfg(feature = "native")]
pub fn auto_detect_companion(main: &str) -> Option<DetectedPort> {
    let ports = detect_ports();
    let main = ports
        .iter()
        .find(|p| p.name == main)
        .cloned()
        .unwrap_or_else(|| DetectedPort::from_name(main));
    let companion = companion_for(&main, &ports)?;
    info!("Paired companion port {} with {}", companion.name, main.name);
    Some(companion.clone())
}

/// Format detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let kind = if port.kind.is_known() {
                format!(" [{}]", port.kind.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };
            let product = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();
            format!("{}{kind}{product}", port.name)
        })
        .collect()
}
