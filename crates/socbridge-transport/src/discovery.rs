//! Serial port enumeration through sysfs.
//!
//! Each `class/tty/<name>` entry with a `device` link is a candidate. The
//! link is resolved and walked upwards until a USB device directory (one
//! holding `idVendor`) is found; its ids and descriptor strings decide the
//! match.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Default sysfs mount point.
pub const SYSFS_ROOT: &str = "/sys";

/// How many directories above the tty device to search for USB ids.
const MAX_USB_DEPTH: usize = 6;

/// Identifies a controller among enumerated serial ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSignature {
    /// Substrings matched against the product and interface strings.
    pub descriptors: Vec<String>,
    /// USB vendor id.
    pub vendor_id: u16,
    /// USB product id.
    pub product_id: u16,
}

impl Default for DeviceSignature {
    fn default() -> Self {
        Self {
            descriptors: vec!["PiSoC USB UART".to_string(), "Cypress USB UART".to_string()],
            vendor_id: 0x16D0,
            product_id: 0x0B33,
        }
    }
}

impl DeviceSignature {
    /// Whether an enumerated port carries this signature.
    pub fn matches(&self, port: &SerialPortInfo) -> bool {
        let ids_match = port.vendor_id == Some(self.vendor_id)
            && port.product_id == Some(self.product_id);
        let descriptor_match = [&port.product, &port.interface]
            .into_iter()
            .flatten()
            .any(|text| self.descriptors.iter().any(|d| text.contains(d.as_str())));
        ids_match || descriptor_match
    }
}

/// One enumerated serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialPortInfo {
    /// Device node, e.g. `/dev/ttyACM0`.
    pub path: PathBuf,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    /// USB interface string, when the port is one interface of a composite device.
    pub interface: Option<String>,
    /// Whether the port carries the controller signature.
    pub matched: bool,
}

impl SerialPortInfo {
    /// `VID:PID` in the conventional upper-case hex form.
    pub fn usb_id(&self) -> Option<String> {
        match (self.vendor_id, self.product_id) {
            (Some(vid), Some(pid)) => Some(format!("{vid:04X}:{pid:04X}")),
            _ => None,
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.product.as_deref().or(self.interface.as_deref())
    }
}

/// Enumerate serial ports under the default sysfs root.
pub fn list_serial_ports() -> Vec<SerialPortInfo> {
    list_serial_ports_in(Path::new(SYSFS_ROOT), &DeviceSignature::default())
}

/// Enumerate serial ports under `sysfs_root`, flagging those matching `signature`.
pub fn list_serial_ports_in(sysfs_root: &Path, signature: &DeviceSignature) -> Vec<SerialPortInfo> {
    let class_dir = sysfs_root.join("class").join("tty");
    let entries = match fs::read_dir(&class_dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(path = %class_dir.display(), error = %err, "tty class not readable");
            return Vec::new();
        }
    };

    let mut ports: Vec<SerialPortInfo> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            probe_tty(sysfs_root, &entry.path(), &name, signature)
        })
        .collect();
    ports.sort_by(|a, b| a.path.cmp(&b.path));
    ports
}

/// First port matching `signature`, in path order.
pub fn find_serial_port(sysfs_root: &Path, signature: &DeviceSignature) -> Option<SerialPortInfo> {
    let found = list_serial_ports_in(sysfs_root, signature)
        .into_iter()
        .find(|port| port.matched);
    match &found {
        Some(port) => debug!(path = %port.path.display(), "controller port found"),
        None => debug!(root = %sysfs_root.display(), "no controller port found"),
    }
    found
}

fn probe_tty(
    sysfs_root: &Path,
    tty_dir: &Path,
    name: &str,
    signature: &DeviceSignature,
) -> Option<SerialPortInfo> {
    // Virtual terminals have no backing device.
    let device = fs::canonicalize(tty_dir.join("device")).ok()?;
    let interface = read_attr(&device, "interface");

    let root = fs::canonicalize(sysfs_root).unwrap_or_else(|_| sysfs_root.to_path_buf());
    let usb_dir = device
        .ancestors()
        .take(MAX_USB_DEPTH)
        .take_while(|dir| dir.starts_with(&root) && *dir != root.as_path())
        .find(|dir| dir.join("idVendor").is_file());

    let mut port = SerialPortInfo {
        path: Path::new("/dev").join(name),
        vendor_id: None,
        product_id: None,
        manufacturer: None,
        product: None,
        interface,
        matched: false,
    };
    if let Some(usb_dir) = usb_dir {
        port.vendor_id = read_hex_attr(usb_dir, "idVendor");
        port.product_id = read_hex_attr(usb_dir, "idProduct");
        port.manufacturer = read_attr(usb_dir, "manufacturer");
        port.product = read_attr(usb_dir, "product");
    }
    port.matched = signature.matches(&port);
    trace!(path = %port.path.display(), matched = port.matched, "probed tty");
    Some(port)
}

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    let text = fs::read_to_string(dir.join(name)).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn read_hex_attr(dir: &Path, name: &str) -> Option<u16> {
    u16::from_str_radix(&read_attr(dir, name)?, 16).ok()
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use super::*;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "socbridge-sysfs-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        fs::create_dir_all(dir.join("class/tty")).expect("temp sysfs should be creatable");
        dir
    }

    fn add_usb_tty(root: &Path, tty: &str, bus_id: &str, vid: &str, pid: &str, product: &str) {
        let usb_dir = root.join("devices/usb1").join(bus_id);
        let intf_dir = usb_dir.join(format!("{bus_id}:1.0"));
        fs::create_dir_all(&intf_dir).expect("usb dir should be creatable");
        fs::write(usb_dir.join("idVendor"), format!("{vid}\n")).expect("write idVendor");
        fs::write(usb_dir.join("idProduct"), format!("{pid}\n")).expect("write idProduct");
        fs::write(usb_dir.join("product"), format!("{product}\n")).expect("write product");

        let tty_dir = root.join("class/tty").join(tty);
        fs::create_dir_all(&tty_dir).expect("tty dir should be creatable");
        symlink(&intf_dir, tty_dir.join("device")).expect("device link should be creatable");
    }

    #[test]
    fn matches_by_descriptor() {
        let root = temp_root("desc");
        add_usb_tty(&root, "ttyACM1", "1-2", "04b4", "f232", "PiSoC USB UART");
        add_usb_tty(&root, "ttyUSB0", "1-3", "0403", "6001", "FT232R USB UART");

        let ports = list_serial_ports_in(&root, &DeviceSignature::default());
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].path, PathBuf::from("/dev/ttyACM1"));
        assert!(ports[0].matched);
        assert!(!ports[1].matched);
        assert_eq!(ports[1].usb_id().as_deref(), Some("0403:6001"));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn matches_by_vendor_and_product_id() {
        let root = temp_root("vidpid");
        add_usb_tty(&root, "ttyACM0", "1-1", "16d0", "0b33", "Custom Board");

        let found = find_serial_port(&root, &DeviceSignature::default()).expect("port should match");
        assert_eq!(found.path, PathBuf::from("/dev/ttyACM0"));
        assert_eq!(found.usb_id().as_deref(), Some("16D0:0B33"));
        assert_eq!(found.description(), Some("Custom Board"));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn virtual_terminals_are_skipped() {
        let root = temp_root("vt");
        fs::create_dir_all(root.join("class/tty/tty1")).expect("vt dir");

        assert!(list_serial_ports_in(&root, &DeviceSignature::default()).is_empty());
        assert!(find_serial_port(&root, &DeviceSignature::default()).is_none());

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_sysfs_yields_no_ports() {
        let root = PathBuf::from("/nonexistent/socbridge-sysfs");
        assert!(list_serial_ports_in(&root, &DeviceSignature::default()).is_empty());
    }
}
