//! HID device access
//!
//! The lifecycle manager only sees the [`DeviceProvider`] and
//! [`DeviceHandle`] traits. [`HidProvider`] implements them over `hidapi`,
//! reading reports on a dedicated thread per open handle and handing
//! parsed keyboard reports to a callback.

use hidapi::{HidApi, HidDevice};
use std::ffi::CString;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::config::DeviceMode;
use crate::error::DeviceError;

/// Blocking read timeout in stream mode, bounds how long `close` waits
const READ_TIMEOUT_MS: i32 = 100;

/// Sleep between reads in poll mode
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Largest report we expect from a keyboard-like device
const REPORT_BUFFER_SIZE: usize = 64;

/// HID keyboard usage id (0x04 = 'a', 0x1E = '1', ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub u8);

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Convert a character to its HID keyboard usage id
pub fn char_to_usage(ch: char) -> Option<u8> {
    match ch.to_ascii_lowercase() {
        c @ 'a'..='z' => Some(0x04 + (c as u8 - b'a')),
        c @ '1'..='9' => Some(0x1E + (c as u8 - b'1')),
        '0' => Some(0x27),
        '\n' => Some(0x28), // Enter
        '\t' => Some(0x2B), // Tab
        ' ' => Some(0x2C),
        '-' => Some(0x2D),
        '=' => Some(0x2E),
        '[' => Some(0x2F),
        ']' => Some(0x30),
        '\\' => Some(0x31),
        ';' => Some(0x33),
        '\'' => Some(0x34),
        '`' => Some(0x35),
        ',' => Some(0x36),
        '.' => Some(0x37),
        '/' => Some(0x38),
        '*' => Some(0x55), // Keypad *
        '+' => Some(0x57), // Keypad +
        _ => None,
    }
}

/// One decoded keyboard report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyboardReport {
    pub modifiers: u8,
    /// Pressed keys in report order; empty when everything is released
    pub keys: Vec<KeyCode>,
}

impl KeyboardReport {
    pub fn pressed(keys: &[u8]) -> Self {
        Self {
            modifiers: 0,
            keys: keys.iter().copied().map(KeyCode).collect(),
        }
    }

    pub fn released() -> Self {
        Self::default()
    }

    /// First pressed key, the one that drives the pitch
    pub fn primary(&self) -> Option<KeyCode> {
        self.keys.first().copied()
    }
}

/// How raw reports are decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportParser {
    /// HID boot keyboard: modifier byte, reserved byte, six key slots
    Keyboard,
}

impl ReportParser {
    pub fn parse(&self, data: &[u8]) -> Option<KeyboardReport> {
        match self {
            ReportParser::Keyboard => parse_keyboard_report(data),
        }
    }
}

/// Decode a boot keyboard report. Empty slots and the error codes
/// 0x01..=0x03 (rollover, POST fail, undefined) are dropped.
fn parse_keyboard_report(data: &[u8]) -> Option<KeyboardReport> {
    if data.len() < 3 {
        return None;
    }
    let end = data.len().min(8);
    let keys = data[2..end]
        .iter()
        .copied()
        .filter(|usage| *usage > 0x03)
        .map(KeyCode)
        .collect();

    Some(KeyboardReport {
        modifiers: data[0],
        keys,
    })
}

/// Something that happened on an open device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Data(KeyboardReport),
    Error(DeviceError),
}

/// Callback receiving device events, possibly from another thread
pub type EventCallback = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// An enumerated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub product_name: String,
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:04x}:{:04x}] {}",
            self.product_name, self.vendor_id, self.product_id, self.path
        )
    }
}

/// Device discovery and opening
pub trait DeviceProvider {
    type Handle: DeviceHandle;

    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// Open a device. Reports and errors are delivered through `on_event`
    /// until the handle is closed.
    fn open(
        &mut self,
        device: &DeviceInfo,
        parser: ReportParser,
        on_event: EventCallback,
    ) -> Result<Self::Handle, DeviceError>;
}

/// An open device, owned by the lifecycle manager
pub trait DeviceHandle {
    /// Stop delivering events and release the device. Idempotent.
    fn close(&mut self);
}

/// `hidapi` backed provider
pub struct HidProvider {
    api: HidApi,
    mode: DeviceMode,
}

impl HidProvider {
    pub fn new(mode: DeviceMode) -> Result<Self, DeviceError> {
        let api = HidApi::new().map_err(|e| DeviceError::Enumerate(e.to_string()))?;
        Ok(Self { api, mode })
    }
}

impl DeviceProvider for HidProvider {
    type Handle = HidHandle;

    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>, DeviceError> {
        self.api
            .refresh_devices()
            .map_err(|e| DeviceError::Enumerate(e.to_string()))?;

        Ok(self
            .api
            .device_list()
            .map(|info| DeviceInfo {
                product_name: info.product_string().unwrap_or_default().to_string(),
                path: info.path().to_string_lossy().into_owned(),
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
            })
            .collect())
    }

    fn open(
        &mut self,
        device: &DeviceInfo,
        parser: ReportParser,
        on_event: EventCallback,
    ) -> Result<HidHandle, DeviceError> {
        let open_err = |reason: String| DeviceError::Open {
            path: device.path.clone(),
            reason,
        };

        let path = CString::new(device.path.clone()).map_err(|e| open_err(e.to_string()))?;
        let hid = self
            .api
            .open_path(&path)
            .map_err(|e| open_err(e.to_string()))?;

        if self.mode == DeviceMode::Poll {
            hid.set_blocking_mode(false)
                .map_err(|e| open_err(e.to_string()))?;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let mode = self.mode;
        let thread = std::thread::Builder::new()
            .name("hid-reader".to_string())
            .spawn(move || read_loop(hid, parser, mode, stop_flag, on_event))
            .map_err(|e| open_err(e.to_string()))?;

        debug!("Opened HID device {} in {:?} mode", device.path, mode);

        Ok(HidHandle {
            path: device.path.clone(),
            stop,
            thread: Some(thread),
        })
    }
}

fn read_loop(
    hid: HidDevice,
    parser: ReportParser,
    mode: DeviceMode,
    stop: Arc<AtomicBool>,
    on_event: EventCallback,
) {
    let mut buf = [0u8; REPORT_BUFFER_SIZE];

    while !stop.load(Ordering::Acquire) {
        let result = match mode {
            DeviceMode::Stream => hid.read_timeout(&mut buf, READ_TIMEOUT_MS),
            DeviceMode::Poll => hid.read(&mut buf),
        };

        match result {
            Ok(0) => {
                if mode == DeviceMode::Poll {
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
            Ok(n) => {
                trace!("HID report: {:02X?}", &buf[..n]);
                if let Some(report) = parser.parse(&buf[..n]) {
                    on_event(DeviceEvent::Data(report));
                }
            }
            Err(e) => {
                if !stop.load(Ordering::Acquire) {
                    on_event(DeviceEvent::Error(e.into()));
                }
                break;
            }
        }
    }
}

/// Open `hidapi` device with its reader thread
pub struct HidHandle {
    path: String,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceHandle for HidHandle {
    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("HID reader thread for {} panicked", self.path);
            }
            debug!("Closed HID device {}", self.path);
        }
    }
}

impl Drop for HidHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_boot_report() {
        let report = ReportParser::Keyboard
            .parse(&[0x02, 0x00, 0x04, 0x05, 0x00, 0x00, 0x00, 0x00])
            .unwrap();
        assert_eq!(report.modifiers, 0x02);
        assert_eq!(report.keys, vec![KeyCode(0x04), KeyCode(0x05)]);
        assert_eq!(report.primary(), Some(KeyCode(0x04)));
    }

    #[test]
    fn test_parse_release_and_rollover() {
        let released = ReportParser::Keyboard.parse(&[0; 8]).unwrap();
        assert!(released.keys.is_empty());
        assert_eq!(released.primary(), None);

        let rollover = ReportParser::Keyboard
            .parse(&[0, 0, 1, 1, 1, 1, 1, 1])
            .unwrap();
        assert!(rollover.keys.is_empty());
    }

    #[test]
    fn test_parse_short_reports() {
        assert_eq!(ReportParser::Keyboard.parse(&[0, 0]), None);
        let short = ReportParser::Keyboard.parse(&[0, 0, 0x1E]).unwrap();
        assert_eq!(short.keys, vec![KeyCode(0x1E)]);
    }

    #[test]
    fn test_char_to_usage() {
        assert_eq!(char_to_usage('a'), Some(0x04));
        assert_eq!(char_to_usage('Z'), Some(0x1D));
        assert_eq!(char_to_usage('1'), Some(0x1E));
        assert_eq!(char_to_usage('0'), Some(0x27));
        assert_eq!(char_to_usage('/'), Some(0x38));
        assert_eq!(char_to_usage('é'), None);
    }
}
