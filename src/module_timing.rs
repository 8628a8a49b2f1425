use embassy_time::Duration;

use crate::power::HwVersion;

/// Hold time of the on/off (DTR) pin used to toggle module power on boards
/// where the pin drives the PWRKEY input.
pub fn pwr_toggle_time(version: HwVersion) -> Duration {
    match version {
        HwVersion::V04 => Duration::from_millis(2500),
        HwVersion::V05 | HwVersion::V06 => Duration::from_millis(50),
    }
}

/// Time from power-on until the module accepts AT commands.
pub fn boot_time() -> Duration {
    Duration::from_secs(3)
}

/// Time to wait for the status (CTS) pin to follow a power transition.
pub fn status_settle_time() -> Duration {
    Duration::from_secs(2)
}

/// Time to keep the line quiet before and after the `+++` escape sequence.
pub fn escape_guard_time() -> Duration {
    Duration::from_secs(1)
}
