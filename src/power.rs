use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use crate::{blocking_timer::BlockingTimer, module_timing};

/// Power control capability for the physical module.
///
/// The driver only ever needs to switch the module on or off and to sample
/// whether it currently has power; everything else goes over the serial link.
pub trait ModemPower {
    fn turn_on(&mut self);
    fn turn_off(&mut self);
    fn is_on(&mut self) -> bool;
}

/// Board revisions of the bee-socket carrier. The revision decides which pin
/// switches power and whether the on/off pin is pulsed or level-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HwVersion {
    /// On/off pin pulses the module's PWRKEY input
    V04,
    /// On/off pin is level-driven
    V05,
    /// Switched 3V3 supply plus level-driven on/off pin
    V06,
}

/// Pin stand-in for wirings that do not connect a given control line.
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = Infallible;
}

impl InputPin for NoPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// GPIO based power control: a switched supply pin, an on/off (DTR-like)
/// pin and a status (CTS-like) readback pin.
///
/// Pass [`NoPin`] for lines the board does not wire up.
pub struct PinPower<VCC, ONOFF, STATUS> {
    vcc: VCC,
    onoff: ONOFF,
    status: STATUS,
    version: HwVersion,
}

impl<VCC, ONOFF, STATUS> PinPower<VCC, ONOFF, STATUS>
where
    VCC: OutputPin,
    ONOFF: OutputPin,
    STATUS: InputPin,
{
    pub fn new(vcc: VCC, onoff: ONOFF, status: STATUS, version: HwVersion) -> Self {
        Self {
            vcc,
            onoff,
            status,
            version,
        }
    }

    fn toggle(&mut self) {
        self.onoff.set_high().ok();
        BlockingTimer::after(module_timing::pwr_toggle_time(self.version)).wait();
        self.onoff.set_low().ok();
    }

    fn wait_status(&mut self, expected: bool) -> bool {
        let timer = BlockingTimer::after(module_timing::status_settle_time());
        // The status pin follows the module's internal regulator with some
        // delay; sample it rather than the timer where possible.
        let mut seen = self.is_on() == expected;
        if !seen {
            timer.wait();
            seen = self.is_on() == expected;
        }
        seen
    }
}

impl<VCC, ONOFF, STATUS> ModemPower for PinPower<VCC, ONOFF, STATUS>
where
    VCC: OutputPin,
    ONOFF: OutputPin,
    STATUS: InputPin,
{
    fn turn_on(&mut self) {
        if self.is_on() {
            return;
        }
        match self.version {
            HwVersion::V04 => {
                self.toggle();
            }
            HwVersion::V05 => {
                self.onoff.set_high().ok();
            }
            HwVersion::V06 => {
                self.vcc.set_high().ok();
                self.onoff.set_high().ok();
            }
        }
        if !self.wait_status(true) {
            warn!("status pin did not follow power-on");
        }
    }

    fn turn_off(&mut self) {
        if !self.is_on() {
            return;
        }
        match self.version {
            HwVersion::V04 => {
                self.toggle();
            }
            HwVersion::V05 => {
                self.onoff.set_low().ok();
            }
            HwVersion::V06 => {
                self.onoff.set_low().ok();
                self.vcc.set_low().ok();
            }
        }
        if !self.wait_status(false) {
            warn!("status pin did not follow power-off");
        }
    }

    fn is_on(&mut self) -> bool {
        self.status.is_high().unwrap_or(false)
    }
}

/// Power control stand-in for modules that are permanently powered.
pub struct NoPower;

impl ModemPower for NoPower {
    fn turn_on(&mut self) {}

    fn turn_off(&mut self) {}

    fn is_on(&mut self) -> bool {
        true
    }
}
