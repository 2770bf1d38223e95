//! Per-chain control lines on the controller board.
//!
//! Each hash board hangs off five GPIO lines: power enable, start enable,
//! reset, plug detect and a status LED. Plug detect and LED are optional
//! on carriers that do not route them.

use std::thread;
use std::time::Duration;

use serde::Deserialize;

use crate::hw_trait::gpio::{Gpio, GpioPin, PinMode, PinValue};
use crate::hw_trait::Result;
use crate::tracing::prelude::*;

/// Spacing of the reset pulse edges.
pub const DEFAULT_RESET_PULSE: Duration = Duration::from_millis(500);

const POWER_EN_BASE: u32 = 872;
const START_EN_BASE: u32 = 854;
const RESET_BASE: u32 = 855;

/// GPIO numbers for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BoardPins {
    pub power_en: u32,
    pub start_en: u32,
    pub reset: u32,
    #[serde(default)]
    pub plug: Option<u32>,
    #[serde(default)]
    pub led: Option<u32>,
}

impl BoardPins {
    /// Stock controller wiring for chain `chain`.
    pub fn for_chain(chain: u8) -> Self {
        let chain = u32::from(chain);
        Self {
            power_en: POWER_EN_BASE + chain,
            start_en: START_EN_BASE + 2 * chain,
            reset: RESET_BASE + 2 * chain,
            plug: None,
            led: None,
        }
    }
}

/// Cuts a chain's supply. Held by the chain so the thermal interlock can
/// reach it without knowing about GPIO.
pub trait PowerControl: Send {
    fn power_off(&mut self) -> Result<()>;

    /// Drive the status LED: lit (low) while mining, dark on teardown.
    fn indicate_mining(&mut self, mining: bool) -> Result<()>;
}

pub struct ChainBoard<P: GpioPin> {
    chain: u8,
    power_en: P,
    start_en: P,
    reset: P,
    plug: Option<P>,
    led: Option<P>,
    reset_pulse: Duration,
}

impl<P: GpioPin> ChainBoard<P> {
    pub fn open<G: Gpio<Pin = P>>(gpio: &mut G, chain: u8, pins: &BoardPins) -> Result<Self> {
        let mut output = |number: u32| -> Result<P> {
            let mut pin = gpio.pin(number)?;
            pin.set_mode(PinMode::Output)?;
            pin.write(PinValue::Low)?;
            Ok(pin)
        };
        let power_en = output(pins.power_en)?;
        let start_en = output(pins.start_en)?;
        let reset = output(pins.reset)?;
        let led = pins.led.map(&mut output).transpose()?;
        let plug = match pins.plug {
            Some(number) => {
                let mut pin = gpio.pin(number)?;
                pin.set_mode(PinMode::Input)?;
                Some(pin)
            }
            None => None,
        };
        Ok(Self::from_pins(chain, power_en, start_en, reset, plug, led))
    }

    pub fn from_pins(
        chain: u8,
        power_en: P,
        start_en: P,
        reset: P,
        plug: Option<P>,
        led: Option<P>,
    ) -> Self {
        Self {
            chain,
            power_en,
            start_en,
            reset,
            plug,
            led,
            reset_pulse: DEFAULT_RESET_PULSE,
        }
    }

    pub fn with_reset_pulse(mut self, pulse: Duration) -> Self {
        self.reset_pulse = pulse;
        self
    }

    /// Power the board and pulse reset. Returns whether a board is seated.
    pub fn power_up(&mut self) -> Result<bool> {
        self.power_en.write(PinValue::High)?;
        self.start_en.write(PinValue::High)?;
        for level in [PinValue::High, PinValue::Low, PinValue::High] {
            self.reset.write(level)?;
            thread::sleep(self.reset_pulse);
        }
        let plugged = self.is_plugged()?;
        if plugged {
            debug!(chain = self.chain, "Chain powered up");
        } else {
            warn!(chain = self.chain, "No hash board inserted");
        }
        Ok(plugged)
    }

    /// Plug detect reads low when a board is present.
    pub fn is_plugged(&mut self) -> Result<bool> {
        match &mut self.plug {
            Some(pin) => Ok(pin.read()? == PinValue::Low),
            None => Ok(true),
        }
    }
}

impl<P: GpioPin> PowerControl for ChainBoard<P> {
    fn power_off(&mut self) -> Result<()> {
        warn!(chain = self.chain, "Cutting chain power");
        self.power_en.write(PinValue::Low)
    }

    fn indicate_mining(&mut self, mining: bool) -> Result<()> {
        match &mut self.led {
            Some(led) => led.write(PinValue::from(!mining)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw_trait::gpio::fake::FakePin;

    fn make_board(plug: Option<FakePin>) -> (ChainBoard<FakePin>, [FakePin; 4]) {
        let pins = [
            FakePin::default(),
            FakePin::default(),
            FakePin::default(),
            FakePin::default(),
        ];
        let board = ChainBoard::from_pins(
            1,
            pins[0].clone(),
            pins[1].clone(),
            pins[2].clone(),
            plug,
            Some(pins[3].clone()),
        )
        .with_reset_pulse(Duration::ZERO);
        (board, pins)
    }

    #[test]
    fn should_sequence_power_and_reset() {
        let (mut board, [power, start, reset, _]) = make_board(None);

        assert!(board.power_up().unwrap());
        assert_eq!(power.writes(), vec![PinValue::High]);
        assert_eq!(start.writes(), vec![PinValue::High]);
        assert_eq!(
            reset.writes(),
            vec![PinValue::High, PinValue::Low, PinValue::High]
        );
    }

    #[test]
    fn should_report_missing_board_when_plug_reads_high() {
        let (mut board, _) = make_board(Some(FakePin::reading(PinValue::High)));
        assert!(!board.power_up().unwrap());

        let (mut board, _) = make_board(Some(FakePin::reading(PinValue::Low)));
        assert!(board.power_up().unwrap());
    }

    #[test]
    fn should_drop_power_enable_on_power_off() {
        let (mut board, [power, _, _, led]) = make_board(None);
        board.power_up().unwrap();
        board.indicate_mining(true).unwrap();
        board.power_off().unwrap();

        assert_eq!(power.writes(), vec![PinValue::High, PinValue::Low]);
        assert_eq!(led.writes(), vec![PinValue::Low]);
    }

    #[test]
    fn should_derive_stock_pins() {
        let pins = BoardPins::for_chain(2);
        assert_eq!((pins.power_en, pins.start_en, pins.reset), (874, 858, 859));
    }
}
