//! HD44780 character LCD behind a PCF8574 I2C backpack, driven in 4-bit
//! mode.

use std::{thread, time::Duration};

use rppal::i2c::I2c;

// PCF8574 pin mapping: P0=RS, P1=RW, P2=EN, P3=backlight, P4..P7=D4..D7.
const RS: u8 = 0b0000_0001;
const EN: u8 = 0b0000_0100;
const BACKLIGHT: u8 = 0b0000_1000;

const CMD_CLEAR: u8 = 0x01;
const CMD_ENTRY_MODE: u8 = 0x06; // increment, no shift
const CMD_DISPLAY_ON: u8 = 0x0C; // display on, cursor off, blink off
const CMD_FUNCTION_SET: u8 = 0x28; // 4-bit, 2 lines, 5x8 font
const CMD_SET_DDRAM: u8 = 0x80;

const ROW_OFFSETS: [u8; 2] = [0x00, 0x40];

pub struct Lcd {
    i2c: I2c,
}

impl Lcd {
    pub fn new(bus: u8, addr: u16) -> anyhow::Result<Self> {
        let mut i2c = I2c::with_bus(bus)?;
        i2c.set_slave_address(addr)?;
        let mut lcd = Self { i2c };

        // Power-on reset into 4-bit mode (HD44780 datasheet, figure 24).
        thread::sleep(Duration::from_millis(50));
        for wait in [5, 1, 1] {
            lcd.write_nibble(0x30, 0)?;
            thread::sleep(Duration::from_millis(wait));
        }
        lcd.write_nibble(0x20, 0)?;

        lcd.command(CMD_FUNCTION_SET)?;
        lcd.command(CMD_DISPLAY_ON)?;
        lcd.command(CMD_ENTRY_MODE)?;
        lcd.clear()?;

        tracing::info!(
            bus,
            addr = format_args!("0x{addr:02x}"),
            "lcd initialised"
        );
        Ok(lcd)
    }

    pub fn clear(&mut self) -> anyhow::Result<()> {
        self.command(CMD_CLEAR)?;
        thread::sleep(Duration::from_millis(2));
        Ok(())
    }

    /// Write `text` at the start of `row`. Non-ASCII characters show as '?'.
    pub fn write_line(&mut self, row: u8, text: &str) -> anyhow::Result<()> {
        let offset = ROW_OFFSETS
            .get(row as usize)
            .ok_or_else(|| anyhow::anyhow!("row {row} out of range"))?;
        self.command(CMD_SET_DDRAM | offset)?;
        for c in text.chars() {
            let byte = if c.is_ascii() { c as u8 } else { b'?' };
            self.send(byte, RS)?;
        }
        Ok(())
    }

    fn command(&mut self, cmd: u8) -> anyhow::Result<()> {
        self.send(cmd, 0)
    }

    fn send(&mut self, value: u8, mode: u8) -> anyhow::Result<()> {
        self.write_nibble(value & 0xF0, mode)?;
        self.write_nibble((value << 4) & 0xF0, mode)
    }

    fn write_nibble(&mut self, nibble: u8, mode: u8) -> anyhow::Result<()> {
        let data = nibble | mode | BACKLIGHT;
        self.i2c.write(&[data | EN])?;
        thread::sleep(Duration::from_micros(1));
        self.i2c.write(&[data & !EN])?;
        thread::sleep(Duration::from_micros(50));
        Ok(())
    }
}
