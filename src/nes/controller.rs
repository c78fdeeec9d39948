pub const BUTTON_A: u8 = 0x01;
pub const BUTTON_B: u8 = 0x02;
pub const BUTTON_SELECT: u8 = 0x04;
pub const BUTTON_START: u8 = 0x08;
pub const BUTTON_UP: u8 = 0x10;
pub const BUTTON_DOWN: u8 = 0x20;
pub const BUTTON_LEFT: u8 = 0x40;
pub const BUTTON_RIGHT: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPort {
    One,
    Two,
}

impl ControllerPort {
    pub(crate) fn index(self) -> usize {
        match self {
            ControllerPort::One => 0,
            ControllerPort::Two => 1,
        }
    }
}

/// Buttons in the order the shift register reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
}

impl Button {
    pub fn mask(self) -> u8 {
        match self {
            Button::A => BUTTON_A,
            Button::B => BUTTON_B,
            Button::Select => BUTTON_SELECT,
            Button::Start => BUTTON_START,
            Button::Up => BUTTON_UP,
            Button::Down => BUTTON_DOWN,
            Button::Left => BUTTON_LEFT,
            Button::Right => BUTTON_RIGHT,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let button = match name.to_ascii_lowercase().as_str() {
            "a" => Button::A,
            "b" => Button::B,
            "select" => Button::Select,
            "start" => Button::Start,
            "up" => Button::Up,
            "down" => Button::Down,
            "left" => Button::Left,
            "right" => Button::Right,
            _ => return None,
        };
        Some(button)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Controller {
    state: u8,
    shift: u8,
    strobe: bool,
}

impl Controller {
    pub fn reset(&mut self) {
        self.shift = 0;
        self.strobe = false;
    }

    pub fn state(&self) -> u8 {
        self.state
    }

    pub fn set_state(&mut self, state: u8) {
        self.state = state;
        if self.strobe {
            self.shift = self.state;
        }
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        let state = if pressed {
            self.state | button.mask()
        } else {
            self.state & !button.mask()
        };
        self.set_state(state);
    }

    pub(crate) fn write_strobe(&mut self, value: u8) {
        self.strobe = (value & 0x01) != 0;
        if self.strobe {
            self.shift = self.state;
        }
    }

    pub(crate) fn read(&mut self) -> u8 {
        let bit = if self.strobe {
            self.state & 0x01
        } else {
            let out = self.shift & 0x01;
            self.shift = (self.shift >> 1) | 0x80;
            out
        };

        0x40 | bit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn shifts_buttons_in_hardware_order_after_latch() {
        let mut pad = Controller::default();
        pad.set_button(Button::A, true);
        pad.set_button(Button::Start, true);
        pad.set_button(Button::Right, true);

        pad.write_strobe(1);
        pad.write_strobe(0);

        let bits: Vec<u8> = (0..8).map(|_| pad.read() & 0x01).collect();
        assert_eq!(bits, vec![1, 0, 0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn reads_past_eighth_bit_return_one() {
        let mut pad = Controller::default();
        pad.write_strobe(1);
        pad.write_strobe(0);
        for _ in 0..8 {
            assert_eq!(pad.read(), 0x40);
        }
        assert_eq!(pad.read(), 0x41);
    }

    #[test]
    fn strobe_high_keeps_reporting_button_a() {
        let mut pad = Controller::default();
        pad.write_strobe(1);
        pad.set_button(Button::A, true);
        assert_eq!(pad.read(), 0x41);
        assert_eq!(pad.read(), 0x41);
        pad.set_button(Button::A, false);
        assert_eq!(pad.read(), 0x40);
    }

    #[test]
    fn button_names_parse_case_insensitively() {
        assert_eq!(Button::from_name("Start"), Some(Button::Start));
        assert_eq!(Button::from_name("LEFT"), Some(Button::Left));
        assert_eq!(Button::from_name("turbo"), None);
    }
}
