//! Resistor-ladder buttons on a single ADC channel

/// Upper edges of the ladder levels on a 10-bit scale
pub const THRESHOLDS: [u16; 4] = [205, 410, 615, 820];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    /// Nothing pressed
    None,
    /// Toggle display power
    Display,
    /// Post sensors now
    Post,
    /// Fetch the UV index now
    Uv,
    /// Next screen
    NextView,
}

impl Button {
    /// Decode a 10-bit reading
    pub fn from_level(level: u16) -> Self {
        match THRESHOLDS.iter().filter(|&&t| level > t).count() {
            0 => Button::None,
            1 => Button::Display,
            2 => Button::Post,
            3 => Button::Uv,
            _ => Button::NextView,
        }
    }
}

/// Scale a raw ADC reading of `bits` resolution to the 10-bit ladder scale
pub fn scale_to_10bit(raw: u16, bits: u8) -> u16 {
    if bits <= 10 {
        raw << (10 - bits)
    } else {
        raw >> (bits - 10).min(15)
    }
}

/// Reports a button only when the decoded level changes
#[derive(Debug)]
pub struct ButtonPad {
    last: Button,
}

impl ButtonPad {
    pub fn new() -> Self {
        Self { last: Button::None }
    }

    /// Feed one 10-bit reading, returning the newly pressed button
    pub fn update(&mut self, level: u16) -> Option<Button> {
        let button = Button::from_level(level);
        if button == self.last {
            return None;
        }
        self.last = button;
        (button != Button::None).then_some(button)
    }
}

impl Default for ButtonPad {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_levels() {
        assert_eq!(Button::from_level(0), Button::None);
        assert_eq!(Button::from_level(205), Button::None);
        assert_eq!(Button::from_level(206), Button::Display);
        assert_eq!(Button::from_level(500), Button::Post);
        assert_eq!(Button::from_level(700), Button::Uv);
        assert_eq!(Button::from_level(1023), Button::NextView);
    }

    #[test]
    fn twelve_bit_readings_are_scaled_down() {
        assert_eq!(scale_to_10bit(4095, 12), 1023);
        assert_eq!(scale_to_10bit(1023, 10), 1023);
        assert_eq!(scale_to_10bit(255, 8), 1020);
    }

    #[test]
    fn only_changes_are_reported() {
        let mut pad = ButtonPad::new();
        assert_eq!(pad.update(100), None);
        assert_eq!(pad.update(900), Some(Button::NextView));
        // held
        assert_eq!(pad.update(910), None);
        assert_eq!(pad.update(0), None);
        assert_eq!(pad.update(900), Some(Button::NextView));
    }
}
