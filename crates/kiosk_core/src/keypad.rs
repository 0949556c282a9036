//! Numeric keypad buffer feeding codes to the session controller.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypadKey {
    Digit(u8),
    Clear,
    Backspace,
}

impl KeypadKey {
    /// Maps a typed character to a key. `C` clears, `<` and `⌫` delete.
    pub fn from_char(ch: char) -> Option<Self> {
        match ch {
            '0'..='9' => ch.to_digit(10).map(|digit| Self::Digit(digit as u8)),
            'c' | 'C' => Some(Self::Clear),
            '<' | '⌫' | '\u{8}' => Some(Self::Backspace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keypad {
    value: String,
    max_len: Option<usize>,
}

impl Keypad {
    pub fn new(max_len: Option<usize>) -> Self {
        Self {
            value: String::new(),
            max_len,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Returns false when the key changed nothing.
    pub fn press(&mut self, key: KeypadKey) -> bool {
        match key {
            KeypadKey::Digit(digit) if digit <= 9 => {
                if self.max_len.is_some_and(|max| self.value.len() >= max) {
                    return false;
                }
                self.value.push(char::from(b'0' + digit));
                true
            }
            KeypadKey::Digit(_) => false,
            KeypadKey::Clear => {
                let changed = !self.value.is_empty();
                self.value.clear();
                changed
            }
            KeypadKey::Backspace => self.value.pop().is_some(),
        }
    }

    /// Feeds every recognised character of `input`; the rest is ignored.
    pub fn press_str(&mut self, input: &str) -> usize {
        input
            .chars()
            .filter_map(KeypadKey::from_char)
            .filter(|key| self.press(*key))
            .count()
    }

    pub fn clear(&mut self) {
        self.value.clear();
    }

    /// Hands the entered code over and empties the buffer.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.value)
    }
}
