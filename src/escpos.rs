//! Minimal ESC/POS byte-builder.
//!
//! The daemon does not render business receipts — it relays already-encoded
//! payloads fetched from the cloud (§4.D) or posted directly by LAN clients
//! (§4.G). This builder exists only for the two things the daemon itself
//! emits: the cash-drawer kick (§4.B `open_cash_drawer_by_role`) and a small
//! local diagnostic test page (§4.B `test_page`).

const ESC: u8 = 0x1b;
const GS: u8 = 0x1d;
const LF: u8 = 0x0a;

/// The five-byte cash-drawer kick sequence, sent via the same transport as
/// ticket bytes (§6).
pub const CASH_DRAWER_KICK: [u8; 5] = [ESC, 0x70, 0x00, 0x19, 0xFA];

#[derive(Debug, Clone, Copy)]
pub enum Alignment {
    Left = 0,
    Center = 1,
}

pub struct EscposBuilder {
    buffer: Vec<u8>,
}

impl EscposBuilder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }

    pub fn initialize(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x40]);
        self
    }

    pub fn text(&mut self, text: &str) -> &mut Self {
        self.buffer.extend_from_slice(text.as_bytes());
        self
    }

    pub fn feed(&mut self, lines: u8) -> &mut Self {
        for _ in 0..lines {
            self.buffer.push(LF);
        }
        self
    }

    pub fn align(&mut self, alignment: Alignment) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, alignment as u8]);
        self
    }

    pub fn bold(&mut self, enabled: bool) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x45, if enabled { 1 } else { 0 }]);
        self
    }

    pub fn draw_line(&mut self, width: usize) -> &mut Self {
        let line: String = "-".repeat(width);
        self.text(&line).feed(1)
    }

    pub fn cut(&mut self) -> &mut Self {
        self.feed(3);
        self.buffer.extend_from_slice(&[GS, 0x56, 0]);
        self
    }

    pub fn open_drawer(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&CASH_DRAWER_KICK);
        self
    }
}

impl Default for EscposBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the byte buffer for `test_page` diagnostics (§4.B).
pub fn build_test_page(printer_name: &str) -> Vec<u8> {
    EscposBuilder::new()
        .initialize()
        .align(Alignment::Center)
        .bold(true)
        .text("TEST PRINT")
        .feed(1)
        .bold(false)
        .draw_line(32)
        .align(Alignment::Left)
        .text(&format!("Printer: {printer_name}"))
        .feed(1)
        .text("Status: OK")
        .feed(1)
        .cut()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cash_drawer_kick_matches_spec_bytes() {
        assert_eq!(CASH_DRAWER_KICK, [0x1B, 0x70, 0x00, 0x19, 0xFA]);
    }

    #[test]
    fn test_page_ends_with_cut() {
        let bytes = build_test_page("Kitchen 1");
        assert_eq!(&bytes[bytes.len() - 3..], &[GS, 0x56, 0]);
        assert!(String::from_utf8_lossy(&bytes).contains("Kitchen 1"));
    }
}
