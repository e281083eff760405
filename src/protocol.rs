//! ==============================================================================
//! protocol.rs - board wire format (commands out, snapshots in)
//! ==============================================================================
//!
//! purpose:
//!     everything that crosses the websocket is plain text.
//!     - outbound: short command tokens ("dat", "btn1", "rgb=#RRGGBB", "lcd=0...")
//!     - inbound: one json status snapshot per "dat", or an {"error": ...} reply
//!       when the firmware did not recognise a command
//!
//! relationships:
//!     - used by: sync.rs (encodes user actions, decodes snapshots)
//!     - used by: view.rs (snapshot fields drive the widgets)
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// width of one lcd row on the 16x2 display
pub const LCD_COLUMNS: usize = 16;

/// token that asks the board for a status snapshot
pub const SNAPSHOT_REQUEST: &str = "dat";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid color {0:?}, expected #RRGGBB")]
    InvalidColor(String),
    #[error("unknown button {0:?}")]
    UnknownButton(String),
}

// ==============================================================================
// outbound
// ==============================================================================

/// the two board buttons that can be toggled remotely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ButtonId {
    Btn1,
    Btn2,
}

impl ButtonId {
    pub const ALL: [ButtonId; 2] = [ButtonId::Btn1, ButtonId::Btn2];

    /// token sent verbatim on click; also the widget's element id
    pub fn token(self) -> &'static str {
        match self {
            ButtonId::Btn1 => "btn1",
            ButtonId::Btn2 => "btn2",
        }
    }
}

impl FromStr for ButtonId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "btn1" => Ok(ButtonId::Btn1),
            "btn2" => Ok(ButtonId::Btn2),
            other => Err(ProtocolError::UnknownButton(other.to_string())),
        }
    }
}

/// 24-bit rgb color as picked by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// accepts `#RRGGBB` or `RRGGBB`, any case
    pub fn from_hex(s: &str) -> Result<Self, ProtocolError> {
        let digits = s.trim().trim_start_matches('#');
        let mut rgb = [0u8; 3];
        hex::decode_to_slice(digits, &mut rgb)
            .map_err(|_| ProtocolError::InvalidColor(s.to_string()))?;
        Ok(Self::new(rgb[0], rgb[1], rgb[2]))
    }

    /// `#RRGGBB`, upper-case, the form the firmware slices apart
    pub fn to_hex_string(&self) -> String {
        format!("#{}", hex::encode_upper([self.r, self.g, self.b]))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LcdRow {
    Top,
    Bottom,
}

impl LcdRow {
    pub fn digit(self) -> char {
        match self {
            LcdRow::Top => '0',
            LcdRow::Bottom => '1',
        }
    }
}

/// one fire-and-forget instruction for the board
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    RequestSnapshot,
    ToggleButton(ButtonId),
    SetRgb(Color),
    SetLcdRow { row: LcdRow, text: String },
}

impl Command {
    pub fn encode(&self) -> String {
        match self {
            Command::RequestSnapshot => SNAPSHOT_REQUEST.to_string(),
            Command::ToggleButton(button) => button.token().to_string(),
            Command::SetRgb(color) => format!("rgb={}", color.to_hex_string()),
            Command::SetLcdRow { row, text } => {
                format!("lcd={}{}", row.digit(), fit_lcd_row(text))
            }
        }
    }
}

/// pad with spaces or truncate to exactly one display row
pub fn fit_lcd_row(text: &str) -> String {
    let mut row: String = text.chars().take(LCD_COLUMNS).collect();
    let len = row.chars().count();
    row.extend(std::iter::repeat(' ').take(LCD_COLUMNS - len));
    row
}

// ==============================================================================
// inbound
// ==============================================================================

/// button state as sent by the firmware: normally 0/1, tolerated as a bool
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Int(i64),
    Num(f64),
}

impl Flag {
    pub fn is_on(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(i) => i == 1,
            Flag::Num(n) => n == 1.0,
        }
    }
}

/// board state; each one replaces whatever is on screen.
/// a missing button reads as off, a missing rgb/ldr leaves its widget alone.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Snapshot {
    #[serde(default)]
    pub btn1: Option<Flag>,
    #[serde(default)]
    pub btn2: Option<Flag>,
    #[serde(default)]
    pub rgb: Option<String>,
    #[serde(default)]
    pub ldr: Option<u16>,
    #[serde(default)]
    pub lcd_connected: bool,
    #[serde(default)]
    pub lcd1row: Option<String>,
    #[serde(default)]
    pub lcd2row: Option<String>,
    #[serde(default)]
    pub aht_connected: bool,
    #[serde(default)]
    pub tmp: Option<f32>,
    #[serde(default)]
    pub hum: Option<f32>,
    #[serde(default)]
    pub bh_connected: bool,
    #[serde(default)]
    pub lx: Option<f32>,
}

impl Snapshot {
    pub fn button(&self, button: ButtonId) -> Flag {
        let flag = match button {
            ButtonId::Btn1 => self.btn1,
            ButtonId::Btn2 => self.btn2,
        };
        flag.unwrap_or(Flag::Int(0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Snapshot(Snapshot),
    /// the board answered `{"error": ...}` to something it did not understand
    Rejected(String),
}

pub fn parse_inbound(payload: &str) -> Result<Inbound, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(payload)?;
    if let Some(reason) = value.get("error").and_then(|e| e.as_str()) {
        return Ok(Inbound::Rejected(reason.to_string()));
    }
    Ok(Inbound::Snapshot(serde_json::from_value(value)?))
}
