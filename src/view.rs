//! ==============================================================================
//! view.rs - widget state of the control panel
//! ==============================================================================
//!
//! purpose:
//!     holds what the panel currently shows. every snapshot from the board
//!     overwrites the widgets it carries (no diffs), so rendering is a pure
//!     function of the last snapshots plus local ui state (lcd prompt, banner).
//!
//! relationships:
//!     - written by: sync.rs (snapshots, connection events, user actions)
//!     - read by: dashboard.rs (html + json)
//!
//! ==============================================================================

use crate::protocol::{fit_lcd_row, ButtonId, Color, Flag, Snapshot, LCD_COLUMNS};
use serde::Serialize;

/// fixed inner element every button label ends with
pub const BUTTON_MARKER: &str = r#"<div class="button-inner center"></div>"#;

/// number of single-character cells on the 16x2 lcd preview
pub const LCD_CELLS: usize = LCD_COLUMNS * 2;

pub const CONNECTION_CLOSED_NOTICE: &str = "Connection closed";

// ==============================================================================
// pure helpers
// ==============================================================================

/// "on"/"off" followed by the inner marker
pub fn button_label(flag: Flag) -> String {
    let state = if flag.is_on() { "on" } else { "off" };
    format!("{}{}", state, BUTTON_MARKER)
}

/// channel value used for r, g and b of the light widget
pub fn ldr_gray(reading: u16) -> u16 {
    reading / 4
}

/// row 1 in cells 0-15, row 2 in cells 16-31
pub fn render_lcd_cells(row1: &str, row2: &str) -> [char; LCD_CELLS] {
    let mut cells = [' '; LCD_CELLS];
    for (cell, ch) in cells.iter_mut().zip(fit_lcd_row(row1).chars().chain(fit_lcd_row(row2).chars())) {
        *cell = ch;
    }
    cells
}

// ==============================================================================
// color picker capability
// ==============================================================================

/// what the panel needs from a color picker: read the pick, paint the preview
pub trait ColorPicker {
    fn to_hex_string(&self) -> String;
    fn set_preview_background(&mut self, css_color: &str);
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PickerPreview {
    /// last user pick
    pub value: Color,
    /// background mirrored from the board's current rgb output
    pub background: String,
}

impl PickerPreview {
    pub fn select(&mut self, color: Color) {
        self.value = color;
    }
}

impl ColorPicker for PickerPreview {
    fn to_hex_string(&self) -> String {
        self.value.to_hex_string()
    }

    fn set_preview_background(&mut self, css_color: &str) {
        self.background = css_color.to_string();
    }
}

// ==============================================================================
// widgets
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ButtonWidget {
    pub id: ButtonId,
    pub label: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LdrWidget {
    pub reading: u16,
    pub gray: u16,
}

impl LdrWidget {
    pub fn background(&self) -> String {
        format!("rgb({0},{0},{0})", self.gray)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LcdSection {
    pub visible: bool,
    pub cells: [char; LCD_CELLS],
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AhtSection {
    pub visible: bool,
    pub temperature: String,
    pub humidity: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LuxSection {
    pub visible: bool,
    pub lux: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PanelView {
    pub buttons: [ButtonWidget; 2],
    pub rgb: PickerPreview,
    pub ldr: LdrWidget,
    pub lcd: LcdSection,
    pub aht10: AhtSection,
    pub bh1750: LuxSection,
    pub lcd_prompt_open: bool,
    /// non-blocking notice shown while the board is unreachable
    pub banner: Option<String>,
    pub connected: bool,
    pub snapshots_applied: u64,
    pub parse_failures: u64,
    pub last_update_ms: u64,
}

impl Default for PanelView {
    fn default() -> Self {
        Self {
            buttons: ButtonId::ALL.map(|id| ButtonWidget { id, label: button_label(Flag::Int(0)) }),
            rgb: PickerPreview::default(),
            ldr: LdrWidget::default(),
            lcd: LcdSection { visible: false, cells: [' '; LCD_CELLS] },
            aht10: AhtSection::default(),
            bh1750: LuxSection::default(),
            lcd_prompt_open: false,
            banner: None,
            connected: false,
            snapshots_applied: 0,
            parse_failures: 0,
            last_update_ms: 0,
        }
    }
}

impl PanelView {
    /// overwrite the widgets a snapshot carries; absent fields keep their value
    pub fn apply(&mut self, snapshot: &Snapshot) {
        for widget in self.buttons.iter_mut() {
            widget.label = button_label(snapshot.button(widget.id));
        }

        if let Some(rgb) = &snapshot.rgb {
            self.rgb.set_preview_background(rgb);
        }

        if let Some(reading) = snapshot.ldr {
            self.ldr = LdrWidget { reading, gray: ldr_gray(reading) };
        }

        self.lcd.visible = snapshot.lcd_connected;
        if snapshot.lcd_connected {
            self.lcd.cells = render_lcd_cells(
                snapshot.lcd1row.as_deref().unwrap_or_default(),
                snapshot.lcd2row.as_deref().unwrap_or_default(),
            );
        }

        self.aht10.visible = snapshot.aht_connected;
        if snapshot.aht_connected {
            self.aht10.temperature = format_reading(snapshot.tmp, "°C");
            self.aht10.humidity = format_reading(snapshot.hum, "%");
        }

        self.bh1750.visible = snapshot.bh_connected;
        if snapshot.bh_connected {
            self.bh1750.lux = format_reading(snapshot.lx, "lx");
        }

        self.snapshots_applied += 1;
        self.last_update_ms = now_ms();
    }

    pub fn show_lcd_text(&mut self, row1: &str, row2: &str) {
        self.lcd.cells = render_lcd_cells(row1, row2);
    }

    /// lcd cells as the two display rows
    pub fn lcd_rows(&self) -> (String, String) {
        let (top, bottom) = self.lcd.cells.split_at(LCD_COLUMNS);
        (top.iter().collect(), bottom.iter().collect())
    }

    pub fn connection_opened(&mut self) {
        self.connected = true;
        self.banner = None;
    }

    pub fn connection_lost(&mut self) {
        self.connected = false;
        self.banner = Some(CONNECTION_CLOSED_NOTICE.to_string());
    }
}

// two decimals, like the firmware prints its floats
fn format_reading(value: Option<f32>, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.2} {}", v, unit),
        None => format!("-- {}", unit),
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
