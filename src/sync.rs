//! ==============================================================================
//! sync.rs - keeps the panel in step with the board
//! ==============================================================================
//!
//! purpose:
//!     - polls: sends "dat" on a fixed timer while the socket is open
//!     - inbound: parses each snapshot and applies it to the view
//!     - outbound: turns user actions into command tokens
//!
//! there is no flow control. a request goes out on every tick whether or not
//! the previous one was answered, and anything sent while disconnected is
//! dropped. a bad payload is logged and skipped; the next tick carries on.
//!
//! relationships:
//!     - implements: connection.rs ConnectionEvents
//!     - writes: view.rs PanelView (shared with dashboard.rs)
//!     - uses: protocol.rs (commands + snapshot parsing)
//!
//! ==============================================================================

use crate::connection::{Connection, ConnectionEvents, SendOutcome};
use crate::protocol::{parse_inbound, ButtonId, Color, Command, Inbound, LcdRow, ProtocolError};
use crate::view::{ColorPicker, PanelView};

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub type SharedView = Arc<RwLock<PanelView>>;

pub struct ViewSync {
    connection: Connection,
    view: SharedView,
    show_snapshots: bool,
}

impl ViewSync {
    pub fn new(connection: Connection, view: SharedView, show_snapshots: bool) -> Self {
        Self { connection, view, show_snapshots }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn read_view(&self) -> RwLockReadGuard<'_, PanelView> {
        self.view.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_view(&self) -> RwLockWriteGuard<'_, PanelView> {
        self.view.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ==========================================================================
    // polling
    // ==========================================================================

    /// fixed-rate snapshot requests; runs until the task is dropped
    pub async fn run_poller(&self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("[SYNC] Polling every {}ms", period.as_millis());

        loop {
            ticker.tick().await;
            if self.connection.is_open() {
                self.connection.send(&Command::RequestSnapshot);
            }
        }
    }

    // ==========================================================================
    // user actions
    // ==========================================================================

    pub fn toggle_button(&self, button: ButtonId) -> SendOutcome {
        self.connection.send(&Command::ToggleButton(button))
    }

    /// the picker's selection is final; push its hex to the rgb led
    pub fn pick_color(&self, picker: &impl ColorPicker) -> Result<SendOutcome, ProtocolError> {
        let hex = picker.to_hex_string();
        let color = Color::from_hex(&hex)?;
        tracing::debug!("[SYNC] color picked: {}", hex);
        self.write_view().rgb.select(color);
        Ok(self.connection.send(&Command::SetRgb(color)))
    }

    pub fn open_lcd_prompt(&self) {
        self.write_view().lcd_prompt_open = true;
    }

    /// show the text locally, send one command per row, close the prompt
    pub fn submit_lcd(&self, row1: &str, row2: &str) -> [SendOutcome; 2] {
        {
            let mut view = self.write_view();
            view.show_lcd_text(row1, row2);
            view.lcd_prompt_open = false;
        }
        [
            self.connection.send(&Command::SetLcdRow { row: LcdRow::Top, text: row1.to_string() }),
            self.connection.send(&Command::SetLcdRow { row: LcdRow::Bottom, text: row2.to_string() }),
        ]
    }

    pub fn cancel_lcd(&self) {
        self.write_view().lcd_prompt_open = false;
    }
}

impl ConnectionEvents for ViewSync {
    fn on_open(&self) {
        self.write_view().connection_opened();
    }

    fn on_close(&self) {
        self.write_view().connection_lost();
    }

    fn on_message(&self, payload: &str) {
        match parse_inbound(payload) {
            Ok(Inbound::Snapshot(snapshot)) => {
                if self.show_snapshots {
                    tracing::info!(
                        "[SYNC] btn1={} btn2={} rgb={:?} ldr={:?}",
                        snapshot.button(ButtonId::Btn1).is_on(),
                        snapshot.button(ButtonId::Btn2).is_on(),
                        snapshot.rgb,
                        snapshot.ldr
                    );
                }
                self.write_view().apply(&snapshot);
            }
            Ok(Inbound::Rejected(reason)) => {
                tracing::warn!("[SYNC] board rejected a command: {}", reason);
            }
            Err(e) => {
                tracing::warn!("[SYNC] ⚠ skipping payload: {}", e);
                self.write_view().parse_failures += 1;
            }
        }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::memory::{DeviceEnd, MemoryConnector};
    use crate::connection::{ConnectionManager, ConnectionState};
    use crate::view::{BUTTON_MARKER, CONNECTION_CLOSED_NOTICE};

    /// picker whose only state is the hex string it reports
    struct HexPicker(&'static str);

    impl ColorPicker for HexPicker {
        fn to_hex_string(&self) -> String {
            self.0.to_string()
        }

        fn set_preview_background(&mut self, _css_color: &str) {}
    }

    const SNAPSHOT: &str = r##"{"rgb":"#102030","btn1":1,"btn2":0,"ldr":600,"lcd_connected":false}"##;

    struct Harness {
        sync: Arc<ViewSync>,
        device: DeviceEnd,
        _manager: ConnectionManager<MemoryConnector>,
    }

    async fn connected() -> Harness {
        let (connector, device) = MemoryConnector::with_session();
        let manager =
            ConnectionManager::new("ws://board/ws", Duration::from_millis(2000), Arc::new(connector));
        let sync = Arc::new(ViewSync::new(
            manager.connection(),
            Arc::new(RwLock::new(PanelView::default())),
            false,
        ));
        manager.start(sync.clone());
        manager
            .connection()
            .subscribe()
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .unwrap();
        Harness { sync, device, _manager: manager }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn polls_twenty_times_a_second() {
        let mut h = connected().await;
        let poller = h.sync.clone();
        tokio::spawn(async move { poller.run_poller(Duration::from_millis(50)).await });

        settle().await;
        h.device.drain();
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let sent = h.device.drain();
        assert!(sent.iter().all(|m| m == "dat"));
        assert!((19..=21).contains(&sent.len()), "sent {} requests", sent.len());
    }

    #[tokio::test(start_paused = true)]
    async fn poller_stays_quiet_while_disconnected() {
        // first attempt refused, the retry 2000ms later gets a live session
        let connector = MemoryConnector::refusing();
        connector.push_refusal();
        let mut device = connector.push_session();
        let manager =
            ConnectionManager::new("ws://board/ws", Duration::from_millis(2000), Arc::new(connector));
        let connection = manager.connection();
        let sync = Arc::new(ViewSync::new(
            manager.connection(),
            Arc::new(RwLock::new(PanelView::default())),
            false,
        ));
        manager.start(sync.clone());
        let poller = sync.clone();
        tokio::spawn(async move { poller.run_poller(Duration::from_millis(50)).await });

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(!connection.is_open());
        assert_eq!(connection.dropped(), 0);
        assert!(device.drain().is_empty());
        assert_eq!(sync.read_view().banner.as_deref(), Some(CONNECTION_CLOSED_NOTICE));

        connection.subscribe().wait_for(|s| *s == ConnectionState::Open).await.unwrap();
        settle().await;
        device.drain();
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let sent = device.drain();
        assert!(sent.iter().all(|m| m == "dat"));
        assert!((19..=21).contains(&sent.len()), "sent {} requests", sent.len());
        assert_eq!(connection.dropped(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_snapshot_updates_present_fields() {
        let h = connected().await;
        h.device.reply.send(r##"{"rgb":"#102030","btn1":1,"btn2":1}"##.into()).unwrap();
        settle().await;

        let view = h.sync.read_view();
        assert_eq!(view.parse_failures, 0);
        assert_eq!(view.snapshots_applied, 1);
        assert_eq!(view.buttons[0].label, format!("on{}", BUTTON_MARKER));
        assert_eq!(view.buttons[1].label, format!("on{}", BUTTON_MARKER));
        assert_eq!(view.rgb.background, "#102030");
        assert_eq!(view.ldr.reading, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_updates_view() {
        let h = connected().await;
        h.device.reply.send(SNAPSHOT.into()).unwrap();
        settle().await;

        let view = h.sync.read_view();
        assert!(view.connected);
        assert!(view.banner.is_none());
        assert_eq!(view.buttons[0].label, format!("on{}", BUTTON_MARKER));
        assert_eq!(view.buttons[1].label, format!("off{}", BUTTON_MARKER));
        assert_eq!(view.rgb.background, "#102030");
        assert_eq!(view.ldr.gray, 150);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payload_is_skipped() {
        let h = connected().await;
        h.device.reply.send("{not json".into()).unwrap();
        h.device.reply.send(r#"{"error": "No es un comando válido."}"#.into()).unwrap();
        h.device.reply.send(SNAPSHOT.into()).unwrap();
        settle().await;

        let view = h.sync.read_view();
        assert_eq!(view.parse_failures, 1);
        assert_eq!(view.snapshots_applied, 1);
        assert!(view.connected);
    }

    #[tokio::test(start_paused = true)]
    async fn lcd_submit_round_trip() {
        let mut h = connected().await;
        h.sync.open_lcd_prompt();
        assert!(h.sync.read_view().lcd_prompt_open);

        let outcomes = h.sync.submit_lcd("Hello", "World");
        assert_eq!(outcomes, [SendOutcome::Sent, SendOutcome::Sent]);

        assert_eq!(
            h.device.drain(),
            vec![format!("lcd=0Hello{}", " ".repeat(11)), format!("lcd=1World{}", " ".repeat(11))]
        );
        let view = h.sync.read_view();
        assert!(!view.lcd_prompt_open);
        let (top, bottom) = view.lcd_rows();
        assert_eq!(top, format!("Hello{}", " ".repeat(11)));
        assert_eq!(bottom, format!("World{}", " ".repeat(11)));
    }

    #[tokio::test(start_paused = true)]
    async fn lcd_cancel_sends_nothing() {
        let mut h = connected().await;
        h.sync.open_lcd_prompt();
        h.sync.cancel_lcd();
        assert!(!h.sync.read_view().lcd_prompt_open);
        assert!(h.device.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn button_and_color_commands() {
        let mut h = connected().await;
        assert_eq!(h.sync.toggle_button(ButtonId::Btn2), SendOutcome::Sent);
        assert_eq!(h.sync.pick_color(&HexPicker("#ab0001")).unwrap(), SendOutcome::Sent);
        assert_eq!(h.device.drain(), vec!["btn2", "rgb=#AB0001"]);
        assert_eq!(h.sync.read_view().rgb.value, Color::new(0xab, 0, 0x01));
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_picker_hex_sends_nothing() {
        let mut h = connected().await;
        assert!(matches!(
            h.sync.pick_color(&HexPicker("teal")),
            Err(ProtocolError::InvalidColor(_))
        ));
        assert!(h.device.drain().is_empty());
        assert_eq!(h.sync.read_view().rgb.value, Color::default());
    }

    #[tokio::test(start_paused = true)]
    async fn actions_are_dropped_after_close() {
        let h = connected().await;
        drop(h.device);
        settle().await;

        assert_eq!(h.sync.toggle_button(ButtonId::Btn1), SendOutcome::Dropped);
        assert_eq!(h.sync.submit_lcd("a", "b"), [SendOutcome::Dropped, SendOutcome::Dropped]);
        assert_eq!(h.sync.read_view().banner.as_deref(), Some(CONNECTION_CLOSED_NOTICE));
    }
}
