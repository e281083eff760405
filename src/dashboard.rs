//! ==============================================================================
//! dashboard.rs - local web surface for the panel
//! ==============================================================================
//!
//! purpose:
//!     renders the current PanelView as html and turns clicks, color picks and
//!     lcd text submissions into ViewSync actions.
//!
//! routes:
//!     GET  /                 full page (widgets + a small refresh loop)
//!     GET  /panel            widget fragment only
//!     GET  /api/view         PanelView as json
//!     GET  /api/link         socket state + dropped command count
//!     POST /api/button/:id   toggle btn1 / btn2
//!     POST /api/rgb          color=#RRGGBB
//!     POST /api/lcd/prompt   show the lcd text prompt
//!     POST /api/lcd          row1=...&row2=...
//!     POST /api/lcd/cancel   hide the prompt, send nothing
//!
//! ==============================================================================

use crate::protocol::{ButtonId, Color};
use crate::sync::ViewSync;
use crate::view::{ColorPicker, PanelView, LCD_CELLS};

use anyhow::Result;
use axum::{
    extract::{Form, Path, State},
    http::StatusCode,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

type ApiResponse = (StatusCode, Json<Value>);

pub fn router(sync: Arc<ViewSync>) -> Router {
    Router::new()
        .route("/", get(page_handler))
        .route("/panel", get(panel_handler))
        .route("/api/view", get(view_handler))
        .route("/api/link", get(link_handler))
        .route("/api/button/:id", post(button_handler))
        .route("/api/rgb", post(rgb_handler))
        .route("/api/lcd/prompt", post(lcd_prompt_handler))
        .route("/api/lcd", post(lcd_submit_handler))
        .route("/api/lcd/cancel", post(lcd_cancel_handler))
        .layer(CorsLayer::permissive())
        .with_state(sync)
}

pub async fn run_server(bind: &str, sync: Arc<ViewSync>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("[WEB] ✓ Panel live at http://{}", listener.local_addr()?);
    axum::serve(listener, router(sync)).await?;
    Ok(())
}

// ==============================================================================
// handlers
// ==============================================================================

async fn page_handler(State(sync): State<Arc<ViewSync>>) -> Html<String> {
    let view = sync.read_view();
    Html(render_page(&view))
}

async fn panel_handler(State(sync): State<Arc<ViewSync>>) -> Html<String> {
    let view = sync.read_view();
    Html(render_panel(&view))
}

async fn view_handler(State(sync): State<Arc<ViewSync>>) -> Json<PanelView> {
    let view = sync.read_view();
    Json(view.clone())
}

async fn link_handler(State(sync): State<Arc<ViewSync>>) -> Json<Value> {
    let connection = sync.connection();
    Json(json!({"state": connection.state(), "dropped_commands": connection.dropped()}))
}

async fn button_handler(
    State(sync): State<Arc<ViewSync>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match id.parse::<ButtonId>() {
        Ok(button) => {
            let outcome = sync.toggle_button(button);
            ok(json!({"status": "ok", "button": button.token(), "outcome": format!("{:?}", outcome)}))
        }
        Err(e) => error(StatusCode::NOT_FOUND, e.to_string()),
    }
}

#[derive(Deserialize)]
struct RgbForm {
    color: String,
}

async fn rgb_handler(State(sync): State<Arc<ViewSync>>, Form(form): Form<RgbForm>) -> ApiResponse {
    let picker = match Color::from_hex(&form.color) {
        Ok(color) => {
            let mut picker = sync.read_view().rgb.clone();
            picker.select(color);
            picker
        }
        Err(e) => return error(StatusCode::BAD_REQUEST, e.to_string()),
    };
    match sync.pick_color(&picker) {
        Ok(outcome) => ok(json!({
            "status": "ok",
            "color": picker.to_hex_string(),
            "outcome": format!("{:?}", outcome)
        })),
        Err(e) => error(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[derive(Deserialize)]
struct LcdForm {
    #[serde(default)]
    row1: String,
    #[serde(default)]
    row2: String,
}

async fn lcd_prompt_handler(State(sync): State<Arc<ViewSync>>) -> ApiResponse {
    sync.open_lcd_prompt();
    ok(json!({"status": "ok"}))
}

async fn lcd_submit_handler(
    State(sync): State<Arc<ViewSync>>,
    Form(form): Form<LcdForm>,
) -> ApiResponse {
    let outcomes = sync.submit_lcd(&form.row1, &form.row2);
    ok(json!({"status": "ok", "outcome": format!("{:?}", outcomes)}))
}

async fn lcd_cancel_handler(State(sync): State<Arc<ViewSync>>) -> ApiResponse {
    sync.cancel_lcd();
    ok(json!({"status": "ok"}))
}

fn ok(body: Value) -> ApiResponse {
    (StatusCode::OK, Json(body))
}

fn error(status: StatusCode, message: String) -> ApiResponse {
    (status, Json(json!({"status": "error", "message": message})))
}

// ==============================================================================
// rendering
// ==============================================================================

const PAGE_SCRIPT: &str = r#"
async function refresh() {
  const active = document.activeElement;
  if (active && active.closest && active.closest('#lcd-prompt')) return;
  const res = await fetch('/panel');
  document.getElementById('panel').innerHTML = await res.text();
  const preview = document.getElementById('rgb-preview');
  if (preview) document.getElementById('rgb').style.backgroundColor = preview.dataset.bg;
}
async function post(url, body) {
  await fetch(url, {
    method: 'POST',
    headers: {'Content-Type': 'application/x-www-form-urlencoded'},
    body: body || ''
  });
  refresh();
}
function submitLcd(form) {
  post('/api/lcd', new URLSearchParams(new FormData(form)).toString());
  return false;
}
setInterval(refresh, 250);
"#;

pub fn render_page(view: &PanelView) -> String {
    format!(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>ESP8266 IO Board</title>
<style>
body {{ font-family: system-ui; padding: 1rem; background: #1a1a2e; color: #eee; }}
.banner {{ background: #ff6b6b; color: #111; padding: .5rem 1rem; border-radius: 6px; }}
.button {{ min-width: 5rem; padding: .5rem; }}
#ldr {{ width: 4rem; height: 4rem; border-radius: 50%; }}
.char {{ display: inline-block; width: 1ch; font-family: monospace; background: #2d6a4f; }}
[hidden] {{ display: none; }}
</style>
</head>
<body>
<h1>ESP8266 IO Board</h1>
{picker}
<div id="panel">{panel}</div>
<script>{script}</script>
</body>
</html>"#,
        picker = render_picker(view),
        panel = render_panel(view),
        script = PAGE_SCRIPT,
    )
}

/// the color input lives outside the refreshed fragment so an open
/// native picker popup is never detached from its element
pub fn render_picker(view: &PanelView) -> String {
    format!(
        r#"<input type="color" id="rgb" value="{value}" style="background-color: {bg}" onchange="post('/api/rgb', 'color=' + encodeURIComponent(this.value))">"#,
        value = view.rgb.value.to_hex_string().to_lowercase(),
        bg = html_escape(&view.rgb.background),
    )
}

pub fn render_panel(view: &PanelView) -> String {
    let mut html = String::new();

    if let Some(banner) = &view.banner {
        let _ = writeln!(html, r#"<div class="banner">{}</div>"#, html_escape(banner));
    }

    let _ = writeln!(html, r#"<section class="buttons">"#);
    for widget in &view.buttons {
        // label is built from fixed strings only
        let _ = writeln!(
            html,
            r#"<button id="{id}" class="button" onclick="post('/api/button/{id}')">{label}</button>"#,
            id = widget.id.token(),
            label = widget.label,
        );
    }
    let _ = writeln!(html, "</section>");

    // board's current rgb, copied onto #rgb by the page script
    let _ = writeln!(
        html,
        r#"<span id="rgb-preview" data-bg="{}" hidden></span>"#,
        html_escape(&view.rgb.background),
    );

    let _ = writeln!(
        html,
        r#"<div id="ldr" title="{reading}" style="background-color: {bg}"></div>"#,
        reading = view.ldr.reading,
        bg = view.ldr.background(),
    );

    let _ = writeln!(html, r#"<section class="lcd"{}>"#, hidden(view.lcd.visible));
    for (i, ch) in view.lcd.cells.iter().enumerate() {
        if i == LCD_CELLS / 2 {
            let _ = writeln!(html, "<br>");
        }
        let _ = write!(html, r#"<span class="char">{}</span>"#, html_escape(&ch.to_string()));
    }
    let _ = writeln!(html, r#"<button onclick="post('/api/lcd/prompt')">Edit</button>"#);
    if view.lcd_prompt_open {
        let (top, bottom) = view.lcd_rows();
        let _ = writeln!(
            html,
            r#"<form id="lcd-prompt" onsubmit="return submitLcd(this)">
<input name="row1" maxlength="16" value="{top}">
<input name="row2" maxlength="16" value="{bottom}">
<button type="submit">Send</button>
<button type="button" onclick="post('/api/lcd/cancel')">Cancel</button>
</form>"#,
            top = html_escape(top.trim_end()),
            bottom = html_escape(bottom.trim_end()),
        );
    }
    let _ = writeln!(html, "</section>");

    let _ = writeln!(
        html,
        r#"<section class="aht10"{}><span class="tmp">{}</span> <span class="hum">{}</span></section>"#,
        hidden(view.aht10.visible),
        html_escape(&view.aht10.temperature),
        html_escape(&view.aht10.humidity),
    );
    let _ = writeln!(
        html,
        r#"<section class="bh1750"{}><span class="lx">{}</span></section>"#,
        hidden(view.bh1750.visible),
        html_escape(&view.bh1750.lux),
    );

    html
}

fn hidden(visible: bool) -> &'static str {
    if visible {
        ""
    } else {
        " hidden"
    }
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
