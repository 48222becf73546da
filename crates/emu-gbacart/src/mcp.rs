//! JSON-RPC 2.0 server for the cartridge bridge.
//!
//! One request per line on stdin, one response per line on stdout. Tools
//! let scripts boot the machine, run it, press keys, pull the console's
//! power, and inspect any component through its query paths.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use base64::Engine;
use emu_core::{Observable, Ticks, Tickable};
use gba_cart::Button;
use gba_console::ConsoleConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{Machine, RunConfig, capture};

const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const SERVER_ERROR: i32 = -32000;

// ---------------------------------------------------------------------------
// JSON-RPC types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: JsonValue,
    id: JsonValue,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: JsonValue,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl RpcResponse {
    fn success(id: JsonValue, result: JsonValue) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: JsonValue, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError { code, message }),
            id,
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// JSON-RPC server wrapping a headless machine.
pub struct McpServer {
    machine: Option<Machine>,
    defaults: RunConfig,
    image_path: Option<PathBuf>,
}

impl McpServer {
    #[must_use]
    pub fn new(defaults: RunConfig) -> Self {
        Self {
            machine: None,
            defaults,
            image_path: None,
        }
    }

    /// Default program image for `boot` (from the `--image` argument).
    pub fn set_image_path(&mut self, path: PathBuf) {
        self.image_path = Some(path);
    }

    /// Serve requests from stdin until it closes.
    pub fn run(&mut self) {
        let stdin = io::stdin();
        let mut stdout = io::stdout().lock();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let Some(response) = self.handle_line(&line) else {
                continue;
            };
            let _ = writeln!(
                stdout,
                "{}",
                serde_json::to_string(&response).unwrap_or_default()
            );
            let _ = stdout.flush();
        }
    }

    /// Parse and answer one request line. Blank lines get no answer.
    fn handle_line(&mut self, line: &str) -> Option<RpcResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let request: RpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                return Some(RpcResponse::error(
                    JsonValue::Null,
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
            }
        };
        if request.jsonrpc != "2.0" {
            return Some(RpcResponse::error(
                request.id,
                INVALID_REQUEST,
                "Invalid JSON-RPC version".to_owned(),
            ));
        }
        debug!(method = %request.method, "request");
        Some(self.dispatch(&request.method, &request.params, request.id))
    }

    fn dispatch(&mut self, method: &str, params: &JsonValue, id: JsonValue) -> RpcResponse {
        match method {
            "boot" => self.handle_boot(params, id),
            "reset" => self.handle_reset(id),
            "run_frames" => self.handle_run_frames(params, id),
            "step_ticks" => self.handle_step_ticks(params, id),
            "query" => self.handle_query(params, id),
            "query_paths" => self.handle_query_paths(id),
            "mailbox" => self.handle_mailbox(id),
            "press_button" => self.handle_button(params, id, true),
            "release_button" => self.handle_button(params, id, false),
            "power" => self.handle_power(params, id),
            "screenshot" => self.handle_screenshot(id),
            _ => RpcResponse::error(id, METHOD_NOT_FOUND, format!("Unknown method: {method}")),
        }
    }

    fn require_machine(&mut self, id: &JsonValue) -> Result<&mut Machine, RpcResponse> {
        self.machine.as_mut().ok_or_else(|| {
            RpcResponse::error(
                id.clone(),
                SERVER_ERROR,
                "No machine. Call 'boot' first.".to_owned(),
            )
        })
    }

    // === Tool handlers ===

    /// Program from `data` (base64), `path`, `--image`, or the demo image.
    fn handle_boot(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let mut config = self.defaults.clone();
        if let Some(b64) = params.get("data").and_then(|v| v.as_str()) {
            match base64::engine::general_purpose::STANDARD.decode(b64) {
                Ok(d) => config.program = d,
                Err(e) => {
                    return RpcResponse::error(id, INVALID_PARAMS, format!("Invalid base64: {e}"));
                }
            }
        } else if let Some(path) = params
            .get("path")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .or_else(|| self.image_path.clone())
        {
            match std::fs::read(&path) {
                Ok(d) => config.program = d,
                Err(e) => {
                    return RpcResponse::error(id, SERVER_ERROR, format!("Cannot read image: {e}"));
                }
            }
        }
        if let Some(wait) = params.get("wait_power").and_then(|v| v.as_bool()) {
            config.wait_power = wait;
        }
        if let Some(height) = params.get("height").and_then(|v| v.as_u64()) {
            config.display_height = height.min(u64::from(u16::MAX)) as u16;
        }
        if let Some(frame_ticks) = params.get("frame_ticks").and_then(|v| v.as_u64()) {
            config.console = ConsoleConfig {
                frame_ticks,
                ..config.console
            };
        }

        match config.build() {
            Ok(machine) => {
                let header = machine.header().cloned();
                self.machine = Some(machine);
                RpcResponse::success(
                    id,
                    serde_json::json!({
                        "status": "ok",
                        "title": header.as_ref().map(|h| h.title.clone()),
                        "header_valid": header.is_some_and(|h| h.valid),
                    }),
                )
            }
            Err(e) => RpcResponse::error(id, SERVER_ERROR, format!("Boot failed: {e}")),
        }
    }

    /// Full reset of the cartridge's bus machinery.
    fn handle_reset(&mut self, id: JsonValue) -> RpcResponse {
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        let cart = machine.slot_mut().cart_mut();
        cart.full_reset();
        let full_resets = cart.full_resets();
        RpcResponse::success(
            id,
            serde_json::json!({"status": "ok", "full_resets": full_resets}),
        )
    }

    fn handle_run_frames(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        let count = params
            .get("count")
            .and_then(|v| v.as_u64())
            .or_else(|| params.get("frames").and_then(|v| v.as_u64()))
            .unwrap_or(1);

        let start = machine.bus().ticks();
        machine.run_frames(count);
        RpcResponse::success(
            id,
            serde_json::json!({
                "frames": count,
                "ticks": machine.bus().ticks() - start,
                "frame_count": machine.frame(),
            }),
        )
    }

    fn handle_step_ticks(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        let count = params.get("count").and_then(|v| v.as_u64()).unwrap_or(1);
        machine.tick_n(Ticks::new(count));
        RpcResponse::success(
            id,
            serde_json::json!({"ticks": count, "total": machine.bus().ticks()}),
        )
    }

    fn handle_query(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        let Some(path) = params.get("path").and_then(|v| v.as_str()) else {
            return RpcResponse::error(id, INVALID_PARAMS, "Missing 'path' parameter".to_owned());
        };
        match machine.query(path) {
            Some(value) => {
                let json_val = observable_to_json(&value);
                RpcResponse::success(id, serde_json::json!({"path": path, "value": json_val}))
            }
            None => RpcResponse::error(id, SERVER_ERROR, format!("Unknown query path: {path}")),
        }
    }

    fn handle_query_paths(&mut self, id: JsonValue) -> RpcResponse {
        match self.require_machine(&id) {
            Ok(machine) => {
                let paths = machine.query_paths();
                RpcResponse::success(id, serde_json::json!({"paths": paths}))
            }
            Err(e) => e,
        }
    }

    /// The mailbox as the host sees it in the image.
    fn handle_mailbox(&mut self, id: JsonValue) -> RpcResponse {
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        let mailbox = machine.slot().cart().mailbox();
        let mut fields = serde_json::Map::new();
        for path in mailbox.query_paths() {
            if let Some(value) = mailbox.query(&path) {
                fields.insert(path, observable_to_json(&value));
            }
        }
        RpcResponse::success(id, JsonValue::Object(fields))
    }

    fn handle_button(&mut self, params: &JsonValue, id: JsonValue, pressed: bool) -> RpcResponse {
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        let Some(name) = params.get("button").and_then(|v| v.as_str()) else {
            return RpcResponse::error(id, INVALID_PARAMS, "Missing 'button' parameter".to_owned());
        };
        let Some(button) = Button::from_name(name) else {
            return RpcResponse::error(id, INVALID_PARAMS, format!("Unknown button: {name}"));
        };
        if pressed {
            machine.press(button);
        } else {
            machine.release(button);
        }
        RpcResponse::success(
            id,
            serde_json::json!({"keys": machine.keys().to_string()}),
        )
    }

    /// Switch the console on or off; `{"on": false}` drops every line.
    fn handle_power(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        let Some(on) = params.get("on").and_then(|v| v.as_bool()) else {
            return RpcResponse::error(id, INVALID_PARAMS, "Missing 'on' parameter".to_owned());
        };
        if on && !machine.bus().is_powered() {
            machine.power_on();
        } else if !on && machine.bus().is_powered() {
            machine.power_off();
        }
        RpcResponse::success(id, serde_json::json!({"powered": machine.bus().is_powered()}))
    }

    fn handle_screenshot(&mut self, id: JsonValue) -> RpcResponse {
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        let mut png_buf = Vec::new();
        if let Err(e) = capture::encode_png(machine.screen(), &mut png_buf) {
            return RpcResponse::error(id, SERVER_ERROR, format!("PNG encode error: {e}"));
        }
        let b64 = base64::engine::general_purpose::STANDARD.encode(&png_buf);
        RpcResponse::success(
            id,
            serde_json::json!({
                "format": "png",
                "width": gba_console::screen::WIDTH,
                "height": gba_console::screen::HEIGHT,
                "data": b64,
            }),
        )
    }
}

impl Default for McpServer {
    fn default() -> Self {
        Self::new(RunConfig::default())
    }
}

fn observable_to_json(value: &emu_core::Value) -> JsonValue {
    serde_json::to_value(value).unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> McpServer {
        McpServer::new(RunConfig {
            display_height: 4,
            console: ConsoleConfig::with_frame_ticks(60_000),
            ..RunConfig::default()
        })
    }

    fn call(server: &mut McpServer, method: &str, params: JsonValue) -> JsonValue {
        let resp = server.dispatch(method, &params, JsonValue::from(1));
        assert!(resp.error.is_none(), "{method}: {:?}", resp.error.map(|e| e.message));
        resp.result.unwrap_or(JsonValue::Null)
    }

    #[test]
    fn unknown_method_returns_error() {
        let mut server = McpServer::default();
        let resp = server.dispatch("nonexistent", &JsonValue::Null, JsonValue::from(1));
        assert_eq!(resp.error.as_ref().map(|e| e.code), Some(METHOD_NOT_FOUND));
    }

    #[test]
    fn run_frames_without_boot_returns_error() {
        let mut server = McpServer::default();
        let resp = server.dispatch(
            "run_frames",
            &serde_json::json!({"count": 1}),
            JsonValue::from(1),
        );
        assert_eq!(resp.error.as_ref().map(|e| e.code), Some(SERVER_ERROR));
    }

    #[test]
    fn malformed_lines_are_answered() {
        let mut server = McpServer::default();
        assert!(server.handle_line("   ").is_none());

        let resp = server.handle_line("{not json").expect("answered");
        assert_eq!(resp.error.as_ref().map(|e| e.code), Some(PARSE_ERROR));

        let resp = server
            .handle_line(r#"{"jsonrpc":"1.0","method":"boot","id":7}"#)
            .expect("answered");
        assert_eq!(resp.error.as_ref().map(|e| e.code), Some(INVALID_REQUEST));
        assert_eq!(resp.id, JsonValue::from(7));
    }

    #[test]
    fn boot_reads_the_demo_header() {
        let mut server = server();
        let result = call(&mut server, "boot", serde_json::json!({}));
        assert_eq!(result["title"], "CARTDEMO");
        assert_eq!(result["header_valid"], true);
    }

    #[test]
    fn boot_rejects_bad_base64() {
        let mut server = server();
        let resp = server.dispatch(
            "boot",
            &serde_json::json!({"data": "@@@"}),
            JsonValue::from(1),
        );
        assert_eq!(resp.error.as_ref().map(|e| e.code), Some(INVALID_PARAMS));
    }

    #[test]
    fn frames_and_queries() {
        let mut server = server();
        call(&mut server, "boot", serde_json::json!({}));
        let result = call(&mut server, "run_frames", serde_json::json!({"count": 2}));
        assert_eq!(result["frame_count"], 2);

        let result = call(
            &mut server,
            "query",
            serde_json::json!({"path": "console.frames_presented"}),
        );
        assert_eq!(result["value"], 2);

        let result = call(
            &mut server,
            "query",
            serde_json::json!({"path": "cart.supervisor.full_resets"}),
        );
        assert_eq!(result["value"], 0);

        let resp = server.dispatch(
            "query",
            &serde_json::json!({"path": "no.such.path"}),
            JsonValue::from(1),
        );
        assert!(resp.error.is_some());
    }

    #[test]
    fn buttons_by_name() {
        let mut server = server();
        call(&mut server, "boot", serde_json::json!({}));
        let result = call(&mut server, "press_button", serde_json::json!({"button": "Left"}));
        assert_eq!(result["keys"], "left");
        let result = call(&mut server, "release_button", serde_json::json!({"button": "left"}));
        assert_eq!(result["keys"], "none");

        let resp = server.dispatch(
            "press_button",
            &serde_json::json!({"button": "turbo"}),
            JsonValue::from(1),
        );
        assert_eq!(resp.error.as_ref().map(|e| e.code), Some(INVALID_PARAMS));
    }

    #[test]
    fn power_cycle_through_the_server() {
        let mut server = server();
        call(&mut server, "boot", serde_json::json!({}));
        call(&mut server, "run_frames", serde_json::json!({"count": 1}));
        let result = call(&mut server, "power", serde_json::json!({"on": false}));
        assert_eq!(result["powered"], false);
        call(&mut server, "step_ticks", serde_json::json!({"count": 500}));
        let result = call(
            &mut server,
            "query",
            serde_json::json!({"path": "cart.supervisor.full_resets"}),
        );
        assert_eq!(result["value"], 1);

        call(&mut server, "power", serde_json::json!({"on": true}));
        let result = call(&mut server, "run_frames", serde_json::json!({"count": 2}));
        assert_eq!(result["frame_count"], 3);
    }

    #[test]
    fn mailbox_and_screenshot() {
        let mut server = server();
        call(&mut server, "boot", serde_json::json!({}));
        let mailbox = call(&mut server, "mailbox", JsonValue::Null);
        assert_eq!(mailbox["fb_height"], 4);
        assert_eq!(mailbox["audio_buf_size"], 544);

        let shot = call(&mut server, "screenshot", JsonValue::Null);
        assert_eq!(shot["format"], "png");
        let data = shot["data"].as_str().expect("base64 string");
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .expect("valid base64");
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn reset_counts_a_full_reset() {
        let mut server = server();
        call(&mut server, "boot", serde_json::json!({}));
        let result = call(&mut server, "reset", JsonValue::Null);
        assert_eq!(result["full_resets"], 1);
        let result = call(&mut server, "run_frames", serde_json::json!({"count": 1}));
        assert_eq!(result["frame_count"], 1);
    }
}
