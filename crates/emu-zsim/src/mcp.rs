//! JSON-RPC 2.0 debug server.
//!
//! Reads newline-delimited requests and writes one response per request,
//! plus `log` notifications carrying log-point output. A reader thread owns
//! the input so that `pause` reaches a running machine; `continue` and the
//! step commands are answered when the machine stops.
//!
//! # Protocol
//!
//! Requests use the method names in [`McpServer::dispatch`]. Addresses,
//! ports and values are JSON numbers; memory blocks and save states travel
//! as base64 strings.

#![allow(clippy::cast_possible_truncation)]

use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use emu_core::{Observable, Value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use sinclair_ula::Frame;
use tracing::{debug, info};
use zilog_z80::{Reg, Registers};

use crate::debugger::{Debugger, PauseHandle};
use crate::error::ZSimError;
use crate::event::{BreakEvent, Notification};
use crate::memory::WatchAccess;

// ---------------------------------------------------------------------------
// JSON-RPC types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: JsonValue,
    #[serde(default)]
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

#[derive(Serialize)]
struct RpcNotification {
    jsonrpc: &'static str,
    method: &'static str,
    params: JsonValue,
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

/// A handler failure, turned into an error response.
#[derive(Debug)]
struct Fault {
    code: i32,
    message: String,
}

impl Fault {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

impl From<ZSimError> for Fault {
    fn from(err: ZSimError) -> Self {
        Self {
            code: -32000,
            message: err.to_string(),
        }
    }
}

/// What a handler produced.
enum Reply {
    Now(JsonValue),
    /// The machine is running; the answer is the stop event.
    Later,
}

enum Incoming {
    Request(RpcRequest),
    /// Input that could not be parsed, answered as is.
    Reply(RpcResponse),
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

fn number(params: &JsonValue, name: &str, max: u64) -> Result<Option<u64>, Fault> {
    match params.get(name) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(v) => match v.as_u64() {
            Some(n) if n <= max => Ok(Some(n)),
            _ => Err(Fault::invalid_params(format!("Invalid '{name}' (0-{max})"))),
        },
    }
}

fn required(params: &JsonValue, name: &str, max: u64) -> Result<u64, Fault> {
    number(params, name, max)?.ok_or_else(|| Fault::invalid_params(format!("Missing '{name}' parameter")))
}

fn address(params: &JsonValue, name: &str) -> Result<u16, Fault> {
    required(params, name, 0xFFFF).map(|n| n as u16)
}

fn byte(params: &JsonValue, name: &str) -> Result<u8, Fault> {
    required(params, name, 0xFF).map(|n| n as u8)
}

fn text<'a>(params: &'a JsonValue, name: &str) -> Option<&'a str> {
    params.get(name).and_then(JsonValue::as_str)
}

fn required_text<'a>(params: &'a JsonValue, name: &str) -> Result<&'a str, Fault> {
    text(params, name).ok_or_else(|| Fault::invalid_params(format!("Missing '{name}' parameter")))
}

fn flag(params: &JsonValue, name: &str) -> bool {
    params.get(name).and_then(JsonValue::as_bool).unwrap_or(false)
}

fn base64_data(params: &JsonValue, name: &str) -> Result<Vec<u8>, Fault> {
    STANDARD
        .decode(required_text(params, name)?)
        .map_err(|e| Fault::invalid_params(format!("Invalid base64: {e}")))
}

fn watch_params(params: &JsonValue) -> Result<(u16, usize, WatchAccess), Fault> {
    let start = address(params, "address")?;
    let len = number(params, "length", 0x1_0000)?.unwrap_or(1) as usize;
    let access = text(params, "access").unwrap_or("rw");
    let access = WatchAccess::parse(access)
        .ok_or_else(|| Fault::invalid_params(format!("Invalid access '{access}' (r, w or rw)")))?;
    Ok((start, len, access))
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn registers_json(regs: &Registers) -> JsonValue {
    let map: Map<String, JsonValue> = Reg::ALL
        .into_iter()
        .map(|reg| (reg.name().to_string(), JsonValue::from(regs.get(reg))))
        .collect();
    JsonValue::Object(map)
}

fn value_json(value: Value) -> JsonValue {
    match value {
        Value::Bool(v) => json!(v),
        Value::U8(v) => json!(v),
        Value::U16(v) => json!(v),
        Value::U32(v) => json!(v),
        Value::U64(v) => json!(v),
        Value::String(v) => json!(v),
        Value::Bytes(v) => json!(STANDARD.encode(v)),
    }
}

fn frame_json(frame: Frame) -> JsonValue {
    let colour = |c: Option<Vec<u8>>| c.map(|c| STANDARD.encode(c));
    match frame {
        Frame::NoSignal { border } => json!({"kind": "no_signal", "border": border}),
        Frame::Zx81Text {
            dfile,
            colour: c,
            border,
        } => json!({
            "kind": "zx81_text",
            "data": STANDARD.encode(dfile),
            "colour": colour(c),
            "border": border,
        }),
        Frame::Zx81Hires {
            data,
            colour: c,
            border,
        } => json!({
            "kind": "zx81_hires",
            "data": STANDARD.encode(data),
            "colour": colour(c),
            "border": border,
        }),
        Frame::Spectrum { screen, border } => json!({
            "kind": "spectrum",
            "data": STANDARD.encode(screen),
            "border": border,
        }),
    }
}

fn stop_json(event: &BreakEvent) -> JsonValue {
    serde_json::to_value(event).unwrap_or_default()
}

fn send<W: Write>(output: &mut W, message: &impl Serialize) -> io::Result<()> {
    writeln!(output, "{}", serde_json::to_string(message).unwrap_or_default())?;
    output.flush()
}

/// Reader thread body. `pause` is acted on here so it is not queued behind
/// a running machine.
fn read_requests<R: BufRead>(input: R, tx: &Sender<Incoming>, pause: &PauseHandle) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let incoming = match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => {
                if request.method == "pause" {
                    pause.pause();
                }
                Incoming::Request(request)
            }
            Err(e) => Incoming::Reply(RpcResponse::error(
                JsonValue::Null,
                -32700,
                format!("Parse error: {e}"),
            )),
        };
        if tx.send(incoming).is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct McpServer {
    debugger: Debugger,
    notifications: Receiver<Notification>,
    /// Id of the request waiting for the machine to stop.
    pending: Option<JsonValue>,
}

impl McpServer {
    #[must_use]
    pub fn new(mut debugger: Debugger) -> Self {
        let notifications = debugger.zsim_mut().subscribe();
        Self {
            debugger,
            notifications,
            pending: None,
        }
    }

    #[must_use]
    pub fn debugger(&self) -> &Debugger {
        &self.debugger
    }

    /// Serve stdin/stdout until stdin closes.
    pub fn run(&mut self) -> io::Result<()> {
        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        self.serve(io::BufReader::new(io::stdin()), &mut stdout)
    }

    /// Serve requests from `input` until it ends.
    pub fn serve<R, W>(&mut self, input: R, output: &mut W) -> io::Result<()>
    where
        R: BufRead + Send + 'static,
        W: Write,
    {
        let (tx, rx) = mpsc::channel();
        let pause = self.debugger.pause_handle();
        let reader = thread::spawn(move || read_requests(input, &tx, &pause));
        info!("debug server ready");

        loop {
            if self.debugger.is_running() {
                if let Some(event) = self.debugger.run_batch()
                    && let Some(response) = self.complete(&event)
                {
                    send(output, &response)?;
                }
                self.forward_notifications(output)?;
                match rx.try_recv() {
                    Ok(incoming) => self.handle(incoming, output)?,
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                let Ok(incoming) = rx.recv() else { break };
                self.handle(incoming, output)?;
                self.forward_notifications(output)?;
            }
        }

        if reader.join().is_err() {
            debug!("request reader panicked");
        }
        info!("input closed, debug server stopping");
        Ok(())
    }

    fn handle<W: Write>(&mut self, incoming: Incoming, output: &mut W) -> io::Result<()> {
        let response = match incoming {
            Incoming::Reply(response) => Some(response),
            Incoming::Request(request) => self.request(request),
        };
        if let Some(response) = response {
            send(output, &response)?;
        }
        Ok(())
    }

    fn request(&mut self, request: RpcRequest) -> Option<RpcResponse> {
        if request.jsonrpc != "2.0" {
            return Some(RpcResponse::error(
                request.id,
                -32600,
                "Invalid JSON-RPC version".to_string(),
            ));
        }
        if self.debugger.is_running() && request.method != "pause" {
            return Some(RpcResponse::error(request.id, -32000, ZSimError::Running.to_string()));
        }
        self.dispatch(&request.method, &request.params, request.id)
    }

    /// Answer the request that started the run.
    fn complete(&mut self, event: &BreakEvent) -> Option<RpcResponse> {
        let id = self.pending.take()?;
        Some(RpcResponse::success(id, stop_json(event)))
    }

    fn forward_notifications<W: Write>(&mut self, output: &mut W) -> io::Result<()> {
        while let Ok(notification) = self.notifications.try_recv() {
            // Stops are answered through the pending request; frames are
            // polled with `frame`.
            if let Notification::Log(text) = notification {
                send(
                    output,
                    &RpcNotification {
                        jsonrpc: "2.0",
                        method: "log",
                        params: json!({"text": text}),
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Dispatch a method call. `None` means the machine was started and the
    /// answer follows when it stops.
    fn dispatch(&mut self, method: &str, params: &JsonValue, id: JsonValue) -> Option<RpcResponse> {
        let outcome = match method {
            "continue" => self.handle_continue(params),
            "step_into" => Ok(Reply::Now(stop_json(&self.debugger.step_into()))),
            "step_over" => Ok(match self.debugger.start_step_over() {
                Some(event) => Reply::Now(stop_json(&event)),
                None => Reply::Later,
            }),
            "step_out" => {
                self.debugger.start_step_out();
                Ok(Reply::Later)
            }
            _ => self.call(method, params).map(Reply::Now),
        };
        match outcome {
            Ok(Reply::Now(result)) => Some(RpcResponse::success(id, result)),
            Ok(Reply::Later) => {
                self.pending = Some(id);
                None
            }
            Err(fault) => Some(RpcResponse::error(id, fault.code, fault.message)),
        }
    }

    fn call(&mut self, method: &str, params: &JsonValue) -> Result<JsonValue, Fault> {
        match method {
            "pause" => {
                self.debugger.pause();
                Ok(json!({"status": "ok"}))
            }
            "reset" => {
                self.debugger.reset();
                Ok(json!({"status": "ok"}))
            }
            "get_registers" => Ok(json!({
                "registers": registers_json(&self.debugger.registers()),
                "reverse": self.debugger.history().is_reverse(),
            })),
            "set_register" => self.handle_set_register(params),
            "read_memory" => self.handle_read_memory(params),
            "write_memory" => self.handle_write_memory(params),
            "add_breakpoint" => self.handle_add_breakpoint(params),
            "remove_breakpoint" => self.handle_remove_breakpoint(params),
            "list_breakpoints" => Ok(self.list_breakpoints()),
            "add_watchpoint" => {
                let (start, len, access) = watch_params(params)?;
                self.debugger
                    .add_watchpoint(start, len, access)
                    .map_err(ZSimError::from)?;
                Ok(json!({"status": "ok"}))
            }
            "remove_watchpoint" => {
                let (start, len, access) = watch_params(params)?;
                let removed = self
                    .debugger
                    .remove_watchpoint(start, len, access)
                    .map_err(ZSimError::from)?;
                Ok(json!({"removed": removed}))
            }
            "step_back" => match self.debugger.step_back() {
                Some(entry) => Ok(json!({
                    "pc": entry.pc(),
                    "registers": registers_json(&entry.registers),
                    "opcode": entry.opcode,
                    "stack_top": entry.stack_top,
                })),
                None => Err(ZSimError::NoHistory.into()),
            },
            "step_forward" => Ok(match self.debugger.step_forward() {
                Some(entry) => json!({
                    "pc": entry.pc(),
                    "registers": registers_json(&entry.registers),
                    "live": false,
                }),
                None => json!({
                    "pc": self.debugger.zsim().pc(),
                    "registers": registers_json(&self.debugger.zsim().registers()),
                    "live": true,
                }),
            }),
            "history_spots" => Ok(json!(self.debugger.history_spots())),
            "save_state" => Ok(json!({"data": STANDARD.encode(self.debugger.save_state())})),
            "restore_state" => {
                let data = base64_data(params, "data")?;
                self.debugger.restore_state(&data).map_err(ZSimError::from)?;
                Ok(json!({"status": "ok"}))
            }
            "cpu_load" => Ok(json!({"load": self.debugger.zsim().cpu_load()})),
            "tstates" => {
                let zsim = self.debugger.zsim_mut();
                let result = json!({"tstates": zsim.tstates(), "total": zsim.total_tstates()});
                if flag(params, "reset") {
                    zsim.reset_tstates();
                }
                Ok(result)
            }
            "get_slots" => Ok(self.slots()),
            "set_slot" => self.handle_set_slot(params),
            "coverage" => Ok(json!(
                self.debugger.coverage().map_or(&[][..], |c| c.addresses())
            )),
            "visual_memory" => {
                let memory = self.debugger.zsim_mut().memory_mut();
                let pages: Vec<u8> = memory.visual_memory().iter().map(|&v| v as u8).collect();
                if flag(params, "clear") {
                    memory.clear_visual_memory();
                }
                Ok(json!(pages))
            }
            "frame" => Ok(frame_json(self.debugger.zsim().frame())),
            "port_in" => {
                let port = address(params, "port")?;
                Ok(json!({"value": self.debugger.zsim_mut().port_in(port)}))
            }
            "port_out" => {
                let port = address(params, "port")?;
                let value = byte(params, "value")?;
                self.debugger
                    .zsim_mut()
                    .port_out(port, value)
                    .map_err(ZSimError::from)?;
                Ok(json!({"status": "ok"}))
            }
            "set_port_value" => {
                let port = address(params, "port")?;
                let value = byte(params, "value")?;
                self.debugger
                    .zsim_mut()
                    .ports_mut()
                    .register_read(port, move |_| value);
                Ok(json!({"status": "ok"}))
            }
            "break_on_interrupt" => {
                if let Some(enabled) = params.get("enabled").and_then(JsonValue::as_bool) {
                    self.debugger.set_break_on_interrupt(enabled);
                }
                Ok(json!({"enabled": self.debugger.break_on_interrupt()}))
            }
            "query" => {
                let path = required_text(params, "path")?;
                match self.debugger.zsim().query(path) {
                    Some(value) => Ok(json!({"path": path, "value": value_json(value)})),
                    None => Err(Fault {
                        code: -32000,
                        message: format!("Unknown query path: {path}"),
                    }),
                }
            }
            _ => Err(Fault {
                code: -32601,
                message: format!("Unknown method: {method}"),
            }),
        }
    }

    // === Handlers ===

    fn handle_continue(&mut self, params: &JsonValue) -> Result<Reply, Fault> {
        let bp1 = number(params, "bp1", 0xFFFF)?.map(|n| n as u16);
        let bp2 = number(params, "bp2", 0xFFFF)?.map(|n| n as u16);
        self.debugger.start_continue(bp1, bp2);
        Ok(Reply::Later)
    }

    fn handle_set_register(&mut self, params: &JsonValue) -> Result<JsonValue, Fault> {
        let reg: Reg = required_text(params, "name")?
            .parse()
            .map_err(ZSimError::from)?;
        let value = required(params, "value", 0xFFFF)? as u16;
        self.debugger.zsim_mut().set_register(reg, value);
        Ok(json!({"name": reg.name(), "value": self.debugger.zsim().registers().get(reg)}))
    }

    fn handle_read_memory(&self, params: &JsonValue) -> Result<JsonValue, Fault> {
        let start = address(params, "address")?;
        let len = required(params, "length", 0x1_0000)? as usize;
        let data = self.debugger.zsim().memory().read_block(start, len);
        Ok(json!({"address": start, "data": STANDARD.encode(data)}))
    }

    fn handle_write_memory(&mut self, params: &JsonValue) -> Result<JsonValue, Fault> {
        let start = address(params, "address")?;
        let data = base64_data(params, "data")?;
        let allow_rom = flag(params, "allow_rom");
        self.debugger
            .zsim_mut()
            .memory_mut()
            .write_block(start, &data, allow_rom)
            .map_err(ZSimError::from)?;
        Ok(json!({"address": start, "length": data.len()}))
    }

    fn handle_add_breakpoint(&mut self, params: &JsonValue) -> Result<JsonValue, Fault> {
        let at = address(params, "address")?;
        let id = self
            .debugger
            .breakpoints_mut()
            .add(at, text(params, "condition"), text(params, "log"))
            .map_err(ZSimError::from)?;
        Ok(json!({"id": id}))
    }

    fn handle_remove_breakpoint(&mut self, params: &JsonValue) -> Result<JsonValue, Fault> {
        let id = required(params, "id", u64::from(u32::MAX))? as u32;
        self.debugger
            .breakpoints_mut()
            .remove(id)
            .ok_or(ZSimError::NoSuchBreakpoint(id))?;
        Ok(json!({"status": "ok"}))
    }

    fn list_breakpoints(&self) -> JsonValue {
        let list: Vec<JsonValue> = self
            .debugger
            .breakpoints()
            .iter()
            .map(|bp| {
                json!({
                    "id": bp.id,
                    "address": bp.address,
                    "condition": bp.condition.as_ref().map(|(source, _)| source),
                    "log": bp.log.as_ref().map(|log| log.source()),
                })
            })
            .collect();
        JsonValue::Array(list)
    }

    fn slots(&self) -> JsonValue {
        let memory = self.debugger.zsim().memory();
        let slots: Vec<JsonValue> = memory
            .slots()
            .iter()
            .enumerate()
            .map(|(slot, &bank)| {
                json!({
                    "slot": slot,
                    "name": memory.slot_name(slot),
                    "start": memory.slot_start(slot),
                    "bank": bank,
                    "bank_name": memory.bank_name(bank).map(|(name, _)| name),
                    "kind": memory.bank_kind(bank),
                })
            })
            .collect();
        JsonValue::Array(slots)
    }

    /// `slot` is an index or a slot name.
    fn handle_set_slot(&mut self, params: &JsonValue) -> Result<JsonValue, Fault> {
        let slot = match text(params, "slot") {
            Some(name) => self
                .debugger
                .zsim()
                .memory()
                .slot_by_name(name)
                .ok_or_else(|| Fault::invalid_params(format!("Unknown slot '{name}'")))?,
            None => required(params, "slot", 0xFF)? as usize,
        };
        let bank = required(params, "bank", u64::from(u16::MAX))? as usize;
        self.debugger
            .zsim_mut()
            .set_slot(slot, bank)
            .map_err(ZSimError::from)?;
        Ok(self.slots())
    }
}
