//! Persistent breakpoints and log points.

use std::collections::BTreeMap;

use crate::expr::{Expr, ExprContext, ExprError};

/// Piece of a log template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogPart {
    Text(String),
    Value { expr: Expr, hex: bool },
}

/// Log-point text with embedded `${expr}` or `${hex:expr}` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTemplate {
    source: String,
    parts: Vec<LogPart>,
}

impl LogTemplate {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let mut parts = Vec::new();
        let mut rest = source;
        let mut offset = 0;
        while let Some(open) = rest.find("${") {
            if open > 0 {
                parts.push(LogPart::Text(rest[..open].to_string()));
            }
            let body_start = open + 2;
            let Some(len) = rest[body_start..].find('}') else {
                return Err(ExprError::Parse {
                    position: offset + open,
                    message: "unterminated '${'".to_string(),
                });
            };
            let body = &rest[body_start..body_start + len];
            let (hex, text) = match body.trim_start().strip_prefix("hex:") {
                Some(inner) => (true, inner),
                None => (false, body),
            };
            let expr = Expr::parse(text).map_err(|e| shift_position(e, offset + body_start))?;
            parts.push(LogPart::Value { expr, hex });
            let consumed = body_start + len + 1;
            rest = &rest[consumed..];
            offset += consumed;
        }
        if !rest.is_empty() {
            parts.push(LogPart::Text(rest.to_string()));
        }
        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, ctx: &dyn ExprContext) -> Result<String, ExprError> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                LogPart::Text(text) => out.push_str(text),
                LogPart::Value { expr, hex } => {
                    let v = expr.eval(ctx)?;
                    if !hex {
                        out.push_str(&v.to_string());
                    } else if (0..=0xFF).contains(&v) {
                        out.push_str(&format!("{v:02X}"));
                    } else {
                        out.push_str(&format!("{:04X}", v & 0xFFFF));
                    }
                }
            }
        }
        Ok(out)
    }
}

fn shift_position(err: ExprError, by: usize) -> ExprError {
    match err {
        ExprError::Parse { position, message } => ExprError::Parse {
            position: position + by,
            message,
        },
        ExprError::UnknownRegister { position, name } => ExprError::UnknownRegister {
            position: position + by,
            name,
        },
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: u32,
    pub address: u16,
    pub condition: Option<(String, Expr)>,
    pub log: Option<LogTemplate>,
}

/// Result of checking the breakpoints at one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointOutcome {
    /// Nothing stops here. Log points may still have produced output.
    Continue,
    Stop { id: u32 },
    /// The condition could not be evaluated; this counts as a stop.
    ConditionError { id: u32, error: ExprError },
    LogError { id: u32, error: ExprError },
}

/// Breakpoints by address. Several may share one address.
#[derive(Debug, Clone, Default)]
pub struct Breakpoints {
    by_address: BTreeMap<u16, Vec<Breakpoint>>,
    next_id: u32,
}

impl Breakpoints {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a breakpoint. Condition and log are parsed here so syntax
    /// errors surface immediately.
    pub fn add(&mut self, address: u16, condition: Option<&str>, log: Option<&str>) -> Result<u32, ExprError> {
        let condition = condition
            .filter(|c| !c.trim().is_empty())
            .map(|c| Expr::parse(c).map(|e| (c.to_string(), e)))
            .transpose()?;
        let log = log.map(LogTemplate::parse).transpose()?;
        self.next_id += 1;
        let id = self.next_id;
        self.by_address.entry(address).or_default().push(Breakpoint {
            id,
            address,
            condition,
            log,
        });
        Ok(id)
    }

    pub fn remove(&mut self, id: u32) -> Option<Breakpoint> {
        let (&address, list) = self
            .by_address
            .iter_mut()
            .find(|(_, list)| list.iter().any(|b| b.id == id))?;
        let index = list.iter().position(|b| b.id == id)?;
        let removed = list.remove(index);
        if list.is_empty() {
            self.by_address.remove(&address);
        }
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.by_address.clear();
    }

    #[must_use]
    pub fn at(&self, address: u16) -> &[Breakpoint] {
        self.by_address.get(&address).map_or(&[][..], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.by_address.values().flatten()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_address.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    /// Check the breakpoints at `address` in the order they were added.
    ///
    /// A breakpoint whose condition holds (or has none) stops execution,
    /// unless it is a log point: then its rendered text goes to `logs` and
    /// the next one is checked.
    pub fn check(&self, address: u16, ctx: &dyn ExprContext, logs: &mut Vec<String>) -> BreakpointOutcome {
        for bp in self.at(address) {
            if let Some((_, condition)) = &bp.condition {
                match condition.is_true(ctx) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(error) => return BreakpointOutcome::ConditionError { id: bp.id, error },
                }
            }
            match &bp.log {
                Some(template) => match template.render(ctx) {
                    Ok(text) => logs.push(text),
                    Err(error) => return BreakpointOutcome::LogError { id: bp.id, error },
                },
                None => return BreakpointOutcome::Stop { id: bp.id },
            }
        }
        BreakpointOutcome::Continue
    }
}
