#![deny(warnings)]

//! Command surface of the factory twin.
//!
//! [`FactoryTools`] exposes the eight operations external callers (an agent,
//! the CLI, tests) are allowed to use. [`ToolCall`] is the wire form of a call,
//! accepted either as JSON (`{"tool": "start_job", "args": {...}}`) or as a
//! whitespace-separated line (`start_job O1 10`). [`ToolOutput`] is the
//! serializable result.

use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;
use twin_core::CommandError;
use twin_market::Forecast;
use twin_runtime::{
    FactoryStatus, Financials, JobCancelled, JobStarted, MachineRepaired, SharedTwin, ShiftChanged,
    DEFAULT_FORECAST_HORIZON,
};

/// Names accepted in the `tool` field, in the order they are documented.
pub const TOOL_NAMES: [&str; 8] = [
    "start_job",
    "cancel_job",
    "repair_machine",
    "change_shift",
    "get_status",
    "get_financials",
    "get_market_forecast",
    "log_issue",
];

/// Largest forecast horizon served; longer requests are clamped.
pub const MAX_FORECAST_HORIZON: u32 = 240;

fn default_horizon() -> u32 {
    DEFAULT_FORECAST_HORIZON
}

/// One command addressed to the twin.
///
/// The JSON form is `{"tool": <name>, "args": {...}}`. `args` may be omitted,
/// `null` or `{}` for tools without required arguments.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawCall")]
pub enum ToolCall {
    StartJob { order_id: String, qty: u32 },
    CancelJob { order_id: String },
    RepairMachine,
    ChangeShift { new_shift: String },
    GetStatus,
    GetFinancials,
    GetMarketForecast { horizon: u32 },
    LogIssue { category: String, description: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown tool {0:?}")]
    UnknownTool(String),
    #[error("{tool} expects argument <{arg}>")]
    MissingArg { tool: &'static str, arg: &'static str },
    #[error("argument <{arg}> must be a non-negative integer, got {value:?}")]
    BadNumber { arg: &'static str, value: String },
    #[error("invalid JSON tool call: {0}")]
    Json(String),
}

#[derive(Deserialize)]
struct RawCall {
    tool: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
struct StartJobArgs {
    order_id: String,
    qty: u32,
}

#[derive(Deserialize)]
struct OrderArgs {
    order_id: String,
}

#[derive(Deserialize)]
struct ShiftArgs {
    new_shift: String,
}

#[derive(Deserialize)]
struct ForecastArgs {
    #[serde(default = "default_horizon")]
    horizon: u32,
}

#[derive(Deserialize)]
struct IssueArgs {
    category: String,
    description: String,
}

fn args<T: DeserializeOwned>(value: Value) -> Result<T, ParseError> {
    serde_json::from_value(value).map_err(|e| ParseError::Json(e.to_string()))
}

impl TryFrom<RawCall> for ToolCall {
    type Error = ParseError;

    fn try_from(raw: RawCall) -> Result<Self, Self::Error> {
        let value = match raw.args {
            Value::Null => Value::Object(Default::default()),
            obj @ Value::Object(_) => obj,
            other => {
                return Err(ParseError::Json(format!(
                    "args of {} must be an object, got {other}",
                    raw.tool
                )))
            }
        };
        let call = match raw.tool.as_str() {
            "start_job" => {
                let a: StartJobArgs = args(value)?;
                ToolCall::StartJob {
                    order_id: a.order_id,
                    qty: a.qty,
                }
            }
            "cancel_job" => ToolCall::CancelJob {
                order_id: args::<OrderArgs>(value)?.order_id,
            },
            "repair_machine" => ToolCall::RepairMachine,
            "change_shift" => ToolCall::ChangeShift {
                new_shift: args::<ShiftArgs>(value)?.new_shift,
            },
            "get_status" => ToolCall::GetStatus,
            "get_financials" => ToolCall::GetFinancials,
            "get_market_forecast" => ToolCall::GetMarketForecast {
                horizon: args::<ForecastArgs>(value)?.horizon,
            },
            "log_issue" => {
                let a: IssueArgs = args(value)?;
                ToolCall::LogIssue {
                    category: a.category,
                    description: a.description,
                }
            }
            other => return Err(ParseError::UnknownTool(other.to_string())),
        };
        Ok(call)
    }
}

fn required<'a>(
    it: &mut impl Iterator<Item = &'a str>,
    tool: &'static str,
    arg: &'static str,
) -> Result<&'a str, ParseError> {
    it.next().ok_or(ParseError::MissingArg { tool, arg })
}

fn number(value: &str, arg: &'static str) -> Result<u32, ParseError> {
    value.parse().map_err(|_| ParseError::BadNumber {
        arg,
        value: value.to_string(),
    })
}

impl FromStr for ToolCall {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.starts_with('{') {
            let raw: RawCall =
                serde_json::from_str(line).map_err(|e| ParseError::Json(e.to_string()))?;
            return ToolCall::try_from(raw);
        }
        let mut it = line.split_whitespace();
        let name = it.next().ok_or(ParseError::Empty)?;
        let call = match name {
            "start_job" => {
                let order_id = required(&mut it, "start_job", "order_id")?.to_string();
                let qty = number(required(&mut it, "start_job", "qty")?, "qty")?;
                ToolCall::StartJob { order_id, qty }
            }
            "cancel_job" => ToolCall::CancelJob {
                order_id: required(&mut it, "cancel_job", "order_id")?.to_string(),
            },
            "repair_machine" => ToolCall::RepairMachine,
            "change_shift" => ToolCall::ChangeShift {
                new_shift: required(&mut it, "change_shift", "new_shift")?.to_string(),
            },
            "get_status" => ToolCall::GetStatus,
            "get_financials" => ToolCall::GetFinancials,
            "get_market_forecast" => ToolCall::GetMarketForecast {
                horizon: match it.next() {
                    Some(h) => number(h, "horizon")?,
                    None => DEFAULT_FORECAST_HORIZON,
                },
            },
            "log_issue" => {
                let category = required(&mut it, "log_issue", "category")?.to_string();
                let description = it.collect::<Vec<_>>().join(" ");
                if description.is_empty() {
                    return Err(ParseError::MissingArg {
                        tool: "log_issue",
                        arg: "description",
                    });
                }
                ToolCall::LogIssue {
                    category,
                    description,
                }
            }
            other => return Err(ParseError::UnknownTool(other.to_string())),
        };
        Ok(call)
    }
}

/// Forecast with tick keys written as strings, in tick order.
#[derive(Clone, Debug, PartialEq)]
pub struct WireForecast(pub Forecast);

impl Serialize for WireForecast {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (tick, point) in self.0.iter() {
            map.serialize_entry(&tick.to_string(), point)?;
        }
        map.end()
    }
}

/// Rejection as seen on the wire.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolError {
    pub kind: &'static str,
    pub message: String,
}

impl From<CommandError> for ToolError {
    fn from(e: CommandError) -> Self {
        ToolError {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Result of dispatching a [`ToolCall`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "result", content = "value", rename_all = "snake_case")]
pub enum ToolOutput {
    Message(String),
    Status(FactoryStatus),
    Financials(Financials),
    Forecast(WireForecast),
    Error(ToolError),
}

impl ToolOutput {
    fn from_result<T: fmt::Display>(r: Result<T, CommandError>) -> Self {
        match r {
            Ok(receipt) => ToolOutput::Message(receipt.to_string()),
            Err(e) => ToolOutput::Error(e.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutput::Error(_))
    }
}

impl fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolOutput::Message(m) => f.write_str(m),
            ToolOutput::Status(s) => write!(f, "{s}"),
            ToolOutput::Financials(fin) => write!(
                f,
                "Cash Balance: ${:.2} | Unit Cost: ${} | Unit Revenue (Est): ${}",
                fin.cash, fin.unit_cost, fin.unit_revenue_estimate
            ),
            ToolOutput::Forecast(w) => {
                let lines: Vec<String> = w
                    .0
                    .iter()
                    .map(|(t, p)| format!("tick {t}: demand {} @ ${}", p.demand, p.price))
                    .collect();
                f.write_str(&lines.join("\n"))
            }
            ToolOutput::Error(e) => write!(f, "{}: {}", e.kind, e.message),
        }
    }
}

/// The eight operations, bound to one shared twin.
#[derive(Clone)]
pub struct FactoryTools {
    twin: SharedTwin,
}

impl FactoryTools {
    pub fn new(twin: SharedTwin) -> Self {
        Self { twin }
    }

    pub fn twin(&self) -> &SharedTwin {
        &self.twin
    }

    /// Starts production. Consumes cash and wears the machine.
    pub fn start_job(&self, order_id: &str, qty: u32) -> Result<JobStarted, CommandError> {
        self.twin.write(|t| t.start_job(order_id, qty))
    }

    /// Stops a job immediately; its cost is not refunded.
    pub fn cancel_job(&self, order_id: &str) -> Result<JobCancelled, CommandError> {
        self.twin.write(|t| t.cancel_job(order_id))
    }

    pub fn repair_machine(&self) -> Result<MachineRepaired, CommandError> {
        self.twin.write(|t| t.repair_machine())
    }

    pub fn change_shift(&self, new_shift: &str) -> Result<ShiftChanged, CommandError> {
        self.twin.write(|t| t.change_shift(new_shift))
    }

    pub fn get_status(&self) -> FactoryStatus {
        self.twin.read(|t| t.status())
    }

    pub fn get_financials(&self) -> Financials {
        self.twin.read(|t| t.financials())
    }

    /// Draws fresh noise, so it takes the write lock. The horizon is clamped
    /// to [`MAX_FORECAST_HORIZON`].
    pub fn get_market_forecast(&self, horizon: u32) -> WireForecast {
        let horizon = horizon.min(MAX_FORECAST_HORIZON);
        WireForecast(self.twin.write(|t| t.market_forecast(horizon)))
    }

    pub fn log_issue(&self, category: &str, description: &str) -> &'static str {
        self.twin.read(|t| t.log_issue(category, description))
    }

    pub fn dispatch(&self, call: ToolCall) -> ToolOutput {
        debug!(?call, "dispatching tool call");
        match call {
            ToolCall::StartJob { order_id, qty } => {
                ToolOutput::from_result(self.start_job(&order_id, qty))
            }
            ToolCall::CancelJob { order_id } => ToolOutput::from_result(self.cancel_job(&order_id)),
            ToolCall::RepairMachine => ToolOutput::from_result(self.repair_machine()),
            ToolCall::ChangeShift { new_shift } => {
                ToolOutput::from_result(self.change_shift(&new_shift))
            }
            ToolCall::GetStatus => ToolOutput::Status(self.get_status()),
            ToolCall::GetFinancials => ToolOutput::Financials(self.get_financials()),
            ToolCall::GetMarketForecast { horizon } => {
                ToolOutput::Forecast(self.get_market_forecast(horizon))
            }
            ToolCall::LogIssue {
                category,
                description,
            } => ToolOutput::Message(self.log_issue(&category, &description).to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::MemoryHistory;
    use rust_decimal::Decimal;
    use twin_core::TwinConfig;
    use twin_market::{MarketModel, ZeroNoise};
    use twin_runtime::FactoryTwin;

    fn tools() -> FactoryTools {
        let cfg = TwinConfig::default();
        let market = MarketModel::with_noise(cfg.market.clone(), ZeroNoise);
        let twin = FactoryTwin::with_market(cfg, market, MemoryHistory::new()).unwrap();
        FactoryTools::new(SharedTwin::new(twin))
    }

    #[test]
    fn parses_text_lines() {
        assert_eq!(
            "start_job O1 10".parse::<ToolCall>(),
            Ok(ToolCall::StartJob {
                order_id: "O1".into(),
                qty: 10
            })
        );
        assert_eq!(
            "get_market_forecast".parse::<ToolCall>(),
            Ok(ToolCall::GetMarketForecast { horizon: 5 })
        );
        assert_eq!(
            "log_issue ACCESS_DENIED asked for   payroll".parse::<ToolCall>(),
            Ok(ToolCall::LogIssue {
                category: "ACCESS_DENIED".into(),
                description: "asked for payroll".into()
            })
        );
        assert_eq!(
            "start_job O1".parse::<ToolCall>(),
            Err(ParseError::MissingArg {
                tool: "start_job",
                arg: "qty"
            })
        );
        assert_eq!(
            "start_job O1 -3".parse::<ToolCall>(),
            Err(ParseError::BadNumber {
                arg: "qty",
                value: "-3".into()
            })
        );
        assert_eq!("   ".parse::<ToolCall>(), Err(ParseError::Empty));
        assert_eq!(
            "launch_rocket".parse::<ToolCall>(),
            Err(ParseError::UnknownTool("launch_rocket".into()))
        );
    }

    #[test]
    fn parses_json_calls() {
        let call: ToolCall = r#"{"tool":"change_shift","args":{"new_shift":"NIGHT"}}"#
            .parse()
            .unwrap();
        assert_eq!(
            call,
            ToolCall::ChangeShift {
                new_shift: "NIGHT".into()
            }
        );
        let call: ToolCall = r#"{"tool":"repair_machine"}"#.parse().unwrap();
        assert_eq!(call, ToolCall::RepairMachine);
        let call: ToolCall = r#"{"tool":"get_market_forecast","args":{}}"#.parse().unwrap();
        assert_eq!(call, ToolCall::GetMarketForecast { horizon: 5 });
        assert!(matches!(
            r#"{"tool":"start_job","args":{"order_id":"X","qty":-1}}"#.parse::<ToolCall>(),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn json_args_may_be_missing_or_empty() {
        let call: ToolCall = r#"{"tool":"get_market_forecast"}"#.parse().unwrap();
        assert_eq!(call, ToolCall::GetMarketForecast { horizon: 5 });
        let call: ToolCall = r#"{"tool":"get_market_forecast","args":null}"#.parse().unwrap();
        assert_eq!(call, ToolCall::GetMarketForecast { horizon: 5 });
        let call: ToolCall = r#"{"tool":"get_market_forecast","args":{"horizon":8}}"#
            .parse()
            .unwrap();
        assert_eq!(call, ToolCall::GetMarketForecast { horizon: 8 });
        for (json, expected) in [
            (r#"{"tool":"get_status","args":{}}"#, ToolCall::GetStatus),
            (r#"{"tool":"get_financials","args":{}}"#, ToolCall::GetFinancials),
            (r#"{"tool":"repair_machine","args":{}}"#, ToolCall::RepairMachine),
            (r#"{"tool":"get_status"}"#, ToolCall::GetStatus),
        ] {
            assert_eq!(json.parse::<ToolCall>(), Ok(expected), "{json}");
        }
        let call: ToolCall =
            serde_json::from_str(r#"{"tool":"get_financials","args":{}}"#).unwrap();
        assert_eq!(call, ToolCall::GetFinancials);
    }

    #[test]
    fn json_rejects_unknown_tools_and_missing_args() {
        assert_eq!(
            r#"{"tool":"launch_rocket","args":{}}"#.parse::<ToolCall>(),
            Err(ParseError::UnknownTool("launch_rocket".into()))
        );
        assert!(matches!(
            r#"{"tool":"cancel_job","args":{}}"#.parse::<ToolCall>(),
            Err(ParseError::Json(_))
        ));
        assert!(matches!(
            r#"{"tool":"get_status","args":[1]}"#.parse::<ToolCall>(),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn forecast_horizon_is_clamped() {
        let t = tools();
        assert_eq!(t.get_market_forecast(u32::MAX).0.len(), MAX_FORECAST_HORIZON as usize);
        let out = t.dispatch("get_market_forecast 4000000000".parse().unwrap());
        match out {
            ToolOutput::Forecast(w) => assert_eq!(w.0.len(), MAX_FORECAST_HORIZON as usize),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(t.get_market_forecast(3).0.len(), 3);
    }

    #[test]
    fn every_tool_name_parses() {
        let lines = [
            "start_job A 1",
            "cancel_job A",
            "repair_machine",
            "change_shift DAY",
            "get_status",
            "get_financials",
            "get_market_forecast 3",
            "log_issue X y",
        ];
        for (name, line) in TOOL_NAMES.iter().zip(lines) {
            assert!(line.starts_with(*name));
            assert!(line.parse::<ToolCall>().is_ok(), "{line}");
        }
    }

    #[test]
    fn dispatch_returns_messages_and_errors() {
        let t = tools();
        let out = t.dispatch("start_job O1 10".parse().unwrap());
        assert_eq!(
            out,
            ToolOutput::Message("Job O1 started. Cost: $500. Est. Duration: 5 ticks.".into())
        );
        let out = t.dispatch("cancel_job NON_EXISTENT".parse().unwrap());
        assert!(out.is_error());
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            serde_json::json!({
                "result": "error",
                "value": {"kind": "JOB_NOT_FOUND", "message": "job NON_EXISTENT not found"}
            })
        );
        let out = t.dispatch("change_shift SIDEWAYS".parse().unwrap());
        assert_eq!(out.to_string(), "INVALID_SHIFT: invalid shift \"SIDEWAYS\", use DAY or NIGHT");
        let out = t.dispatch("log_issue BUG something odd".parse().unwrap());
        assert_eq!(out, ToolOutput::Message("LOGGED".into()));
    }

    #[test]
    fn status_and_financials_are_typed() {
        let t = tools();
        t.start_job("O1", 10).unwrap();
        let status = t.get_status();
        assert_eq!(status.cash, Decimal::new(500, 0));
        assert_eq!(status.health.value(), 95.0);
        let fin = t.get_financials();
        assert_eq!(fin.unit_cost, Decimal::new(50, 0));
        let v = serde_json::to_value(t.dispatch(ToolCall::GetStatus)).unwrap();
        assert_eq!(v["result"], "status");
        assert_eq!(v["value"]["active_job_count"], 1);
        assert_eq!(v["value"]["shift"], "DAY");
    }

    #[test]
    fn forecast_keys_are_strings_in_tick_order() {
        let t = tools();
        t.twin().write(|tw| {
            tw.advance(7);
        });
        let wire = t.get_market_forecast(5);
        let json = serde_json::to_string(&wire).unwrap();
        let keys = ["\"8\"", "\"9\"", "\"10\"", "\"11\"", "\"12\""];
        let positions: Vec<usize> = keys.iter().map(|k| json.find(*k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{json}");
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["12"]["demand"], 10);
        let price: Decimal = v["12"]["price"].as_str().unwrap().parse().unwrap();
        assert_eq!(price, Decimal::new(150, 0));
    }
}
