use crate::args::{ArgReader, ArgumentError};
use autotrader_core::{MarginMode, PositionSide, TriggerKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Command kinds understood by the execution layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    OpenPosition,
    ClosePosition,
    SetLeverage,
    SetMarginMode,
    ModifyProtection,
    CancelOrders,
    CancelOrder,
    UpdateMemory,
    /// Block decoded but its kind is not one of the above.
    Unrecognized,
    /// Block payload could not be decoded.
    Malformed,
}

impl CommandKind {
    /// Maps a wire name to a kind; `None` for unknown names.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "trade_in" | "open_position" => Some(Self::OpenPosition),
            "close_position" => Some(Self::ClosePosition),
            "set_leverage" => Some(Self::SetLeverage),
            "set_margin_mode" => Some(Self::SetMarginMode),
            "modify_position" => Some(Self::ModifyProtection),
            "cancel_orders" => Some(Self::CancelOrders),
            "cancel_order" => Some(Self::CancelOrder),
            "update_memory" => Some(Self::UpdateMemory),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenPosition => "trade_in",
            Self::ClosePosition => "close_position",
            Self::SetLeverage => "set_leverage",
            Self::SetMarginMode => "set_margin_mode",
            Self::ModifyProtection => "modify_position",
            Self::CancelOrders => "cancel_orders",
            Self::CancelOrder => "cancel_order",
            Self::UpdateMemory => "update_memory",
            Self::Unrecognized => "unrecognized",
            Self::Malformed => "malformed",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One command block decoded from an advisory reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    /// Byte offset of the block's opening delimiter in the reply.
    pub position: usize,
    pub kind: CommandKind,
    /// Kind exactly as written by the advisory.
    pub raw_kind: String,
    pub info: String,
    pub args: BTreeMap<String, String>,
    pub payload: Payload,
}

impl Command {
    /// Validated instruction, if the block carried one.
    #[must_use]
    pub fn instruction(&self) -> Option<&Instruction> {
        match &self.payload {
            Payload::Decoded(instruction) => Some(instruction),
            _ => None,
        }
    }

    /// Malformed blocks are recorded but never executed.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self.payload, Payload::Malformed { .. })
    }

    /// Symbol the command targets, when it has one.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        match self.instruction() {
            Some(instruction) => instruction.symbol(),
            None => self.args.get("target").map(String::as_str),
        }
    }
}

/// Result of decoding one block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Payload {
    Decoded(Instruction),
    /// Known kind, arguments violate its schema.
    Invalid { reason: String },
    /// Unknown kind, kept for operator visibility.
    Unrecognized,
    /// Payload is not a decodable record.
    Malformed { error: String, raw: String },
}

/// Typed arguments per command kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    OpenPosition(OpenPosition),
    ClosePosition(ClosePosition),
    SetLeverage(SetLeverage),
    SetMarginMode(SetMarginMode),
    ModifyProtection(ModifyProtection),
    CancelOrders(CancelOrders),
    CancelOrder(CancelOrder),
    UpdateMemory(UpdateMemory),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenPosition {
    pub symbol: String,
    pub side: PositionSide,
    /// Notional to commit, in quote currency.
    pub notional: Decimal,
    pub leverage: Option<u32>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClosePosition {
    pub symbol: String,
    /// 1..=100
    pub percentage: u8,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetLeverage {
    pub symbol: String,
    pub leverage: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetMarginMode {
    pub symbol: String,
    pub mode: MarginMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModifyProtection {
    pub symbol: String,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelFilter {
    StopLoss,
    TakeProfit,
    All,
}

impl CancelFilter {
    #[must_use]
    pub fn matches(self, trigger: Option<TriggerKind>) -> bool {
        match self {
            Self::All => trigger.is_some(),
            Self::StopLoss => trigger == Some(TriggerKind::StopLoss),
            Self::TakeProfit => trigger == Some(TriggerKind::TakeProfit),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelOrders {
    pub symbol: String,
    pub filter: CancelFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelOrder {
    pub symbol: String,
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateMemory {
    pub content: String,
}

impl Instruction {
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::OpenPosition(_) => CommandKind::OpenPosition,
            Self::ClosePosition(_) => CommandKind::ClosePosition,
            Self::SetLeverage(_) => CommandKind::SetLeverage,
            Self::SetMarginMode(_) => CommandKind::SetMarginMode,
            Self::ModifyProtection(_) => CommandKind::ModifyProtection,
            Self::CancelOrders(_) => CommandKind::CancelOrders,
            Self::CancelOrder(_) => CommandKind::CancelOrder,
            Self::UpdateMemory(_) => CommandKind::UpdateMemory,
        }
    }

    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::OpenPosition(i) => Some(&i.symbol),
            Self::ClosePosition(i) => Some(&i.symbol),
            Self::SetLeverage(i) => Some(&i.symbol),
            Self::SetMarginMode(i) => Some(&i.symbol),
            Self::ModifyProtection(i) => Some(&i.symbol),
            Self::CancelOrders(i) => Some(&i.symbol),
            Self::CancelOrder(i) => Some(&i.symbol),
            Self::UpdateMemory(_) => None,
        }
    }

    /// Validates `args` against the schema of `kind`.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule: a missing key, an unparsable value,
    /// or an out-of-range value.
    pub fn from_args(
        kind: CommandKind,
        args: &BTreeMap<String, String>,
    ) -> Result<Self, ArgumentError> {
        let reader = ArgReader::new(args);
        let instruction = match kind {
            CommandKind::OpenPosition => Self::OpenPosition(OpenPosition {
                symbol: reader.symbol()?,
                side: parse_side(reader.required("side")?)?,
                notional: reader.positive_decimal("count_usdt")?,
                leverage: match reader.optional_whole("leverage")? {
                    Some(0) => {
                        return Err(ArgumentError::Constraint(
                            "leverage must be at least 1".to_string(),
                        ))
                    }
                    other => other,
                },
                stop_loss: reader.optional_positive_decimal("stop_loss_price")?,
                take_profit: reader.optional_positive_decimal("take_profit_price")?,
            }),
            CommandKind::ClosePosition => {
                let percentage = reader.whole("percentage")?;
                if !(1..=100).contains(&percentage) {
                    return Err(ArgumentError::Constraint(format!(
                        "percentage must be between 1 and 100, got {percentage}"
                    )));
                }
                Self::ClosePosition(ClosePosition {
                    symbol: reader.symbol()?,
                    percentage: u8::try_from(percentage).unwrap_or(100),
                    reason: reader.optional("reason").map(str::to_string),
                })
            }
            CommandKind::SetLeverage => {
                let leverage = reader.whole("leverage")?;
                if leverage == 0 {
                    return Err(ArgumentError::Constraint(
                        "leverage must be at least 1".to_string(),
                    ));
                }
                Self::SetLeverage(SetLeverage {
                    symbol: reader.symbol()?,
                    leverage,
                })
            }
            CommandKind::SetMarginMode => {
                let raw = reader.required("mode")?;
                let mode = raw.parse::<MarginMode>().map_err(|reason| ArgumentError::Invalid {
                    key: "mode",
                    value: raw.to_string(),
                    reason,
                })?;
                Self::SetMarginMode(SetMarginMode {
                    symbol: reader.symbol()?,
                    mode,
                })
            }
            CommandKind::ModifyProtection => {
                let stop_loss = reader.optional_positive_decimal("stop_loss_price")?;
                let take_profit = reader.optional_positive_decimal("take_profit_price")?;
                if stop_loss.is_none() && take_profit.is_none() {
                    return Err(ArgumentError::Constraint(
                        "at least one of stop_loss_price or take_profit_price is required"
                            .to_string(),
                    ));
                }
                Self::ModifyProtection(ModifyProtection {
                    symbol: reader.symbol()?,
                    stop_loss,
                    take_profit,
                })
            }
            CommandKind::CancelOrders => {
                let filter = match reader.optional("order_type") {
                    None => CancelFilter::All,
                    Some(raw) => match raw.to_ascii_lowercase().as_str() {
                        "all" => CancelFilter::All,
                        "stop_loss" | "sl" => CancelFilter::StopLoss,
                        "take_profit" | "tp" => CancelFilter::TakeProfit,
                        _ => {
                            return Err(ArgumentError::Invalid {
                                key: "order_type",
                                value: raw.to_string(),
                                reason: "expected stop_loss, take_profit or all".to_string(),
                            })
                        }
                    },
                };
                Self::CancelOrders(CancelOrders {
                    symbol: reader.symbol()?,
                    filter,
                })
            }
            CommandKind::CancelOrder => Self::CancelOrder(CancelOrder {
                symbol: reader.symbol()?,
                order_id: reader.required("order_id")?.to_string(),
            }),
            CommandKind::UpdateMemory => Self::UpdateMemory(UpdateMemory {
                // Content is kept verbatim, including surrounding whitespace.
                content: args
                    .get("content")
                    .filter(|c| !c.trim().is_empty())
                    .cloned()
                    .ok_or(ArgumentError::Missing("content"))?,
            }),
            CommandKind::Unrecognized | CommandKind::Malformed => {
                return Err(ArgumentError::Constraint(format!(
                    "'{kind}' carries no instruction"
                )))
            }
        };
        Ok(instruction)
    }
}

fn parse_side(raw: &str) -> Result<PositionSide, ArgumentError> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "LONG" | "BUY" => Ok(PositionSide::Long),
        "SHORT" | "SELL" => Ok(PositionSide::Short),
        _ => Err(ArgumentError::Invalid {
            key: "side",
            value: raw.to_string(),
            reason: "expected LONG or SHORT".to_string(),
        }),
    }
}
