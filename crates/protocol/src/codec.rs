use crate::command::{Command, CommandKind, Instruction, Payload};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const OPEN_TAG: &str = "<tooluse>";
pub const CLOSE_TAG: &str = "</tooluse>";

/// An advisory reply split into prose and commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DecodedReply {
    /// Reply text with every command block removed.
    pub reasoning: String,
    /// One entry per block, in order of appearance.
    pub commands: Vec<Command>,
}

impl DecodedReply {
    #[must_use]
    pub fn has_memory_update(&self) -> bool {
        self.commands.iter().any(|c| {
            c.kind == CommandKind::UpdateMemory && c.instruction().is_some()
        })
    }
}

/// Splits `reply` into reasoning text and the commands it embeds.
///
/// Blocks are delimited by `<tooluse>` and `</tooluse>` (matched without
/// regard to case) and are scanned left to right without overlap. An opening
/// delimiter with no closing one is left in the prose. Each block is decoded
/// independently, so a broken block never affects its neighbours.
#[must_use]
pub fn decode_reply(reply: &str) -> DecodedReply {
    // ASCII lowering keeps byte offsets identical to `reply`.
    let folded = reply.to_ascii_lowercase();
    let mut commands = Vec::new();
    let mut prose = String::with_capacity(reply.len());
    let mut cursor = 0;

    while let Some(found) = folded[cursor..].find(OPEN_TAG) {
        let start = cursor + found;
        let body_start = start + OPEN_TAG.len();
        let Some(body_len) = folded[body_start..].find(CLOSE_TAG) else {
            break;
        };
        let body_end = body_start + body_len;

        prose.push_str(&reply[cursor..start]);
        commands.push(decode_block(start, reply[body_start..body_end].trim()));
        cursor = body_end + CLOSE_TAG.len();
    }
    prose.push_str(&reply[cursor..]);

    DecodedReply {
        reasoning: collapse_blank_lines(&prose),
        commands,
    }
}

fn decode_block(position: usize, raw: &str) -> Command {
    let body = strip_code_fence(raw);

    let value = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(strict_err) => match serde_json::from_str::<Value>(&strip_trailing_commas(body)) {
            Ok(value) => value,
            Err(_) => return malformed(position, raw, "", strict_err.to_string()),
        },
    };

    let Value::Object(record) = value else {
        return malformed(position, raw, "", "payload is not a JSON object");
    };

    let raw_kind = match record.get("kind").or_else(|| record.get("name")) {
        Some(Value::String(kind)) if !kind.trim().is_empty() => kind.trim().to_string(),
        Some(_) => return malformed(position, raw, "", "field 'kind' must be a non-empty string"),
        None => return malformed(position, raw, "", "missing field 'kind'"),
    };

    let info = match record.get("info") {
        Some(Value::String(info)) => info.trim().to_string(),
        Some(_) => return malformed(position, raw, &raw_kind, "field 'info' must be a string"),
        None => return malformed(position, raw, &raw_kind, "missing field 'info'"),
    };

    let args = match record.get("args") {
        Some(Value::Object(map)) => match flatten_args(map) {
            Ok(args) => args,
            Err(error) => return malformed(position, raw, &raw_kind, error),
        },
        Some(_) => return malformed(position, raw, &raw_kind, "field 'args' must be an object"),
        None => return malformed(position, raw, &raw_kind, "missing field 'args'"),
    };

    let (kind, payload) = match CommandKind::from_wire(&raw_kind) {
        Some(kind) => match Instruction::from_args(kind, &args) {
            Ok(instruction) => (kind, Payload::Decoded(instruction)),
            Err(err) => (
                kind,
                Payload::Invalid {
                    reason: err.to_string(),
                },
            ),
        },
        None => (CommandKind::Unrecognized, Payload::Unrecognized),
    };

    Command {
        position,
        kind,
        raw_kind,
        info,
        args,
        payload,
    }
}

fn malformed(position: usize, raw: &str, raw_kind: &str, error: impl Into<String>) -> Command {
    Command {
        position,
        kind: CommandKind::Malformed,
        raw_kind: raw_kind.to_string(),
        info: String::new(),
        args: BTreeMap::new(),
        payload: Payload::Malformed {
            error: error.into(),
            raw: raw.to_string(),
        },
    }
}

/// Normalises primitive argument values to strings; `null` means absent.
fn flatten_args(map: &Map<String, Value>) -> Result<BTreeMap<String, String>, String> {
    let mut args = BTreeMap::new();
    for (key, value) in map {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => continue,
            Value::Array(_) | Value::Object(_) => {
                return Err(format!("argument '{key}' is not a primitive value"));
            }
        };
        args.insert(key.clone(), text);
    }
    Ok(args)
}

/// Drops a surrounding markdown fence such as ```` ```json ... ``` ````.
fn strip_code_fence(body: &str) -> &str {
    let Some(rest) = body.strip_prefix("```") else {
        return body;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Removes commas that directly precede `}` or `]`, outside string literals.
fn strip_trailing_commas(body: &str) -> String {
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::with_capacity(body.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().copied().find(|n| !n.is_whitespace());
                if !matches!(next, Some('}' | ']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = Vec::new();
    let mut previous_blank = false;
    for line in text.lines().map(str::trim_end) {
        let blank = line.is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;
        out.push(line);
    }
    out.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ClosePosition, OpenPosition};
    use autotrader_core::PositionSide;
    use rust_decimal_macros::dec;

    const OPEN_ETH: &str = r#"<tooluse>
{"kind": "trade_in", "info": "long ETH", "args": {"target": "ETH/USDT", "side": "LONG", "count_usdt": 50}}
</tooluse>"#;

    const MEMORY: &str = r#"<tooluse>{"kind": "update_memory", "info": "notes", "args": {"content": "ETH long opened at breakout"}}</tooluse>"#;

    #[test]
    fn test_blocks_in_document_order() {
        let reply = format!("Breadth improving.\n{OPEN_ETH}\nThat's all.\n{MEMORY}\n");
        let decoded = decode_reply(&reply);

        assert_eq!(decoded.commands.len(), 2);
        assert_eq!(decoded.commands[0].kind, CommandKind::OpenPosition);
        assert_eq!(decoded.commands[1].kind, CommandKind::UpdateMemory);
        assert!(decoded.commands[0].position < decoded.commands[1].position);
        assert_eq!(
            decoded.commands[0].instruction(),
            Some(&Instruction::OpenPosition(OpenPosition {
                symbol: "ETH/USDT".to_string(),
                side: PositionSide::Long,
                notional: dec!(50),
                leverage: None,
                stop_loss: None,
                take_profit: None,
            }))
        );
        assert!(decoded.has_memory_update());
    }

    #[test]
    fn test_reasoning_excludes_block_payloads() {
        let reply = format!("A\n{OPEN_ETH}\nB\n\n\n{MEMORY}\nC");
        let decoded = decode_reply(&reply);
        assert_eq!(decoded.reasoning, "A\n\nB\n\nC");
        assert!(!decoded.reasoning.contains("trade_in"));
        assert!(!decoded.reasoning.contains("tooluse"));
    }

    #[test]
    fn test_malformed_block_does_not_disturb_neighbours() {
        let reply = format!(
            "A {OPEN_ETH} B <tooluse>{{\"kind\": \"close_position\", \"info\": </tooluse> C {MEMORY} D"
        );
        let decoded = decode_reply(&reply);

        assert_eq!(decoded.commands.len(), 3);
        assert_eq!(decoded.commands[0].kind, CommandKind::OpenPosition);
        assert!(decoded.commands[1].is_malformed());
        assert_eq!(decoded.commands[2].kind, CommandKind::UpdateMemory);
        assert_eq!(decoded.reasoning, "A  B  C  D");
    }

    #[test]
    fn test_no_blocks() {
        let decoded = decode_reply("Holding. Nothing to do this cycle.");
        assert!(decoded.commands.is_empty());
        assert_eq!(decoded.reasoning, "Holding. Nothing to do this cycle.");
        assert!(!decoded.has_memory_update());
    }

    #[test]
    fn test_unknown_kind_is_preserved() {
        let decoded = decode_reply(
            r#"<tooluse>{"kind": "hedge_portfolio", "info": "hedge", "args": {"ratio": 0.5}}</tooluse>"#,
        );
        let command = &decoded.commands[0];
        assert_eq!(command.kind, CommandKind::Unrecognized);
        assert_eq!(command.raw_kind, "hedge_portfolio");
        assert_eq!(command.payload, Payload::Unrecognized);
        assert_eq!(command.args.get("ratio").map(String::as_str), Some("0.5"));
    }

    #[test]
    fn test_invalid_arguments_are_kept_with_reason() {
        let decoded = decode_reply(
            r#"<tooluse>{"kind": "close_position", "info": "trim", "args": {"target": "SOL/USDT", "percentage": 150}}</tooluse>"#,
        );
        let command = &decoded.commands[0];
        assert_eq!(command.kind, CommandKind::ClosePosition);
        match &command.payload {
            Payload::Invalid { reason } => assert!(reason.contains("between 1 and 100")),
            other => panic!("expected invalid payload, got {other:?}"),
        }
    }

    #[test]
    fn test_trailing_commas_are_repaired() {
        let decoded = decode_reply(
            "<tooluse>{\"kind\": \"close_position\", \"info\": \"exit\", \"args\": {\"target\": \"SOL/USDT\", \"percentage\": \"100\",},}</tooluse>",
        );
        assert_eq!(
            decoded.commands[0].instruction(),
            Some(&Instruction::ClosePosition(ClosePosition {
                symbol: "SOL/USDT".to_string(),
                percentage: 100,
                reason: None,
            }))
        );
    }

    #[test]
    fn test_commas_inside_strings_survive_repair() {
        assert_eq!(strip_trailing_commas(r#"{"a": "x,}", }"#), r#"{"a": "x,}" }"#);
    }

    #[test]
    fn test_name_alias_fence_and_case_insensitive_tags() {
        let decoded = decode_reply(
            "<ToolUse>\n```json\n{\"name\": \"set_leverage\", \"info\": \"5x\", \"args\": {\"target\": \"BTC/USDT\", \"leverage\": \"5\"}}\n```\n</TOOLUSE>",
        );
        assert_eq!(decoded.commands.len(), 1);
        assert_eq!(decoded.commands[0].kind, CommandKind::SetLeverage);
        assert!(decoded.commands[0].instruction().is_some());
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let no_info = decode_reply(r#"<tooluse>{"kind": "update_memory", "args": {"content": "x"}}</tooluse>"#);
        assert!(no_info.commands[0].is_malformed());
        assert_eq!(no_info.commands[0].raw_kind, "update_memory");

        let nested = decode_reply(
            r#"<tooluse>{"kind": "update_memory", "info": "", "args": {"content": ["x"]}}</tooluse>"#,
        );
        assert!(nested.commands[0].is_malformed());
    }

    #[test]
    fn test_unterminated_block_stays_in_prose() {
        let decoded = decode_reply(&format!("{OPEN_ETH} then <tooluse>{{\"kind\": \"trade_in\""));
        assert_eq!(decoded.commands.len(), 1);
        assert!(decoded.reasoning.contains("<tooluse>"));
    }

    #[test]
    fn test_decoding_is_deterministic() {
        let reply = format!("x {OPEN_ETH} y <tooluse>nope</tooluse> {MEMORY}");
        assert_eq!(decode_reply(&reply), decode_reply(&reply));
    }

    #[test]
    fn test_multibyte_prose_is_preserved() {
        let reply = format!("Análise: ok {MEMORY} ✓");
        let decoded = decode_reply(&reply);
        assert_eq!(decoded.commands.len(), 1);
        assert_eq!(decoded.reasoning, "Análise: ok  ✓");
    }
}
