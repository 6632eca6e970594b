use crate::command::{Command, Instruction, Payload};

const MEMORY_PREVIEW_CHARS: usize = 50;

/// One line per command, or `No actions taken.` for an empty list.
#[must_use]
pub fn summarize(commands: &[Command]) -> String {
    if commands.is_empty() {
        return "No actions taken.".to_string();
    }
    commands
        .iter()
        .map(summarize_command)
        .collect::<Vec<_>>()
        .join("\n")
}

#[must_use]
pub fn summarize_command(command: &Command) -> String {
    match &command.payload {
        Payload::Decoded(instruction) => summarize_instruction(instruction, &command.info),
        Payload::Invalid { reason } => format!("[INVALID] {}: {reason}", command.raw_kind),
        Payload::Unrecognized => format!("[UNRECOGNIZED] {}", command.raw_kind),
        Payload::Malformed { error, .. } => format!("[MALFORMED] {error}"),
    }
}

fn summarize_instruction(instruction: &Instruction, info: &str) -> String {
    match instruction {
        Instruction::OpenPosition(open) => {
            format!("[TRADE] {} {}: {info}", open.side, open.symbol)
        }
        Instruction::ClosePosition(close) => {
            format!("[CLOSE] {} {}%: {info}", close.symbol, close.percentage)
        }
        Instruction::SetLeverage(set) => format!("[LEVERAGE] {} -> {}x", set.symbol, set.leverage),
        Instruction::SetMarginMode(set) => format!("[MARGIN] {} -> {}", set.symbol, set.mode),
        Instruction::ModifyProtection(modify) => format!("[MODIFY] {}: {info}", modify.symbol),
        Instruction::CancelOrders(cancel) => {
            format!("[CANCEL] {} ({})", cancel.symbol, cancel.filter.as_str())
        }
        Instruction::CancelOrder(cancel) => {
            format!("[CANCEL_ID] {} order_id={}", cancel.symbol, cancel.order_id)
        }
        Instruction::UpdateMemory(memory) => {
            let mut preview: String = memory.content.chars().take(MEMORY_PREVIEW_CHARS).collect();
            if memory.content.chars().count() > MEMORY_PREVIEW_CHARS {
                preview.push_str("...");
            }
            format!("[MEMORY] {preview}")
        }
    }
}
