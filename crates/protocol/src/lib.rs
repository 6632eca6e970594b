//! Command protocol for advisory replies.
//!
//! An advisory reply is free text that may carry any number of command
//! blocks:
//!
//! ```text
//! Breadth is strong, adding to ETH.
//! <tooluse>
//! {"kind": "trade_in", "info": "long ETH", "args": {"target": "ETH/USDT", "side": "LONG", "count_usdt": 50}}
//! </tooluse>
//! ```
//!
//! [`decode_reply`] turns such a reply into the prose (reasoning) and an
//! ordered list of [`Command`]s. Decoding is pure and never fails as a whole:
//! a broken block becomes a malformed command and its neighbours are
//! unaffected.

pub mod args;
pub mod codec;
pub mod command;
pub mod summary;

pub use args::ArgumentError;
pub use codec::{decode_reply, DecodedReply, CLOSE_TAG, OPEN_TAG};
pub use command::{
    CancelFilter, CancelOrder, CancelOrders, ClosePosition, Command, CommandKind, Instruction,
    ModifyProtection, OpenPosition, Payload, SetLeverage, SetMarginMode, UpdateMemory,
};
pub use summary::{summarize, summarize_command};
