//! Message type codes (spec.md §6.1). The numeric space overlaps between
//! control replies (0-2) and query requests (1-5); disambiguation is by
//! context - a server only ever emits 0-2 in answer to a `CONTROL_COMMAND`,
//! never as a freestanding request.

pub const COMMAND_SUCCESS: u8 = 0;
pub const COMMAND_NOT_FOUND: u8 = 1;
pub const COMMAND_INVALID_ARG_COUNT: u8 = 2;

pub const QUERY_VERSION: u8 = 1;
pub const QUERY_PAYLOAD_SIZE: u8 = 2;
pub const QUERY_NAME: u8 = 3;
pub const QUERY_COMMANDS1: u8 = 4;
pub const QUERY_COMMANDS2: u8 = 5;
pub const UPDATE_PAYLOAD_SIZE: u8 = 6;
pub const USER_COMMAND: u8 = 7;
pub const COMMAND_COMPLETE: u8 = 8;
pub const QUERY_BANNER: u8 = 9;
pub const QUERY_TITLE: u8 = 10;
pub const QUERY_PROMPT: u8 = 11;
pub const CONTROL_COMMAND: u8 = 12;

/// True for the meta-query codes the server answers directly out of its
/// static identity (title/banner/prompt/commands/version/payload size).
#[inline]
pub fn is_meta_query(msg_type: u8) -> bool {
    matches!(
        msg_type,
        QUERY_VERSION
            | QUERY_PAYLOAD_SIZE
            | QUERY_NAME
            | QUERY_COMMANDS1
            | QUERY_COMMANDS2
            | QUERY_BANNER
            | QUERY_TITLE
            | QUERY_PROMPT
    )
}
