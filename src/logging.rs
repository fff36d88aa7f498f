/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the participant's
//! [configuration](crate::participant::Configuration).
//!
//! quorum_rs logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [CompileBlock](crate::events::CompileBlockEvent) is printed:
//!
//! ```text
//! CompileBlock, 1701329264, fNGCJyk, 12
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the block's hash.
//! - The fourth value is the height of the block.

use crate::events::*;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const COMPILE_BLOCK: &str = "CompileBlock";
pub const TOSS_SIBLING: &str = "TossSibling";
pub const EXECUTE_SCRIPT: &str = "ExecuteScript";
pub const COMMIT_SECTOR_UPDATE: &str = "CommitSectorUpdate";
pub const DROP_SECTOR_UPDATE: &str = "DropSectorUpdate";

pub const NEW_SIGNED_UPDATE: &str = "NewSignedUpdate";
pub const RECEIVE_SIGNED_UPDATE: &str = "ReceiveSignedUpdate";
pub const REJECT_SIGNED_UPDATE: &str = "RejectSignedUpdate";

pub const START_REPAIR: &str = "StartRepair";
pub const END_REPAIR: &str = "EndRepair";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for CompileBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |compile_block_event: &CompileBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COMPILE_BLOCK,
                secs_since_unix_epoch(compile_block_event.timestamp),
                first_seven_base64_chars(&compile_block_event.block.bytes()),
                compile_block_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for TossSiblingEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |toss_sibling_event: &TossSiblingEvent| {
            log::info!(
                "{}, {}, {}, {}",
                TOSS_SIBLING,
                secs_since_unix_epoch(toss_sibling_event.timestamp),
                toss_sibling_event.sibling_index,
                toss_sibling_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for ExecuteScriptEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |execute_script_event: &ExecuteScriptEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                EXECUTE_SCRIPT,
                secs_since_unix_epoch(execute_script_event.timestamp),
                execute_script_event.wallet_id,
                first_seven_base64_chars(&execute_script_event.script_input.bytes()),
                execute_script_event.cost,
                execute_script_event.trap.as_deref().unwrap_or("ok")
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitSectorUpdateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_event: &CommitSectorUpdateEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_SECTOR_UPDATE,
                secs_since_unix_epoch(commit_event.timestamp),
                commit_event.wallet_id,
                commit_event.counter,
                commit_event.repair_needed
            )
        };
        Box::new(logger)
    }
}

impl Logger for DropSectorUpdateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |drop_event: &DropSectorUpdateEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                DROP_SECTOR_UPDATE,
                secs_since_unix_epoch(drop_event.timestamp),
                drop_event.wallet_id,
                drop_event.counters
            )
        };
        Box::new(logger)
    }
}

impl Logger for NewSignedUpdateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |new_signed_update_event: &NewSignedUpdateEvent| {
            log::info!(
                "{}, {}, {}, {}",
                NEW_SIGNED_UPDATE,
                secs_since_unix_epoch(new_signed_update_event.timestamp),
                new_signed_update_event.sibling_index,
                new_signed_update_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveSignedUpdateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_event: &ReceiveSignedUpdateEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                RECEIVE_SIGNED_UPDATE,
                secs_since_unix_epoch(receive_event.timestamp),
                receive_event.height,
                receive_event.signatories
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectSignedUpdateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_event: &RejectSignedUpdateEvent| {
            log::info!(
                "{}, {}, {}, {}",
                REJECT_SIGNED_UPDATE,
                secs_since_unix_epoch(reject_event.timestamp),
                reject_event.height,
                reject_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartRepairEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_repair_event: &StartRepairEvent| {
            log::info!(
                "{}, {}, {}",
                START_REPAIR,
                secs_since_unix_epoch(start_repair_event.timestamp),
                start_repair_event.wallet_id
            )
        };
        Box::new(logger)
    }
}

impl Logger for EndRepairEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |end_repair_event: &EndRepairEvent| {
            log::info!(
                "{}, {}, {}, {}",
                END_REPAIR,
                secs_since_unix_epoch(end_repair_event.timestamp),
                end_repair_event.wallet_id,
                end_repair_event.success
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
