//! Local command handler (HALT, SHUTDOWN)

use super::{HandlerContext, LocalResult, ShutdownKind};
use crate::error::DispatchError;
use tracing::{info, warn};

/// Handle a COMMAND request
pub fn handle_command(ctx: &HandlerContext, command: Option<&str>) -> LocalResult {
    let Some(command) = command else {
        return LocalResult::Rejected {
            error: DispatchError::MissingProperty(bert_shared::keys::COMMAND),
        };
    };

    match command.trim().to_ascii_uppercase().as_str() {
        "HALT" => {
            info!("  [HALT] {} is halting", ctx.identity.name);
            LocalResult::Shutdown {
                kind: ShutdownKind::Halt,
                text: "I am halting".into(),
            }
        }
        "SHUTDOWN" => {
            info!("  [SHUTDOWN] {} is shutting down and powering off", ctx.identity.name);
            LocalResult::Shutdown {
                kind: ShutdownKind::PowerOff,
                text: "I am shutting down".into(),
            }
        }
        _ => {
            warn!("  Unrecognized command: {}", command);
            LocalResult::Rejected {
                error: DispatchError::UnknownCommand(command.to_string()),
            }
        }
    }
}
