//! Control-plane command classification for `Router::runcmd`.
//!
//! Commands are dot-separated: `<target>.<action>[.<args>]`.
//!
//! - `router.services`, `router.workers`, `router.stats`, `router.env.<key>`
//!   are answered by the router itself
//! - a numeric target is a service id; any other target is a unique-service
//!   name. The target receives a `Control` message with `<action>` as header
//!   and `<args>` as payload
//!
//! Args keep any further dots, so `router.env.db.host` reads key `db.host`.

use switchyard_core::ServiceId;

/// Target of a service-directed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    Id(ServiceId),
    Name(&'a str),
}

/// A classified control-plane command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// `router.services`: number of live services.
    ServiceCount,
    /// `router.workers`: size of the worker pool.
    WorkerCount,
    /// `router.stats`: JSON router statistics.
    Stats,
    /// `router.env.<key>`: one environment value.
    Env(&'a str),
    /// Forward `action` with `args` to a service.
    Service {
        target: Target<'a>,
        action: &'a str,
        args: &'a str,
    },
}

/// Errors from classifying a command string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("command `{command}` has no action")]
    MissingAction { command: String },
    #[error("unknown router command `{action}`")]
    UnknownRouterCommand { action: String },
    #[error("command `{command}` needs an argument")]
    MissingArgument { command: String },
}

/// Reserved target handled by the router itself.
pub const ROUTER_TARGET: &str = "router";

/// Classify `cmd` into a [`Command`].
///
/// # Errors
///
/// Returns `CommandError` when the target or action is missing, when a
/// router command is unknown, or when `router.env` has no key.
pub fn parse(cmd: &str) -> Result<Command<'_>, CommandError> {
    let cmd = cmd.trim();
    let mut parts = cmd.splitn(3, '.');

    let target = parts.next().unwrap_or_default();
    if target.is_empty() {
        return Err(CommandError::Empty);
    }
    let action = match parts.next() {
        Some(action) if !action.is_empty() => action,
        _ => {
            return Err(CommandError::MissingAction {
                command: cmd.to_owned(),
            })
        }
    };
    let args = parts.next().unwrap_or_default();

    if target == ROUTER_TARGET {
        return match action {
            "services" => Ok(Command::ServiceCount),
            "workers" => Ok(Command::WorkerCount),
            "stats" => Ok(Command::Stats),
            "env" if args.is_empty() => Err(CommandError::MissingArgument {
                command: cmd.to_owned(),
            }),
            "env" => Ok(Command::Env(args)),
            other => Err(CommandError::UnknownRouterCommand {
                action: other.to_owned(),
            }),
        };
    }

    let target = target
        .parse::<ServiceId>()
        .map_or(Target::Name(target), Target::Id);

    Ok(Command::Service {
        target,
        action,
        args,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_queries() {
        assert_eq!(parse("router.services"), Ok(Command::ServiceCount));
        assert_eq!(parse("router.workers"), Ok(Command::WorkerCount));
        assert_eq!(parse("router.stats"), Ok(Command::Stats));
        assert_eq!(parse("router.env.db.host"), Ok(Command::Env("db.host")));
    }

    #[test]
    fn numeric_target_is_service_id() {
        assert_eq!(
            parse("16777217.exit"),
            Ok(Command::Service {
                target: Target::Id(ServiceId(16_777_217)),
                action: "exit",
                args: "",
            })
        );
    }

    #[test]
    fn named_target_keeps_args() {
        assert_eq!(
            parse(" gate.kick.user.42 "),
            Ok(Command::Service {
                target: Target::Name("gate"),
                action: "kick",
                args: "user.42",
            })
        );
    }

    #[test]
    fn malformed_commands_are_rejected() {
        assert_eq!(parse(""), Err(CommandError::Empty));
        assert_eq!(parse(".exit"), Err(CommandError::Empty));
        assert!(matches!(
            parse("gate"),
            Err(CommandError::MissingAction { .. })
        ));
        assert!(matches!(
            parse("gate."),
            Err(CommandError::MissingAction { .. })
        ));
        assert!(matches!(
            parse("router.env"),
            Err(CommandError::MissingArgument { .. })
        ));
        assert_eq!(
            parse("router.reboot"),
            Err(CommandError::UnknownRouterCommand {
                action: "reboot".to_string()
            })
        );
    }
}
