//! Chat command parsing.

/// A recognised bot command with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    List(ListOptions),
    Approve(Target),
    Reject(Target),
    Delete(Target),
    Resources { filter: Option<String> },
    Tracked,
    Stats,
    ChatId,
    Help,
    Version,
    Config,
}

/// Which settled groups `/list` includes besides the pending one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub archived: bool,
    pub approved: bool,
    pub rejected: bool,
}

/// Argument of `/approve`, `/reject` and `/delete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Approval id or identifier.
    pub key: String,
    pub voter: Option<String>,
}

/// Outcome of parsing a message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// Not a command, or a command addressed to another bot.
    NotACommand,
    Command(Command),
    /// Known command with unusable arguments; carries a usage line.
    BadArguments(&'static str),
    /// Unknown command name.
    Unknown(String),
}

impl Command {
    /// Commands that only require an admin user, not a configured chat.
    pub const fn admin_only(&self) -> bool {
        matches!(self, Self::Start | Self::ChatId | Self::Help | Self::Version)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::List(_) => "list",
            Self::Approve(_) => "approve",
            Self::Reject(_) => "reject",
            Self::Delete(_) => "delete",
            Self::Resources { .. } => "resources",
            Self::Tracked => "tracked",
            Self::Stats => "stats",
            Self::ChatId => "chatid",
            Self::Help => "help",
            Self::Version => "version",
            Self::Config => "config",
        }
    }
}

/// Help text listing every command.
pub const HELP: &str = "\
/start - Greeting
/list [archived] [approved] [rejected] (/l) - List pending approvals, optionally including settled groups
/approve <id|identifier> [voter] (/a) - Approve a pending item
/reject <id|identifier> [voter] (/r) - Reject a pending item
/delete <id|identifier> [voter] (/d) - Delete an approval item
/resources [regex] (/res) - List resources, optionally filtered
/tracked - List tracked images
/stats - Show daily statistics
/chatid - Print the chat id
/config (/c) - Print the bot configuration
/version (/v) - Print the bot version
/help (/h) - Show this help";

const APPROVE_USAGE: &str = "Usage: /approve <id|identifier> [voter]";
const REJECT_USAGE: &str = "Usage: /reject <id|identifier> [voter]";
const DELETE_USAGE: &str = "Usage: /delete <id|identifier> [voter]";
const LIST_USAGE: &str = "Usage: /list [archived] [approved] [rejected]";

/// Parse `text` as `/command[@bot] args...`.
///
/// `bot_username` is this bot's username; commands addressed to another bot
/// are ignored.
pub fn parse(text: &str, bot_username: Option<&str>) -> Parsed {
    let text = text.trim();
    let Some(rest) = text.strip_prefix('/') else {
        return Parsed::NotACommand;
    };
    let mut parts = rest.split_whitespace();
    let Some(head) = parts.next() else {
        return Parsed::NotACommand;
    };
    let args: Vec<&str> = parts.collect();

    let (name, addressee) = match head.split_once('@') {
        Some((name, bot)) => (name, Some(bot)),
        None => (head, None),
    };
    if let (Some(addressee), Some(me)) = (addressee, bot_username)
        && !addressee.eq_ignore_ascii_case(me)
    {
        return Parsed::NotACommand;
    }

    match name.to_ascii_lowercase().as_str() {
        "start" => Parsed::Command(Command::Start),
        "list" | "l" => parse_list(&args),
        "approve" | "a" => target_command(&args, APPROVE_USAGE, Command::Approve),
        "reject" | "r" => target_command(&args, REJECT_USAGE, Command::Reject),
        "delete" | "d" => target_command(&args, DELETE_USAGE, Command::Delete),
        "resources" | "res" => Parsed::Command(Command::Resources {
            filter: (!args.is_empty()).then(|| args.join(" ")),
        }),
        "tracked" => Parsed::Command(Command::Tracked),
        "stats" => Parsed::Command(Command::Stats),
        "chatid" => Parsed::Command(Command::ChatId),
        "help" | "h" => Parsed::Command(Command::Help),
        "version" | "v" => Parsed::Command(Command::Version),
        "config" | "c" => Parsed::Command(Command::Config),
        other => Parsed::Unknown(other.to_string()),
    }
}

fn parse_list(args: &[&str]) -> Parsed {
    let mut options = ListOptions::default();
    for arg in args {
        match arg.trim_start_matches('-').to_ascii_lowercase().as_str() {
            "archived" | "h" => options.archived = true,
            "approved" | "a" => options.approved = true,
            "rejected" | "r" => options.rejected = true,
            "all" => {
                options = ListOptions {
                    archived: true,
                    approved: true,
                    rejected: true,
                };
            }
            _ => return Parsed::BadArguments(LIST_USAGE),
        }
    }
    Parsed::Command(Command::List(options))
}

fn target_command(args: &[&str], usage: &'static str, make: fn(Target) -> Command) -> Parsed {
    match args.split_first() {
        Some((key, voter)) => Parsed::Command(make(Target {
            key: (*key).to_string(),
            voter: (!voter.is_empty()).then(|| voter.join(" ")),
        })),
        None => Parsed::BadArguments(usage),
    }
}
