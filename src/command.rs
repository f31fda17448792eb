use std::str::FromStr;

/// One line of user input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserCommand {
    CreateProfile {
        username: String,
        external_id: Option<u64>,
    },
    Join,
    Spectate,
    Ban,
    AddBots(usize),
    ListPlayers,
    Quit,
    Say(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("unknown command /{0}")]
    Unknown(String),
    #[error("nothing to send")]
    Empty,
}

impl FromStr for UserCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(UserCommand::Say(line.to_string()));
        };
        let mut words = rest.split_whitespace();
        let command = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();
        match (command, args.as_slice()) {
            ("profile", [name]) => Ok(UserCommand::CreateProfile {
                username: (*name).to_string(),
                external_id: None,
            }),
            ("profile", [name, fid]) => {
                let fid = fid
                    .parse()
                    .map_err(|_| CommandError::Usage("/profile <name> [fid]"))?;
                Ok(UserCommand::CreateProfile {
                    username: (*name).to_string(),
                    external_id: Some(fid),
                })
            }
            ("profile", _) => Err(CommandError::Usage("/profile <name> [fid]")),
            ("join", []) => Ok(UserCommand::Join),
            ("spectate", []) => Ok(UserCommand::Spectate),
            ("ban", []) | ("ban", ["@bastral"]) => Ok(UserCommand::Ban),
            ("ban", _) => Err(CommandError::Usage("/ban @bastral")),
            ("bots", [n]) => n
                .parse()
                .map(UserCommand::AddBots)
                .map_err(|_| CommandError::Usage("/bots <1-10>")),
            ("bots", _) => Err(CommandError::Usage("/bots <1-10>")),
            ("players", []) => Ok(UserCommand::ListPlayers),
            ("quit", []) => Ok(UserCommand::Quit),
            (other, _) => Err(CommandError::Unknown(other.to_string())),
        }
    }
}
