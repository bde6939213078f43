/// A control-topic payload. Matching is literal and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Reset,
    Config,
    Debug,
    Offset(i64),
    GetLive,
    GetPeriodic,
    Unrecognized(String),
}

impl Command {
    pub fn parse(payload: &str) -> Self {
        match payload {
            "" | "status" => Self::Status,
            "reset" => Self::Reset,
            "config" => Self::Config,
            "debug" => Self::Debug,
            "getlive" => Self::GetLive,
            "getperiodic" => Self::GetPeriodic,
            _ => match payload.split_once(' ') {
                Some(("offset", value)) => value
                    .trim()
                    .parse()
                    .map(Self::Offset)
                    .unwrap_or_else(|_| Self::Unrecognized(payload.to_string())),
                _ => Self::Unrecognized(payload.to_string()),
            },
        }
    }
}
