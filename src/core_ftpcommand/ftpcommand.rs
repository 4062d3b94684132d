use std::fmt;

/// Commands the client issues on the control channel.
#[derive(Eq, Hash, PartialEq, Debug, Clone, Copy)]
pub enum FtpCommand {
    USER,
    PASS,
    AUTH,
    PBSZ,
    PROT,
    TYPE,
    PASV,
    EPSV,
    RETR,
    STOR,
    APPE,
    REST,
    DELE,
    SIZE,
    QUIT,
}

impl FtpCommand {
    pub fn from_str(cmd: &str) -> Option<FtpCommand> {
        match cmd.to_ascii_uppercase().as_str() {
            "USER" => Some(FtpCommand::USER),
            "PASS" => Some(FtpCommand::PASS),
            "AUTH" => Some(FtpCommand::AUTH),
            "PBSZ" => Some(FtpCommand::PBSZ),
            "PROT" => Some(FtpCommand::PROT),
            "TYPE" => Some(FtpCommand::TYPE),
            "PASV" => Some(FtpCommand::PASV),
            "EPSV" => Some(FtpCommand::EPSV),
            "RETR" => Some(FtpCommand::RETR),
            "STOR" => Some(FtpCommand::STOR),
            "APPE" => Some(FtpCommand::APPE),
            "REST" => Some(FtpCommand::REST),
            "DELE" => Some(FtpCommand::DELE),
            "SIZE" => Some(FtpCommand::SIZE),
            "QUIT" => Some(FtpCommand::QUIT),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FtpCommand::USER => "USER",
            FtpCommand::PASS => "PASS",
            FtpCommand::AUTH => "AUTH",
            FtpCommand::PBSZ => "PBSZ",
            FtpCommand::PROT => "PROT",
            FtpCommand::TYPE => "TYPE",
            FtpCommand::PASV => "PASV",
            FtpCommand::EPSV => "EPSV",
            FtpCommand::RETR => "RETR",
            FtpCommand::STOR => "STOR",
            FtpCommand::APPE => "APPE",
            FtpCommand::REST => "REST",
            FtpCommand::DELE => "DELE",
            FtpCommand::SIZE => "SIZE",
            FtpCommand::QUIT => "QUIT",
        }
    }
}

impl fmt::Display for FtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
