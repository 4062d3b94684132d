// Bounds-checked command line formatters
use std::borrow::Cow;

use crate::constants::{PASSWORD_MAX, PATH_MAX, USER_NAME_MAX};
use crate::core_ftpcommand::FtpCommand;
use crate::error::{FtpError, Result};

fn checked(value: &str, max: usize) -> Result<&str> {
    if value.len() > max || value.contains(['\r', '\n']) {
        return Err(FtpError::BadParameter);
    }
    Ok(value)
}

fn argument(value: &str, max: usize) -> Result<&str> {
    if value.is_empty() {
        return Err(FtpError::BadParameter);
    }
    checked(value, max)
}

fn line(cmd: FtpCommand, arg: &str) -> String {
    format!("{} {}\r\n", cmd, arg)
}

fn bare(cmd: FtpCommand) -> String {
    format!("{}\r\n", cmd)
}

pub fn user(name: &str) -> Result<String> {
    Ok(line(FtpCommand::USER, argument(name, USER_NAME_MAX)?))
}

/// An empty password is sent as is, some servers expect it.
pub fn pass(password: &str) -> Result<String> {
    Ok(line(FtpCommand::PASS, checked(password, PASSWORD_MAX)?))
}

pub fn auth_tls() -> String {
    line(FtpCommand::AUTH, "TLS")
}

pub fn pbsz() -> String {
    line(FtpCommand::PBSZ, "0")
}

pub fn prot_private() -> String {
    line(FtpCommand::PROT, "P")
}

pub fn type_binary() -> String {
    line(FtpCommand::TYPE, "I")
}

pub fn pasv() -> String {
    bare(FtpCommand::PASV)
}

pub fn epsv() -> String {
    bare(FtpCommand::EPSV)
}

pub fn retr(path: &str) -> Result<String> {
    Ok(line(FtpCommand::RETR, argument(path, PATH_MAX)?))
}

pub fn stor(path: &str) -> Result<String> {
    Ok(line(FtpCommand::STOR, argument(path, PATH_MAX)?))
}

pub fn appe(path: &str) -> Result<String> {
    Ok(line(FtpCommand::APPE, argument(path, PATH_MAX)?))
}

pub fn rest(offset: u64) -> String {
    line(FtpCommand::REST, &offset.to_string())
}

pub fn dele(path: &str) -> Result<String> {
    Ok(line(FtpCommand::DELE, argument(path, PATH_MAX)?))
}

pub fn size(path: &str) -> Result<String> {
    Ok(line(FtpCommand::SIZE, argument(path, PATH_MAX)?))
}

pub fn quit() -> String {
    bare(FtpCommand::QUIT)
}

/// Command line as it may appear in logs, without the line ending and with
/// the PASS argument masked.
pub fn redacted(cmd: &str) -> Cow<'_, str> {
    let cmd = cmd.trim_end_matches(['\r', '\n']);
    match cmd.split_once(' ') {
        Some((verb, _)) if FtpCommand::from_str(verb) == Some(FtpCommand::PASS) => {
            Cow::Borrowed("PASS ****")
        }
        _ => Cow::Borrowed(cmd),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_lines() {
        assert_eq!(user("anonymous").unwrap(), "USER anonymous\r\n");
        assert_eq!(pass("secret").unwrap(), "PASS secret\r\n");
        assert_eq!(pass("").unwrap(), "PASS \r\n");
        assert_eq!(auth_tls(), "AUTH TLS\r\n");
        assert_eq!(pbsz(), "PBSZ 0\r\n");
        assert_eq!(prot_private(), "PROT P\r\n");
        assert_eq!(type_binary(), "TYPE I\r\n");
        assert_eq!(pasv(), "PASV\r\n");
        assert_eq!(epsv(), "EPSV\r\n");
        assert_eq!(retr("/fw/image.bin").unwrap(), "RETR /fw/image.bin\r\n");
        assert_eq!(stor("log.txt").unwrap(), "STOR log.txt\r\n");
        assert_eq!(appe("log.txt").unwrap(), "APPE log.txt\r\n");
        assert_eq!(rest(4096), "REST 4096\r\n");
        assert_eq!(dele("old.txt").unwrap(), "DELE old.txt\r\n");
        assert_eq!(size("image.bin").unwrap(), "SIZE image.bin\r\n");
        assert_eq!(quit(), "QUIT\r\n");
    }

    #[test]
    fn test_oversized_arguments_are_rejected() {
        let long_path = "a".repeat(PATH_MAX + 1);
        assert_eq!(retr(&long_path), Err(FtpError::BadParameter));
        assert!(retr(&"a".repeat(PATH_MAX)).is_ok());
        assert_eq!(user(&"u".repeat(USER_NAME_MAX + 1)), Err(FtpError::BadParameter));
        assert_eq!(pass(&"p".repeat(PASSWORD_MAX + 1)), Err(FtpError::BadParameter));
    }

    #[test]
    fn test_line_breaks_and_empty_arguments_are_rejected() {
        assert_eq!(dele("a\r\nDELE b"), Err(FtpError::BadParameter));
        assert_eq!(stor("x\n"), Err(FtpError::BadParameter));
        assert_eq!(size(""), Err(FtpError::BadParameter));
    }

    #[test]
    fn test_redacted() {
        assert_eq!(redacted("PASS hunter2\r\n"), "PASS ****");
        assert_eq!(redacted("USER bob\r\n"), "USER bob");
        assert_eq!(redacted("QUIT\r\n"), "QUIT");
    }
}
