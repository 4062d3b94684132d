use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

// h1,h2,h3,h4,p1,p2 anywhere in the text, with or without parentheses
static PASV_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}),\s*(\d{1,3}),\s*(\d{1,3}),\s*(\d{1,3}),\s*(\d{1,3}),\s*(\d{1,3})")
        .expect("PASV address pattern")
});

/// One decoded reply block. For a multi-line block only the terminating
/// line is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
    pub multi_line: bool,
}

impl Reply {
    pub fn new(code: u16, text: &str) -> Self {
        Self {
            code,
            text: text.to_string(),
            multi_line: false,
        }
    }

    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Address from `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
    pub fn parse_pasv_227(&self) -> Option<SocketAddr> {
        let caps = PASV_ADDRESS.captures(&self.text)?;
        let mut fields = [0u8; 6];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = u8::from_str(caps.get(i + 1)?.as_str()).ok()?;
        }

        let ip = IpAddr::V4(Ipv4Addr::new(fields[0], fields[1], fields[2], fields[3]));
        let port = ((fields[4] as u16) << 8) + (fields[5] as u16);
        Some(SocketAddr::new(ip, port))
    }

    /// Port from `229 Entering Extended Passive Mode (|||port|)`. The
    /// delimiter is whatever character follows the opening parenthesis.
    pub fn parse_epsv_229(&self) -> Option<u16> {
        let start = self.text.find('(')?;
        let end = start + self.text[start..].find(')')?;
        let inner = &self.text[start + 1..end];

        let delim = inner.chars().next()?;
        let fields: Vec<&str> = inner.split(delim).collect();
        // "", net-prt, net-addr, port, ""
        if fields.len() != 5 || !fields[4].is_empty() {
            return None;
        }
        let port = u16::from_str(fields[3]).ok()?;
        (port != 0).then_some(port)
    }

    /// File size from `213 <size>`.
    pub fn parse_size_213(&self) -> Option<u64> {
        self.text.split_whitespace().next()?.parse().ok()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}
