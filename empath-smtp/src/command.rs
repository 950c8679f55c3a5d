use core::fmt::{self, Display, Formatter};

use empath_common::address::{Address, AddressList};
use mailparse::MailAddr;

#[derive(PartialEq, PartialOrd, Eq, Hash, Debug)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

impl Display for HeloVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ehlo(_) => "EHLO",
            Self::Helo(_) => "HELO",
        })
    }
}

/// SASL mechanism requested via the `AUTH` command, carrying an optional
/// initial response per [RFC 4954](https://www.ietf.org/rfc/rfc4954.txt).
///
/// The inner `Option<String>` is the base64 blob as the client sent it,
/// still encoded; decoding happens once the mechanism's continuation
/// state machine runs.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum AuthMechanism {
    Plain(Option<String>),
    Login(Option<String>),
}

impl Display for AuthMechanism {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plain(_) => "PLAIN",
            Self::Login(_) => "LOGIN",
        })
    }
}

#[derive(Eq, PartialEq, Debug)]
pub enum Command {
    Helo(HeloVariant),
    /// If this contains `None`, then it should be assumed this is the `null sender`, or `null reverse-path`,
    /// from [RFC-5321](https://www.ietf.org/rfc/rfc5321.txt).
    /// The second field contains the optional SIZE parameter value from the MAIL FROM command.
    Help,
    MailFrom(Option<Address>, Option<usize>),
    RcptTo(AddressList),
    Rset,
    Auth(AuthMechanism),
    Data,
    Quit,
    StartTLS,
    Invalid(String),
}

impl Command {
    #[must_use]
    pub fn inner(&self) -> String {
        match self {
            Self::MailFrom(from, _) => from.as_ref().map_or_else(String::new, |f| match &**f {
                MailAddr::Group(_) => String::new(),
                MailAddr::Single(s) => s.to_string(),
            }),
            Self::RcptTo(to) => to.to_string(),
            Self::Invalid(command) => command.clone(),
            Self::Helo(HeloVariant::Ehlo(id) | HeloVariant::Helo(id)) => id.clone(),
            _ => String::new(),
        }
    }

    /// Extract the SIZE parameter from a MAIL FROM command, if present.
    ///
    /// Per RFC 1870, the SIZE parameter indicates the size (in bytes) of the
    /// message the client intends to transmit. Returns `Some(size)` if the
    /// SIZE parameter was present in the MAIL FROM command, or `None` otherwise.
    ///
    /// # Example
    ///
    /// ```ignore
    /// // MAIL FROM:<user@example.com> SIZE=12345
    /// assert_eq!(command.size(), Some(12345));
    ///
    /// // MAIL FROM:<user@example.com>
    /// assert_eq!(command.size(), None);
    /// ```
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            Self::MailFrom(_, size) => *size,
            _ => None,
        }
    }
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(v) => fmt.write_fmt(format_args!("{} {}", v, self.inner())),
            Self::MailFrom(s, size) => {
                let addr = s.as_ref().map_or_else(String::new, |f| match &**f {
                    MailAddr::Group(_) => String::new(),
                    MailAddr::Single(s) => s.to_string(),
                });
                if let Some(size_val) = size {
                    fmt.write_fmt(format_args!("MAIL FROM:{addr} SIZE={size_val}"))
                } else {
                    fmt.write_fmt(format_args!("MAIL FROM:{addr}"))
                }
            }
            Self::RcptTo(rcpt) => fmt.write_fmt(format_args!("RCPT TO:{rcpt}")),
            Self::Data => fmt.write_str("DATA"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::StartTLS => fmt.write_str("STARTTLS"),
            Self::Invalid(s) => fmt.write_str(s),
            Self::Help => fmt.write_str("HELP"),
            Self::Rset => fmt.write_str("Rset"),
            Self::Auth(mechanism) => fmt.write_fmt(format_args!("AUTH {mechanism}")),
        }
    }
}

impl TryFrom<&str> for Command {
    type Error = Self;

    fn try_from(command: &str) -> Result<Self, Self::Error> {
        let comm = command.to_ascii_uppercase();
        let comm = comm.trim();

        if comm.starts_with("MAIL FROM:") {
            if comm.len() < 11 {
                return Err(Self::Invalid(command.to_owned()));
            }

            // Parse the address and optional SIZE parameter
            // Format: MAIL FROM:<addr> [SIZE=<size>]
            let rest = command[10..].trim();

            // Split on whitespace to separate address from parameters
            let parts: Vec<&str> = rest.splitn(2, char::is_whitespace).collect();
            let addr = parts[0];

            // Parse SIZE parameter if present (RFC 1870)
            // Format: MAIL FROM:<addr> [SIZE=<size>] [other ESMTP params...]
            let size = if parts.len() > 1 {
                let params: Vec<&str> = parts[1].split_whitespace().collect();

                // Check for duplicate SIZE parameters
                let size_params: Vec<&str> = params
                    .iter()
                    .filter(|p| p.len() >= 5 && p[..5].eq_ignore_ascii_case("SIZE="))
                    .copied()
                    .collect();

                if size_params.len() > 1 {
                    // Duplicate SIZE parameters - should reject per RFC
                    return Err(Self::Invalid(String::from(
                        "Duplicate SIZE parameter not allowed",
                    )));
                }

                size_params.first().and_then(|size_param| {
                    size_param.split('=').nth(1).and_then(|s| {
                        s.parse::<usize>().ok().and_then(|val| {
                            // Reject SIZE=0 as it's semantically unclear
                            // RFC 1870 Section 4: "value zero indicates no fixed maximum"
                            // but clients shouldn't declare 0-byte messages
                            if val == 0 { None } else { Some(val) }
                        })
                    })
                })
            } else {
                None
            };

            // Handle NULL sender explicitly, as mailparse doesn't tend to like this
            if addr == "<>" {
                return Ok(Self::MailFrom(None, size));
            }

            mailparse::addrparse(addr).map_or_else(
                |err| Err(Self::Invalid(err.to_string())),
                |from| {
                    Ok(Self::MailFrom(
                        if from.is_empty() {
                            None
                        } else {
                            Some(from[0].clone().into())
                        },
                        size,
                    ))
                },
            )
        } else if comm.starts_with("RCPT TO:") {
            if comm.len() < 9 {
                return Err(Self::Invalid(command.to_owned()));
            }

            mailparse::addrparse(command[8..].trim()).map_or_else(
                |e| Err(Self::Invalid(e.to_string())),
                |to| Ok(Self::RcptTo(to.into())),
            )
        } else if comm.starts_with("EHLO") || comm.starts_with("HELO") {
            match command.split_once(' ') {
                None => Err(Self::Invalid(format!("Expected hostname in {comm}"))),
                Some((_, host)) if comm.starts_with('H') => {
                    Ok(Self::Helo(HeloVariant::Helo(host.trim().to_string())))
                }
                Some((_, host)) => Ok(Self::Helo(HeloVariant::Ehlo(host.trim().to_string()))),
            }
        } else if comm.starts_with("AUTH") {
            // Keep the original casing for everything past "AUTH " -- the
            // initial response is base64 and base64 is case-sensitive.
            let rest = command.get(4..).unwrap_or("").trim();

            if rest.is_empty() {
                return Err(Self::Invalid(command.to_owned()));
            }

            let mut parts = rest.splitn(2, char::is_whitespace);
            let mechanism = parts.next().unwrap_or("");
            let initial_response = parts
                .next()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);

            match mechanism.to_ascii_uppercase().as_str() {
                "PLAIN" => Ok(Self::Auth(AuthMechanism::Plain(initial_response))),
                "LOGIN" => Ok(Self::Auth(AuthMechanism::Login(initial_response))),
                _ => Err(Self::Invalid(command.to_owned())),
            }
        } else {
            match comm {
                "DATA" => Ok(Self::Data),
                "QUIT" => Ok(Self::Quit),
                "STARTTLS" => Ok(Self::StartTLS),
                "HELP" => Ok(Self::Help),
                "RSET" => Ok(Self::Rset),
                _ => Err(Self::Invalid(command.to_owned())),
            }
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = Self;

    fn try_from(command: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(command).map_or_else(
            |_| Err(Self::Invalid("Unable to interpret command".to_string())),
            Self::try_from,
        )
    }
}

impl TryFrom<String> for Command {
    type Error = Self;

    fn try_from(command: String) -> Result<Self, Self::Error> {
        Self::try_from(command.as_str())
    }
}
