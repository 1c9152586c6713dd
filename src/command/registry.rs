//! Tool name to argv builder registry.

use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use super::builders;
use crate::error::ValidationError;
use crate::tools::ToolArguments;

/// Translates structured arguments into an argv, binary first.
pub type BuilderFn = fn(&ToolArguments) -> Result<Vec<String>, ValidationError>;

/// Every tool the model may call. The wire name is the snake_case variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ToolKind {
    NmapScan,
    WhoisLookup,
    DnsLookup,
    HttpRequest,
    PingHost,
    Traceroute,
    NiktoScan,
    GobusterDir,
    SqlmapScan,
    HydraAttack,
    Sslscan,
    WhatwebScan,
    SubdomainEnum,
    NetcatProbe,
    /// Raw passthrough: a single whitespace-tokenized command string.
    ExecuteCommand,
}

impl ToolKind {
    /// Resolve a tool name sent by the model.
    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    /// The binary a structured tool always runs; `None` for raw passthrough.
    pub fn binary(self) -> Option<&'static str> {
        match self {
            Self::NmapScan => Some("nmap"),
            Self::WhoisLookup => Some("whois"),
            Self::DnsLookup => Some("dig"),
            Self::HttpRequest => Some("curl"),
            Self::PingHost => Some("ping"),
            Self::Traceroute => Some("traceroute"),
            Self::NiktoScan => Some("nikto"),
            Self::GobusterDir => Some("gobuster"),
            Self::SqlmapScan => Some("sqlmap"),
            Self::HydraAttack => Some("hydra"),
            Self::Sslscan => Some("sslscan"),
            Self::WhatwebScan => Some("whatweb"),
            Self::SubdomainEnum => Some("subfinder"),
            Self::NetcatProbe => Some("nc"),
            Self::ExecuteCommand => None,
        }
    }

    pub fn is_raw(self) -> bool {
        matches!(self, Self::ExecuteCommand)
    }

    pub fn builder(self) -> BuilderFn {
        match self {
            Self::NmapScan => builders::nmap_scan,
            Self::WhoisLookup => builders::whois_lookup,
            Self::DnsLookup => builders::dns_lookup,
            Self::HttpRequest => builders::http_request,
            Self::PingHost => builders::ping_host,
            Self::Traceroute => builders::traceroute,
            Self::NiktoScan => builders::nikto_scan,
            Self::GobusterDir => builders::gobuster_dir,
            Self::SqlmapScan => builders::sqlmap_scan,
            Self::HydraAttack => builders::hydra_attack,
            Self::Sslscan => builders::sslscan,
            Self::WhatwebScan => builders::whatweb_scan,
            Self::SubdomainEnum => builders::subdomain_enum,
            Self::NetcatProbe => builders::netcat_probe,
            Self::ExecuteCommand => builders::execute_command,
        }
    }

    pub fn all() -> impl Iterator<Item = ToolKind> {
        Self::iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::policy;

    #[test]
    fn names_round_trip_through_strum() {
        for kind in ToolKind::all() {
            assert_eq!(kind.to_string(), kind.name());
            assert_eq!(kind.as_ref(), kind.name());
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn unknown_names_do_not_resolve() {
        assert_eq!(ToolKind::from_name("rm_everything"), None);
        assert_eq!(ToolKind::from_name("NmapScan"), None);
    }

    #[test]
    fn structured_binaries_are_all_allowed() {
        for kind in ToolKind::all().filter(|k| !k.is_raw()) {
            let binary = kind.binary().expect("structured tools name a binary");
            assert!(policy::is_allowed(binary), "{binary} missing from allow-list");
        }
    }
}
