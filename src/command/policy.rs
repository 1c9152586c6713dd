//! Allow-list of tool binaries and the deny table of dangerous patterns.

use std::sync::OnceLock;

use regex::Regex;

/// Binaries the sandbox may run. Anything else is rejected outright.
pub const ALLOWED_BINARIES: &[&str] = &[
    // port and host scanning
    "nmap", "masscan", "rustscan", "arp-scan", "netdiscover",
    // DNS and OSINT enumeration
    "whois", "dig", "nslookup", "host", "dnsrecon", "dnsenum", "fierce",
    "subfinder", "amass", "assetfinder", "theHarvester",
    // web enumeration
    "curl", "wget", "httpx", "whatweb", "wafw00f", "nikto", "gobuster", "dirb",
    "ffuf", "feroxbuster", "wfuzz", "wpscan", "nuclei",
    // exploitation and injection testing
    "sqlmap",
    // TLS
    "sslscan", "sslyze", "testssl", "openssl",
    // password recovery
    "hydra", "medusa", "john", "hashcat",
    // SMB, SNMP, LDAP
    "enum4linux", "smbclient", "smbmap", "snmpwalk", "onesixtyone", "ldapsearch",
    // network utilities
    "ping", "traceroute", "mtr", "nc", "ncat", "netcat", "ssh-keyscan",
    // text utilities for inspecting results
    "echo", "cat", "grep", "head", "tail", "wc", "ls", "jq",
];

/// Whether `binary` is a permitted tool. Paths are never permitted.
pub fn is_allowed(binary: &str) -> bool {
    !binary.contains('/') && ALLOWED_BINARIES.contains(&binary)
}

/// A dangerous command-line pattern and the reason it is refused.
#[derive(Debug)]
pub struct DenyRule {
    pub name: &'static str,
    pub rationale: &'static str,
    pub pattern: Regex,
}

impl DenyRule {
    pub fn matches(&self, command_line: &str) -> bool {
        self.pattern.is_match(command_line)
    }
}

// (name, pattern, rationale)
const DENY_TABLE: &[(&str, &str, &str)] = &[
    (
        "privilege-escalation",
        r"(?:^|[;&|`(])\s*(?:sudo|su|doas|pkexec)(?:\s|$)",
        "privilege escalation is not permitted",
    ),
    (
        "recursive-delete",
        r"\brm\s+(?:\S+\s+)*?(?:-[a-zA-Z]*[rR][a-zA-Z]*|--recursive)(?:\s|$)",
        "recursive deletion",
    ),
    (
        "mkfs",
        r"\bmkfs(?:\.[a-z0-9]+)?\b",
        "filesystem formatting",
    ),
    (
        "dd-device",
        r"\bdd\s+.*\bof=/dev/",
        "raw disk write",
    ),
    (
        "redirect-device",
        r">\s*/dev/(?:sd|hd|vd|xvd|nvme|mmcblk)",
        "raw disk write",
    ),
    (
        "disk-wipe",
        r"\b(?:wipefs|shred)\b",
        "disk wiping",
    ),
    (
        "fork-bomb",
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        "fork bomb",
    ),
    (
        "chmod-widen",
        r"\bchmod\s+(?:-\S+\s+)*(?:0?777|[ugoa]*\+[rwxX]*w)",
        "permission widening",
    ),
    (
        "chown-root",
        r"\bchown\s+(?:-\S+\s+)*root\b",
        "ownership change to root",
    ),
    (
        "system-credentials",
        r"/etc/(?:shadow|gshadow|sudoers)\b",
        "access to credential files",
    ),
    (
        "ssh-keys",
        r"\.ssh/(?:id_[a-z0-9_]+|authorized_keys)\b",
        "access to credential files",
    ),
    (
        "cloud-credentials",
        r"\.aws/credentials\b",
        "access to credential files",
    ),
    (
        "power-control",
        r"(?:^|[;&|`(])\s*(?:shutdown|reboot|halt|poweroff)(?:\s|$)",
        "host power control",
    ),
    (
        "pipe-to-shell",
        r"\|\s*(?:ba|da|z)?sh\b",
        "piping into a shell",
    ),
    (
        "dev-tcp",
        r"/dev/tcp/",
        "reverse shell",
    ),
    (
        "netcat-exec",
        r"\b(?:nc|ncat|netcat)\b.*\s-[a-zA-Z]*[ec]\s",
        "reverse shell",
    ),
];

static DENY_RULES: OnceLock<Vec<DenyRule>> = OnceLock::new();

/// The compiled deny table.
pub fn deny_rules() -> &'static [DenyRule] {
    DENY_RULES.get_or_init(|| {
        DENY_TABLE
            .iter()
            .filter_map(|&(name, pattern, rationale)| match Regex::new(pattern) {
                Ok(pattern) => Some(DenyRule { name, rationale, pattern }),
                Err(error) => {
                    tracing::error!(rule = name, %error, "deny rule failed to compile");
                    None
                }
            })
            .collect()
    })
}

/// Every deny rule matching `command_line`, in table order.
pub fn denied_by(command_line: &str) -> Vec<&'static DenyRule> {
    deny_rules().iter().filter(|rule| rule.matches(command_line)).collect()
}

/// First deny rule matching `command_line`, if any.
pub fn first_denied(command_line: &str) -> Option<&'static DenyRule> {
    deny_rules().iter().find(|rule| rule.matches(command_line))
}
