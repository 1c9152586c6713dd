//! Tool schemas advertised to the model.

use super::types::{AgentToolParameters, ToolDefinition};
use crate::command::builders::{DNS_RECORD_TYPES, HTTP_METHODS, HYDRA_SERVICES, NMAP_SCAN_TYPES};
use crate::command::ToolKind;

/// The schema for one tool.
pub fn definition(kind: ToolKind) -> ToolDefinition {
    let (description, parameters) = match kind {
        ToolKind::NmapScan => (
            "Scan a host or network with nmap. scan_type picks the scan profile: quick (top 100 ports), \
             full (all ports), service (version detection), os, stealth (SYN), udp, vuln (NSE vuln scripts), \
             ping (host discovery only).",
            AgentToolParameters::object()
                .string("target", "Hostname, IP address, or CIDR range", true)
                .string_enum("scan_type", "Scan profile", NMAP_SCAN_TYPES, false)
                .string("ports", "Ports to scan, e.g. 22,80,443 or 1-1024", false)
                .build(),
        ),
        ToolKind::WhoisLookup => (
            "Look up domain registration details with whois.",
            AgentToolParameters::object()
                .string("domain", "Domain name or IP address", true)
                .build(),
        ),
        ToolKind::DnsLookup => (
            "Query DNS records with dig.",
            AgentToolParameters::object()
                .string("domain", "Name to resolve", true)
                .string_enum("record_type", "Record type (default A)", DNS_RECORD_TYPES, false)
                .string("server", "Resolver to query instead of the default", false)
                .boolean("short", "Print answers only", false)
                .build(),
        ),
        ToolKind::HttpRequest => (
            "Send an HTTP request with curl and show the response headers and body.",
            AgentToolParameters::object()
                .string("url", "http:// or https:// URL", true)
                .string_enum("method", "HTTP method (default GET)", HTTP_METHODS, false)
                .string_map("headers", "Request headers", false)
                .string("body", "Request body", false)
                .boolean("follow_redirects", "Follow 3xx redirects", false)
                .build(),
        ),
        ToolKind::PingHost => (
            "Check whether a host answers ICMP echo requests.",
            AgentToolParameters::object()
                .string("target", "Hostname or IP address", true)
                .integer("count", "Number of probes (default 4)", (1, 20), false)
                .build(),
        ),
        ToolKind::Traceroute => (
            "Trace the network path to a host.",
            AgentToolParameters::object()
                .string("target", "Hostname or IP address", true)
                .integer("max_hops", "Maximum TTL", (1, 64), false)
                .build(),
        ),
        ToolKind::NiktoScan => (
            "Scan a web server for known misconfigurations and vulnerable files with nikto.",
            AgentToolParameters::object()
                .string("target", "Hostname, IP, or URL", true)
                .integer("port", "Port to scan", (1, 65535), false)
                .boolean("ssl", "Force TLS", false)
                .build(),
        ),
        ToolKind::GobusterDir => (
            "Brute-force web directories and files with gobuster.",
            AgentToolParameters::object()
                .string("url", "Base URL", true)
                .string("wordlist", "Wordlist path inside the sandbox", false)
                .string("extensions", "File extensions to try, e.g. php,txt", false)
                .integer("threads", "Concurrent requests", (1, 50), false)
                .build(),
        ),
        ToolKind::SqlmapScan => (
            "Test a URL for SQL injection with sqlmap (non-interactive).",
            AgentToolParameters::object()
                .string("url", "Target URL including the parameter to test", true)
                .integer("level", "Test level", (1, 5), false)
                .integer("risk", "Risk level", (1, 3), false)
                .string("data", "POST body to test", false)
                .build(),
        ),
        ToolKind::HydraAttack => (
            "Recover credentials for a network service with hydra. Provide username or username_list.",
            AgentToolParameters::object()
                .string("target", "Hostname or IP address", true)
                .string_enum("service", "Service module", HYDRA_SERVICES, true)
                .string("username", "Single login name", false)
                .string("username_list", "Path to a login name list", false)
                .string("password_list", "Path to a password list", false)
                .integer("port", "Non-default service port", (1, 65535), false)
                .integer("tasks", "Parallel connections", (1, 16), false)
                .build(),
        ),
        ToolKind::Sslscan => (
            "Enumerate TLS protocol versions and cipher suites with sslscan.",
            AgentToolParameters::object()
                .string("target", "host or host:port", true)
                .build(),
        ),
        ToolKind::WhatwebScan => (
            "Fingerprint web technologies with whatweb.",
            AgentToolParameters::object()
                .string("target", "URL or hostname", true)
                .integer("aggression", "Aggression level", (1, 4), false)
                .build(),
        ),
        ToolKind::SubdomainEnum => (
            "Enumerate subdomains from passive sources with subfinder.",
            AgentToolParameters::object()
                .string("domain", "Apex domain", true)
                .build(),
        ),
        ToolKind::NetcatProbe => (
            "Check whether TCP ports are open with netcat.",
            AgentToolParameters::object()
                .string("host", "Hostname or IP address", true)
                .string("port", "Port or range, e.g. 22 or 20-25", true)
                .build(),
        ),
        ToolKind::ExecuteCommand => (
            "Run a single command line in the sandbox. Only allow-listed security tools may be invoked; \
             no shell is involved, so pipes and redirection are not available.",
            AgentToolParameters::object()
                .string("command", "Command line, e.g. 'dig example.com ANY'", true)
                .build(),
        ),
    };

    ToolDefinition {
        name: kind.name().to_string(),
        description: description.to_string(),
        parameters,
    }
}

/// Every tool, in declaration order.
pub fn catalog() -> Vec<ToolDefinition> {
    ToolKind::all().map(definition).collect()
}
