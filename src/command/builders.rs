//! Per-tool argv builders.
//!
//! Each builder takes already shape-checked arguments and returns the argv
//! to run, binary first. Operands that reach the command line are checked
//! so a value can never be read as a flag by the underlying tool.

use std::borrow::Cow;

use crate::error::ValidationError;
use crate::tools::ToolArguments;

pub const NMAP_SCAN_TYPES: &[&str] = &["quick", "full", "service", "os", "stealth", "udp", "vuln", "ping"];
pub const DNS_RECORD_TYPES: &[&str] = &["A", "AAAA", "MX", "NS", "TXT", "CNAME", "SOA", "PTR", "ANY"];
pub const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];
pub const HYDRA_SERVICES: &[&str] = &[
    "ssh", "ftp", "telnet", "http-get", "http-post-form", "https-get", "mysql", "postgres", "rdp", "smb", "vnc",
];

pub const DEFAULT_DIR_WORDLIST: &str = "/usr/share/wordlists/dirb/common.txt";
pub const DEFAULT_PASSWORD_LIST: &str = "/usr/share/wordlists/rockyou.txt";

fn nmap_flags(scan_type: &str) -> Option<&'static [&'static str]> {
    let flags: &'static [&'static str] = match scan_type {
        "quick" => &["-F"],
        "full" => &["-p-"],
        "service" => &["-sV"],
        "os" => &["-O"],
        "stealth" => &["-sS"],
        "udp" => &["-sU"],
        "vuln" => &["-sV", "--script", "vuln"],
        "ping" => &["-sn"],
        _ => return None,
    };
    Some(flags)
}

/// `nmap [scan flags] [-p ports] <target>`
pub fn nmap_scan(args: &ToolArguments) -> Result<Vec<String>, ValidationError> {
    let target = operand(args, "target")?;
    let mut argv = vec!["nmap".to_string()];

    let scan_type = args.get_str_opt("scan_type").map(|s| s.to_ascii_lowercase());
    if let Some(scan_type) = &scan_type {
        let flags = nmap_flags(scan_type)
            .ok_or_else(|| ValidationError::new(format!("unknown scan_type: {scan_type}")))?;
        argv.extend(flags.iter().map(|f| f.to_string()));
    }

    if let Some(ports) = args.get_str_opt("ports") {
        // full and ping scans fix their own port selection
        if !matches!(scan_type.as_deref(), Some("full") | Some("ping")) {
            argv.push("-p".into());
            argv.push(port_spec("ports", &ports)?);
        }
    }

    argv.push(target);
    Ok(argv)
}

/// `whois <domain>`
pub fn whois_lookup(args: &ToolArguments) -> Result<Vec<String>, ValidationError> {
    Ok(vec!["whois".into(), operand(args, "domain")?])
}

/// `dig [@server] <domain> <type> [+short]`
pub fn dns_lookup(args: &ToolArguments) -> Result<Vec<String>, ValidationError> {
    let domain = operand(args, "domain")?;
    let record_type = match args.get_str_opt("record_type") {
        Some(rt) => {
            let upper = rt.to_ascii_uppercase();
            if !DNS_RECORD_TYPES.contains(&upper.as_str()) {
                return Err(ValidationError::new(format!("unknown record_type: {rt}")));
            }
            upper
        }
        None => "A".into(),
    };

    let mut argv = vec!["dig".to_string()];
    if args.get_str_opt("server").is_some() {
        argv.push(format!("@{}", operand(args, "server")?));
    }
    argv.push(domain);
    argv.push(record_type);
    if args.get_flag("short") {
        argv.push("+short".into());
    }
    Ok(argv)
}

/// `curl -sS -i --max-time 60 -X <method> [-L] [-H ..]* [--data-raw body] <url>`
pub fn http_request(args: &ToolArguments) -> Result<Vec<String>, ValidationError> {
    let url = url_operand(args, "url")?;
    let method = args.get_str_opt("method").unwrap_or(Cow::Borrowed("GET")).to_ascii_uppercase();
    if !HTTP_METHODS.contains(&method.as_str()) {
        return Err(ValidationError::new(format!("unsupported HTTP method: {method}")));
    }

    let mut argv: Vec<String> = ["curl", "-sS", "-i", "--max-time", "60", "-X"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    argv.push(method);
    if args.get_flag("follow_redirects") {
        argv.push("-L".into());
    }

    for (name, value) in args.get_string_map("headers")? {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ValidationError::new(format!("invalid header name: {name}")));
        }
        if value.chars().any(|c| c == '\r' || c == '\n') {
            return Err(ValidationError::new(format!("header {name} contains a line break")));
        }
        argv.push("-H".into());
        argv.push(format!("{name}: {value}"));
    }

    if let Some(body) = args.raw().get("body").and_then(|b| b.as_str()) {
        if !body.is_empty() {
            argv.push("--data-raw".into());
            argv.push(body.to_string());
        }
    }

    argv.push(url);
    Ok(argv)
}

/// `ping -c <count> <target>`
pub fn ping_host(args: &ToolArguments) -> Result<Vec<String>, ValidationError> {
    let target = operand(args, "target")?;
    let count = bounded(args, "count", 1, 20)?.unwrap_or(4);
    Ok(vec!["ping".into(), "-c".into(), count.to_string(), target])
}

/// `traceroute [-m hops] <target>`
pub fn traceroute(args: &ToolArguments) -> Result<Vec<String>, ValidationError> {
    let target = operand(args, "target")?;
    let mut argv = vec!["traceroute".to_string()];
    if let Some(hops) = bounded(args, "max_hops", 1, 64)? {
        argv.push("-m".into());
        argv.push(hops.to_string());
    }
    argv.push(target);
    Ok(argv)
}

/// `nikto -h <target> [-p port] [-ssl]`
pub fn nikto_scan(args: &ToolArguments) -> Result<Vec<String>, ValidationError> {
    let target = operand(args, "target")?;
    let mut argv = vec!["nikto".to_string(), "-h".into(), target];
    if let Some(port) = bounded(args, "port", 1, 65535)? {
        argv.push("-p".into());
        argv.push(port.to_string());
    }
    if args.get_flag("ssl") {
        argv.push("-ssl".into());
    }
    Ok(argv)
}

/// `gobuster dir -q -u <url> -w <wordlist> [-x exts] [-t threads]`
pub fn gobuster_dir(args: &ToolArguments) -> Result<Vec<String>, ValidationError> {
    let url = url_operand(args, "url")?;
    let wordlist = optional_operand(args, "wordlist")?.unwrap_or_else(|| DEFAULT_DIR_WORDLIST.into());

    let mut argv: Vec<String> = vec!["gobuster".into(), "dir".into(), "-q".into(), "-u".into(), url, "-w".into(), wordlist];
    if let Some(exts) = args.get_str_opt("extensions") {
        if !exts.chars().all(|c| c.is_ascii_alphanumeric() || c == ',') {
            return Err(ValidationError::new("extensions must be a comma-separated list like php,txt"));
        }
        argv.push("-x".into());
        argv.push(exts.to_string());
    }
    if let Some(threads) = bounded(args, "threads", 1, 50)? {
        argv.push("-t".into());
        argv.push(threads.to_string());
    }
    Ok(argv)
}

/// `sqlmap -u <url> --batch [--level n] [--risk n] [--data body]`
pub fn sqlmap_scan(args: &ToolArguments) -> Result<Vec<String>, ValidationError> {
    let url = url_operand(args, "url")?;
    let mut argv = vec!["sqlmap".to_string(), "-u".into(), url, "--batch".into()];
    if let Some(level) = bounded(args, "level", 1, 5)? {
        argv.push("--level".into());
        argv.push(level.to_string());
    }
    if let Some(risk) = bounded(args, "risk", 1, 3)? {
        argv.push("--risk".into());
        argv.push(risk.to_string());
    }
    if let Some(data) = optional_operand(args, "data")? {
        argv.push("--data".into());
        argv.push(data);
    }
    Ok(argv)
}

/// `hydra (-l user | -L list) -P <passwords> [-s port] [-t tasks] <target> <service>`
pub fn hydra_attack(args: &ToolArguments) -> Result<Vec<String>, ValidationError> {
    let target = operand(args, "target")?;
    let service = args.require_str("service")?.to_ascii_lowercase();
    if !HYDRA_SERVICES.contains(&service.as_str()) {
        return Err(ValidationError::new(format!("unsupported service: {service}")));
    }

    let mut argv = vec!["hydra".to_string()];
    match (optional_operand(args, "username")?, optional_operand(args, "username_list")?) {
        (Some(user), _) => {
            argv.push("-l".into());
            argv.push(user);
        }
        (None, Some(list)) => {
            argv.push("-L".into());
            argv.push(list);
        }
        (None, None) => {
            return Err(ValidationError::new("missing required argument: username or username_list"))
        }
    }

    argv.push("-P".into());
    argv.push(optional_operand(args, "password_list")?.unwrap_or_else(|| DEFAULT_PASSWORD_LIST.into()));
    if let Some(port) = bounded(args, "port", 1, 65535)? {
        argv.push("-s".into());
        argv.push(port.to_string());
    }
    if let Some(tasks) = bounded(args, "tasks", 1, 16)? {
        argv.push("-t".into());
        argv.push(tasks.to_string());
    }
    argv.push(target);
    argv.push(service.to_string());
    Ok(argv)
}

/// `sslscan <host[:port]>`
pub fn sslscan(args: &ToolArguments) -> Result<Vec<String>, ValidationError> {
    Ok(vec!["sslscan".into(), "--no-colour".into(), operand(args, "target")?])
}

/// `whatweb --color=never [-a level] <target>`
pub fn whatweb_scan(args: &ToolArguments) -> Result<Vec<String>, ValidationError> {
    let target = operand(args, "target")?;
    let mut argv = vec!["whatweb".to_string(), "--color=never".into()];
    if let Some(level) = bounded(args, "aggression", 1, 4)? {
        argv.push("-a".into());
        argv.push(level.to_string());
    }
    argv.push(target);
    Ok(argv)
}

/// `subfinder -silent -d <domain>`
pub fn subdomain_enum(args: &ToolArguments) -> Result<Vec<String>, ValidationError> {
    Ok(vec!["subfinder".into(), "-silent".into(), "-d".into(), operand(args, "domain")?])
}

/// `nc -zv -w 5 <host> <port|range>`
pub fn netcat_probe(args: &ToolArguments) -> Result<Vec<String>, ValidationError> {
    let host = operand(args, "host")?;
    let port = port_spec("port", &args.require_str("port")?)?;
    Ok(vec!["nc".into(), "-zv".into(), "-w".into(), "5".into(), host, port])
}

/// Raw passthrough: the command string split on whitespace.
pub fn execute_command(args: &ToolArguments) -> Result<Vec<String>, ValidationError> {
    let command = args.require_str("command")?;
    Ok(command.split_whitespace().map(str::to_string).collect())
}

fn operand(args: &ToolArguments, key: &str) -> Result<String, ValidationError> {
    let value = args.require_str(key)?;
    check_operand(key, &value)?;
    Ok(value.into_owned())
}

fn optional_operand(args: &ToolArguments, key: &str) -> Result<Option<String>, ValidationError> {
    match args.get_str_opt(key) {
        Some(value) => {
            check_operand(key, &value)?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

fn check_operand(key: &str, value: &str) -> Result<(), ValidationError> {
    if value.starts_with('-') {
        return Err(ValidationError::new(format!("argument {key} must not start with '-'")));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::new(format!(
            "argument {key} must not contain whitespace or control characters"
        )));
    }
    Ok(())
}

fn url_operand(args: &ToolArguments, key: &str) -> Result<String, ValidationError> {
    let url = operand(args, key)?;
    let lower = url.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(ValidationError::new(format!("argument {key} must be an http(s) URL")));
    }
    Ok(url)
}

fn port_spec(key: &str, value: &str) -> Result<String, ValidationError> {
    let valid = !value.is_empty()
        && value
            .split(',')
            .all(|part| {
                let mut bounds = part.splitn(2, '-');
                bounds.all(|b| b.parse::<u16>().is_ok_and(|p| p > 0))
            });
    if valid {
        Ok(value.to_string())
    } else {
        Err(ValidationError::new(format!(
            "argument {key} must be a port, range, or comma-separated list (e.g. 22,80,8000-8100)"
        )))
    }
}

fn bounded(args: &ToolArguments, key: &str, min: u64, max: u64) -> Result<Option<u64>, ValidationError> {
    match args.get_u64_opt(key)? {
        Some(n) if !(min..=max).contains(&n) => Err(ValidationError::new(format!(
            "argument {key} must be between {min} and {max}"
        ))),
        other => Ok(other),
    }
}
