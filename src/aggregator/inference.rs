use crate::models::UNKNOWN_DEVICE;

/// Service-name patterns in precedence order; the first rule with any match wins.
const RULES: &[(&[&str], &str)] = &[
    (&["ssh", "telnet"], "Linux Server"),
    (&["rdp", "ms-wbt-server", "smb", "microsoft-ds", "netbios-ssn"], "Windows Server"),
    (&["http", "https", "apache", "nginx"], "Web Server"),
    (&["ftp", "tftp"], "File Server"),
    (&["snmp", "dhcp"], "Network Device"),
    (&["mysql", "postgresql", "mongodb"], "Database Server"),
    (&["dns", "domain"], "DNS Server"),
];

fn normalize(service: &str) -> &str {
    let s = service.trim();
    // nmap prefixes TLS-wrapped services, e.g. "ssl/http".
    s.strip_prefix("ssl/").unwrap_or(s)
}

pub fn infer_device_type<S: AsRef<str>>(services: &[S]) -> &'static str {
    let names: Vec<String> = services
        .iter()
        .map(|s| normalize(s.as_ref()).to_ascii_lowercase())
        .collect();
    RULES
        .iter()
        .find(|(patterns, _)| names.iter().any(|n| patterns.contains(&n.as_str())))
        .map(|(_, label)| *label)
        .unwrap_or(UNKNOWN_DEVICE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_first_match_wins() {
        assert_eq!(infer_device_type(&["http", "ssh"]), "Linux Server");
        assert_eq!(infer_device_type(&["mysql", "http"]), "Web Server");
        assert_eq!(infer_device_type(&["netbios-ssn"]), "Windows Server");
        assert_eq!(infer_device_type(&["domain"]), "DNS Server");
    }

    #[test]
    fn test_normalization() {
        assert_eq!(infer_device_type(&["SSL/HTTP"]), "Web Server");
        assert_eq!(infer_device_type(&[" PostgreSQL "]), "Database Server");
    }

    #[test]
    fn test_unknown_default() {
        assert_eq!(infer_device_type::<&str>(&[]), UNKNOWN_DEVICE);
        assert_eq!(infer_device_type(&["x11"]), UNKNOWN_DEVICE);
    }
}
