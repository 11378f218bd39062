use url::Host;

const MAX_HOST_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Normalizes a raw request target into the host form used for registry lookups.
///
/// Accepts a `Host` header value (`Acme.Example:8443`) or an absolute URI
/// (`https://acme.example/path`). The result is lowercase ASCII with IDNA
/// labels in punycode, without port or trailing dot. Returns `None` for empty,
/// malformed or IP-literal input.
pub fn normalize_host(raw: &str) -> Option<String> {
    let authority = authority_of(raw.trim())?;
    let host = strip_port(authority)?;
    let host = host.strip_suffix('.').unwrap_or(host);
    if host.is_empty() {
        return None;
    }

    let domain = match Host::parse(host).ok()? {
        Host::Domain(domain) => domain,
        Host::Ipv4(_) | Host::Ipv6(_) => return None,
    };

    if domain.len() > MAX_HOST_LEN || !domain.split('.').all(valid_label) {
        return None;
    }
    Some(domain)
}

/// Returns the single label in front of `base_domain`, if `host` is a direct
/// subdomain of it. Both arguments must already be normalized.
pub fn subdomain_label<'a>(host: &'a str, base_domain: &str) -> Option<&'a str> {
    let label = host.strip_suffix(base_domain)?.strip_suffix('.')?;
    if label.is_empty() || label.contains('.') {
        return None;
    }
    Some(label)
}

fn authority_of(target: &str) -> Option<&str> {
    let rest = match target.split_once("://") {
        Some((_, rest)) => rest,
        None => target,
    };
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    // Userinfo never takes part in tenant resolution.
    let authority = match authority.rsplit_once('@') {
        Some((_, host)) => host,
        None => authority,
    };
    if authority.is_empty() {
        return None;
    }
    Some(authority)
}

fn strip_port(authority: &str) -> Option<&str> {
    if authority.starts_with('[') {
        return None;
    }
    match authority.split_once(':') {
        None => Some(authority),
        Some((host, port)) => {
            if port.contains(':') {
                return None;
            }
            if !port.is_empty() && port.parse::<u16>().is_err() {
                return None;
            }
            Some(host)
        }
    }
}

fn valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}
