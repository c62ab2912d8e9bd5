//! Email address syntax and domain validation.
//!
//! Intentionally stricter than the full RFC 5322 grammar: quoted local
//! parts, comments, and IP-literal domains are rejected because the sales
//! transport cannot deliver to them anyway.

use serde::{Deserialize, Serialize};

const MAX_LOCAL_LEN: usize = 64;
const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Local parts that identify shared mailboxes rather than people.
const ROLE_ACCOUNTS: &[&str] = &[
    "abuse",
    "admin",
    "billing",
    "contact",
    "help",
    "hostmaster",
    "hr",
    "info",
    "marketing",
    "no-reply",
    "noreply",
    "office",
    "postmaster",
    "sales",
    "security",
    "support",
    "team",
    "webmaster",
];

/// Throwaway email providers.
const DISPOSABLE_DOMAINS: &[&str] = &[
    "10minutemail.com",
    "dispostable.com",
    "getnada.com",
    "guerrillamail.com",
    "maildrop.cc",
    "mailinator.com",
    "sharklasers.com",
    "tempmail.com",
    "trashmail.com",
    "yopmail.com",
];

/// Everything the validator found out about one address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub address: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub role_account: bool,
    pub disposable: bool,
}

/// Syntax errors for the address, empty when well-formed.
pub fn validate_syntax(address: &str) -> Vec<String> {
    let mut errors = Vec::new();

    let Some((local, domain)) = address.rsplit_once('@') else {
        return vec!["missing @ separator".to_string()];
    };
    if local.contains('@') {
        errors.push("more than one @ separator".to_string());
        return errors;
    }

    if local.is_empty() {
        errors.push("empty local part".to_string());
    } else if local.len() > MAX_LOCAL_LEN {
        errors.push(format!("local part exceeds {MAX_LOCAL_LEN} characters"));
    }
    if local.starts_with('.') || local.ends_with('.') {
        errors.push("local part starts or ends with a dot".to_string());
    }
    if local.contains("..") {
        errors.push("local part contains consecutive dots".to_string());
    }
    if let Some(bad) = local.chars().find(|c| !is_atom_char(*c) && *c != '.') {
        errors.push(format!("invalid character '{bad}' in local part"));
    }

    errors.extend(validate_domain(domain));
    errors
}

/// Domain-format errors, empty when well-formed.
pub fn validate_domain(domain: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if domain.is_empty() {
        return vec!["empty domain".to_string()];
    }
    if domain.len() > MAX_DOMAIN_LEN {
        errors.push(format!("domain exceeds {MAX_DOMAIN_LEN} characters"));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        errors.push("domain needs at least two labels".to_string());
    }
    for label in &labels {
        if label.is_empty() {
            errors.push("domain contains an empty label".to_string());
            continue;
        }
        if label.len() > MAX_LABEL_LEN {
            errors.push(format!("domain label exceeds {MAX_LABEL_LEN} characters"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            errors.push(format!("domain label '{label}' starts or ends with a hyphen"));
        }
        if let Some(bad) = label
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && *c != '-')
        {
            errors.push(format!("invalid character '{bad}' in domain"));
        }
    }

    if let Some(tld) = labels.last() {
        if !tld.is_empty() && !tld.chars().all(|c| c.is_ascii_alphabetic()) {
            errors.push("top-level domain must be alphabetic".to_string());
        }
    }

    errors
}

/// Whether the local part names a shared mailbox (info@, sales@, ...).
pub fn is_role_account(address: &str) -> bool {
    address
        .rsplit_once('@')
        .map(|(local, _)| ROLE_ACCOUNTS.contains(&local.to_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn is_disposable_domain(domain: &str) -> bool {
    DISPOSABLE_DOMAINS.contains(&domain.to_lowercase().as_str())
}

/// Full static validation: syntax, domain, role-account, and disposable
/// membership. Suppression and MX are layered on by the gate.
pub fn validate_address(address: &str) -> ValidationReport {
    let address = address.trim();
    let errors = validate_syntax(address);
    let domain = address.rsplit_once('@').map(|(_, d)| d.to_lowercase());
    let disposable = domain.as_deref().map(is_disposable_domain).unwrap_or(false);

    ValidationReport {
        address: address.to_string(),
        valid: errors.is_empty(),
        errors,
        role_account: is_role_account(address),
        disposable,
    }
}

fn is_atom_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~".contains(c)
}
