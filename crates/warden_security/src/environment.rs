//! Child environment construction.

use crate::ValidationError;
use std::collections::HashMap;
use warden_protocol::config::EnvPolicy;

/// Build the environment map for a child process.
///
/// Parent environment minus the blocked set, intersected with the
/// allow-list when one is configured, then overlaid with caller extras
/// subject to the same rules. A caller extra that names a blocked variable
/// is an error rather than a silent drop: the controller asked for
/// something the policy forbids.
pub fn build_child_env(
    policy: &EnvPolicy,
    extras: &HashMap<String, String>,
) -> Result<HashMap<String, String>, ValidationError> {
    let mut env: HashMap<String, String> = std::env::vars()
        .filter(|(name, _)| !is_blocked(policy, name))
        .filter(|(name, _)| is_allowed(policy, name))
        .collect();

    for (name, value) in extras {
        if is_blocked(policy, name) {
            return Err(ValidationError::UntrustedEnvironment {
                reason: format!("caller attempted to set blocked variable {}", name),
            });
        }
        if !is_allowed(policy, name) {
            return Err(ValidationError::UntrustedEnvironment {
                reason: format!("variable {} is outside the configured allow-list", name),
            });
        }
        if value.contains('\0') {
            return Err(ValidationError::UntrustedEnvironment {
                reason: format!("variable {} contains an embedded NUL", name),
            });
        }
        env.insert(name.clone(), value.clone());
    }

    Ok(env)
}

fn is_blocked(policy: &EnvPolicy, name: &str) -> bool {
    policy.blocked.iter().any(|b| b == name)
}

fn is_allowed(policy: &EnvPolicy, name: &str) -> bool {
    match &policy.allowed {
        Some(allowed) => allowed.iter().any(|a| a == name),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(blocked: &[&str], allowed: Option<&[&str]>) -> EnvPolicy {
        EnvPolicy {
            blocked: blocked.iter().map(|s| s.to_string()).collect(),
            allowed: allowed.map(|list| list.iter().map(|s| s.to_string()).collect()),
        }
    }

    #[test]
    fn blocked_names_are_stripped_from_parent() {
        std::env::set_var("WARDEN_TEST_BLOCKED", "1");
        let env = build_child_env(&policy(&["WARDEN_TEST_BLOCKED"], None), &HashMap::new())
            .unwrap();
        assert!(!env.contains_key("WARDEN_TEST_BLOCKED"));
        std::env::remove_var("WARDEN_TEST_BLOCKED");
    }

    #[test]
    fn allowlist_intersects_parent() {
        std::env::set_var("WARDEN_TEST_KEEP", "yes");
        std::env::set_var("WARDEN_TEST_DROP", "no");
        let env = build_child_env(&policy(&[], Some(&["WARDEN_TEST_KEEP"])), &HashMap::new())
            .unwrap();
        assert_eq!(env.get("WARDEN_TEST_KEEP").map(String::as_str), Some("yes"));
        assert!(!env.contains_key("WARDEN_TEST_DROP"));
        std::env::remove_var("WARDEN_TEST_KEEP");
        std::env::remove_var("WARDEN_TEST_DROP");
    }

    #[test]
    fn extras_overlay_but_respect_rules() {
        let mut extras = HashMap::new();
        extras.insert("CI".to_string(), "true".to_string());
        let env = build_child_env(&policy(&[], None), &extras).unwrap();
        assert_eq!(env.get("CI").map(String::as_str), Some("true"));

        let mut bad = HashMap::new();
        bad.insert("LD_PRELOAD".to_string(), "evil.so".to_string());
        let err = build_child_env(&policy(&["LD_PRELOAD"], None), &bad).unwrap_err();
        assert_eq!(err.code(), "UNTRUSTED_ENVIRONMENT");
    }
}
