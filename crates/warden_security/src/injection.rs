//! Argument injection heuristics.
//!
//! Arguments are passed to the child verbatim (no shell), so most of these
//! can only bite if the whitelisted program itself forwards them to a
//! shell. They are rejected anyway: the whitelist promises the operator a
//! bounded command grammar, not "safe unless the tool cooperates".

/// Tokens that mark an argument as an escalation attempt when they lead it.
const ESCALATION_PREFIXES: &[&str] = &["sudo", "su", "chmod", "chown", "eval", "exec"];

/// Returns the failed heuristic's name, or `None` when the argument is clean.
pub fn injection_reason(arg: &str) -> Option<&'static str> {
    if arg.contains('`') {
        return Some("backtick substitution");
    }
    if arg.contains("$(") {
        return Some("command substitution");
    }
    if arg.contains("${") {
        return Some("environment expansion");
    }
    if arg.contains('\0') {
        return Some("embedded NUL");
    }
    if arg.chars().any(|c| matches!(c, ';' | '&' | '|' | '<' | '>')) {
        return Some("shell metacharacter");
    }

    let lower = arg.to_lowercase();
    let mut tokens = lower.split_whitespace();
    if let Some(first) = tokens.next() {
        if ESCALATION_PREFIXES.contains(&first) {
            return Some("privilege escalation prefix");
        }
        if first == "rm" && tokens.next().is_some_and(|t| t.starts_with("-rf")) {
            return Some("recursive delete prefix");
        }
    }

    let traverses = arg
        .split(['/', '\\'])
        .any(|segment| segment == "..");
    if traverses {
        return Some("path traversal segment");
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_arguments_pass() {
        for arg in ["hello", "-v", "--color=auto", "src/main.rs", "a b c"] {
            assert_eq!(injection_reason(arg), None, "arg {:?}", arg);
        }
    }

    #[test]
    fn substitutions_are_flagged() {
        assert!(injection_reason("`id`").is_some());
        assert!(injection_reason("$(id)").is_some());
        assert!(injection_reason("${PATH}").is_some());
    }

    #[test]
    fn metacharacters_are_flagged() {
        for arg in ["a;b", "a&", "x|y", "in<f", "out>f"] {
            assert!(injection_reason(arg).is_some(), "arg {:?}", arg);
        }
    }

    #[test]
    fn escalation_prefixes_are_flagged_case_insensitively() {
        assert_eq!(
            injection_reason("SUDO shutdown"),
            Some("privilege escalation prefix")
        );
        assert_eq!(
            injection_reason("rm -rf /tmp/x"),
            Some("recursive delete prefix")
        );
        // "rm" alone with other flags is a different story; the whitelist
        // decides, not this heuristic.
        assert_eq!(injection_reason("rm file.txt"), None);
    }

    #[test]
    fn traversal_segments_are_flagged() {
        assert!(injection_reason("../up").is_some());
        assert!(injection_reason("a/../b").is_some());
        assert!(injection_reason("..\\windows").is_some());
        // A literal ".." inside a filename is fine.
        assert_eq!(injection_reason("notes..txt"), None);
    }
}
