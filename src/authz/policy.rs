use crate::authz::errors::AuthzError;
use crate::authz::types::*;

/// Parse rule-language text into typed rules.
///
/// The format is line oriented. Blank lines and lines starting with `#` are
/// ignored; every other line names a quoted subject followed by a
/// comma-separated list of rules:
///
/// ```text
/// "host3"  insert:machine_name=host2
/// "user5"  view:group=vg1;vg2
/// "bot6"   query:machine_name=host2+user_identity=user2;user4
/// "bot4"   query:user_identity=user1, query:user_identity=user3
/// ```
///
/// Parsing is all-or-nothing: the first malformed line aborts with an error
/// naming that line.
pub fn parse_rule_text(source: &str) -> Result<ParsedRules, AuthzError> {
    let mut parsed = ParsedRules::default();

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (subject, rest) = split_subject(line).map_err(|r| AuthzError::parse(line_no, line, r))?;

        if rest.trim().is_empty() {
            return Err(AuthzError::parse(
                line_no,
                line,
                format!("subject `{subject}` has no rules"),
            ));
        }

        for rule_text in rest.split(',') {
            let rule_text = rule_text.trim();
            if rule_text.is_empty() {
                return Err(AuthzError::parse(line_no, line, "empty rule in rule list"));
            }
            let (action, scope) =
                parse_rule(rule_text).map_err(|r| AuthzError::parse(line_no, line, r))?;
            parsed.rules.push(Rule {
                subject: subject.to_string(),
                action,
                scope,
            });
        }
    }

    Ok(parsed)
}

/// Split `"subject" rest` into its two halves.
fn split_subject(line: &str) -> Result<(&str, &str), String> {
    let Some(after_quote) = line.strip_prefix('"') else {
        return Err("subject must be enclosed in double quotes".into());
    };
    let Some(end) = after_quote.find('"') else {
        return Err("unterminated quoted subject".into());
    };
    let subject = &after_quote[..end];
    if subject.is_empty() {
        return Err("empty subject".into());
    }
    let rest = &after_quote[end + 1..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return Err(format!("expected whitespace after subject `{subject}`"));
    }
    Ok((subject, rest))
}

/// Parse `action[:scope]`.
fn parse_rule(text: &str) -> Result<(Action, Scope), String> {
    let (action_text, scope_text) = match text.split_once(':') {
        Some((a, s)) => (a.trim(), Some(s.trim())),
        None => (text, None),
    };
    let action: Action = action_text.parse()?;

    let scope = match scope_text {
        // A bare insert right only covers the subject's own host, which the
        // insertion checker grants; the engine itself grants nothing more.
        None if action == Action::Insert => Scope::ConstraintSets(Default::default()),
        None => Scope::All,
        Some(SCOPE_ALL) => Scope::All,
        Some("") => return Err(format!("empty scope after `{action}:`")),
        Some(s) => Scope::constrained([parse_constraint_set(s)?]),
    };

    Ok((action, scope))
}

/// Parse `key=v1;v2+key2=v3` into one constraint set.
fn parse_constraint_set(text: &str) -> Result<ConstraintSet, String> {
    let mut set = ConstraintSet::new();
    for constraint in text.split('+') {
        let constraint = constraint.trim();
        let Some((key, values)) = constraint.split_once('=') else {
            return Err(format!("constraint `{constraint}` is not of the form key=value"));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("empty key in constraint `{constraint}`"));
        }
        for value in values.split(';') {
            let value = value.trim();
            if value.is_empty() {
                return Err(format!("empty value for key `{key}`"));
            }
            set.allow(key, value);
        }
    }
    Ok(set)
}
