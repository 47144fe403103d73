use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Failed to load rule file `{path}`")]
    #[diagnostic(
        code(sgas::authz::rule_file_load),
        help("Check that the file exists and is readable (configured as `authz.rules_file`)")
    )]
    RuleFileLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid rule on line {line}: {reason}")]
    #[diagnostic(
        code(sgas::authz::rule_parse),
        help("Rule syntax: \"subject\" action[:all|key=value[;value]...[+key=value...]][, action...]")
    )]
    RuleParse {
        line: usize,
        content: String,
        reason: String,
    },
}

impl AuthzError {
    pub(crate) fn parse(line: usize, content: &str, reason: impl Into<String>) -> Self {
        AuthzError::RuleParse {
            line,
            content: content.to_string(),
            reason: reason.into(),
        }
    }
}
