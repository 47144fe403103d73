use crate::authz::types::Action;
use crate::authz::RuleStore;

/// True iff `subject` holds any rule for `action`, whatever its scope.
/// Cheap pre-check used before building a request context.
pub fn has_relevant_right(store: &RuleStore, subject: &str, action: Action) -> bool {
    store.scope(subject, action).is_some()
}

/// Decide whether `subject` may perform `action` given the request
/// `context` (ordered key/value pairs, keys may repeat).
///
/// Deny-by-default: no rule, or no matching constraint set, yields `false`.
/// The two cases are not distinguished.
pub fn is_allowed(
    store: &RuleStore,
    subject: &str,
    action: Action,
    context: &[(&str, &str)],
) -> bool {
    let Some(scope) = store.scope(subject, action) else {
        return false;
    };

    let allowed = scope.matches(context);

    tracing::trace!(subject, %action, allowed, "Authorization decision");
    allowed
}
