/// Host name of an inserting identity.
///
/// Certificate identities look like `/O=Grid/O=NorduGrid/CN=host/ce.example.org`;
/// the last `CN=` component is used with any `host/` service prefix removed.
/// Identities without a `CN=` component are returned unchanged.
pub fn extract_fqdn(identity: &str) -> &str {
    let Some(pos) = identity.rfind("CN=") else {
        return identity;
    };
    let cn = &identity[pos + 3..];
    // the CN value ends at the next RDN separator, but `/` is legal inside
    // it (host/<fqdn>) so only `,` terminates here
    let cn = cn.split(',').next().unwrap_or(cn).trim();
    cn.strip_prefix("host/").unwrap_or(cn)
}

/// Decides whether a machine name in a submitted record belongs to the
/// inserting host.
///
/// With `depth` N, names sharing their last N labels are considered the same
/// site, so `host4.ex.org` may insert records for `host2.ex.org` at depth 2.
/// Depth 0 requires an exact match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertionChecker {
    depth: usize,
}

impl InsertionChecker {
    pub fn new(depth: usize) -> Self {
        Self { depth }
    }

    pub fn matches(&self, machine_name: &str, fqdn: &str) -> bool {
        if machine_name == fqdn {
            return true;
        }
        if self.depth == 0 {
            return false;
        }

        let mn_labels: Vec<&str> = machine_name.split('.').collect();
        let fqdn_labels: Vec<&str> = fqdn.split('.').collect();
        // both names need a host part beyond the shared domain
        if mn_labels.len() <= self.depth || fqdn_labels.len() <= self.depth {
            return false;
        }

        mn_labels[mn_labels.len() - self.depth..] == fqdn_labels[fqdn_labels.len() - self.depth..]
    }
}
