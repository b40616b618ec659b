//! Replica identity (§4.3): `hostname:pid`, computed once and fixed for the
//! lifetime of the process. Written to `locked_by` on every lock a replica
//! holds, and to `executor_instance` on every execution log row.

use std::sync::OnceLock;

static INSTANCE_ID: OnceLock<String> = OnceLock::new();

/// Return this replica's instance id, computing it on first call.
pub fn instance_id() -> &'static str {
    INSTANCE_ID.get_or_init(|| {
        let hostname = gethostname::gethostname()
            .to_string_lossy()
            .into_owned();
        format!("{hostname}:{}", std::process::id())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_is_stable_across_calls() {
        assert_eq!(instance_id(), instance_id());
    }

    #[test]
    fn instance_id_contains_pid() {
        let id = instance_id();
        assert!(id.ends_with(&format!(":{}", std::process::id())));
    }
}
