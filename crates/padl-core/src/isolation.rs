//! Isolation policy engine.
//!
//! Builds the execution context a pattern process is spawned into. The
//! isolation key determines the scope token and env scoping; resource
//! limits are applied unconditionally regardless of level and are not
//! renegotiated after spawn.

use std::path::PathBuf;

use crate::types::{InstanceKey, ResourceLimits, ScopeToken};
use crate::wire;

/// Everything the supervisor needs to spawn one pattern process.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Working directory for the spawned process (its pattern directory).
    pub working_dir: PathBuf,
    /// Environment overlay, applied on top of the parent environment.
    pub env: Vec<(String, String)>,
    /// CPU/memory limits, fixed at spawn time.
    pub limits: ResourceLimits,
    /// Scope token; unique per isolation key, so two instances with
    /// different keys never receive identical contexts.
    pub scope_token: String,
}

/// Builds execution contexts from isolation keys.
#[derive(Debug, Clone)]
pub struct IsolationPolicy {
    limits: ResourceLimits,
}

impl IsolationPolicy {
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }

    /// Build the execution context for one instance.
    ///
    /// `extra_env` carries the pattern manifest's environment; launch-time
    /// scoping variables are layered after it so they cannot be shadowed.
    pub fn execution_context(
        &self,
        key: &InstanceKey,
        working_dir: PathBuf,
        extra_env: impl IntoIterator<Item = (String, String)>,
    ) -> ExecutionContext {
        let scope_token = key.scope_token();

        let mut env: Vec<(String, String)> = extra_env.into_iter().collect();
        env.push((wire::ENV_PATTERN_NAME.into(), key.name.clone()));
        env.push((wire::ENV_SCOPE.into(), scope_token.clone()));

        match &key.scope {
            ScopeToken::Shared => {}
            ScopeToken::Namespace(ns) => {
                env.push((wire::ENV_NAMESPACE.into(), ns.clone()));
            }
            ScopeToken::Session { namespace, session } => {
                env.push((wire::ENV_NAMESPACE.into(), namespace.clone()));
                env.push((wire::ENV_SESSION_ID.into(), session.clone()));
            }
        }

        env.push((
            wire::ENV_CPU_LIMIT.into(),
            format!("{}", self.limits.cpu_fraction),
        ));
        env.push((
            wire::ENV_MEMORY_LIMIT.into(),
            format!("{}", self.limits.memory_bytes),
        ));

        ExecutionContext {
            working_dir,
            env,
            limits: self.limits,
            scope_token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IsolationLevel;

    fn limits() -> ResourceLimits {
        ResourceLimits {
            cpu_fraction: 1.5,
            memory_bytes: 256 * 1024 * 1024,
        }
    }

    fn env_value<'a>(ctx: &'a ExecutionContext, name: &str) -> Option<&'a str> {
        ctx.env
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_distinct_keys_yield_distinct_contexts() {
        let policy = IsolationPolicy::new(limits());
        let a = InstanceKey::new(IsolationLevel::Session, "memstore", "ns1", "s1").unwrap();
        let b = InstanceKey::new(IsolationLevel::Session, "memstore", "ns1", "s2").unwrap();

        let ctx_a = policy.execution_context(&a, PathBuf::from("/p"), vec![]);
        let ctx_b = policy.execution_context(&b, PathBuf::from("/p"), vec![]);
        assert_ne!(ctx_a.scope_token, ctx_b.scope_token);
    }

    #[test]
    fn test_none_isolation_has_no_scoping_env() {
        let policy = IsolationPolicy::new(limits());
        let key = InstanceKey::new(IsolationLevel::None, "memstore", "", "").unwrap();
        let ctx = policy.execution_context(&key, PathBuf::from("/p"), vec![]);

        assert_eq!(ctx.scope_token, "shared");
        assert!(env_value(&ctx, wire::ENV_NAMESPACE).is_none());
        assert!(env_value(&ctx, wire::ENV_SESSION_ID).is_none());
    }

    #[test]
    fn test_session_isolation_scopes_env() {
        let policy = IsolationPolicy::new(limits());
        let key = InstanceKey::new(IsolationLevel::Session, "memstore", "ns1", "s1").unwrap();
        let ctx = policy.execution_context(&key, PathBuf::from("/p"), vec![]);

        assert_eq!(env_value(&ctx, wire::ENV_NAMESPACE), Some("ns1"));
        assert_eq!(env_value(&ctx, wire::ENV_SESSION_ID), Some("s1"));
        assert_eq!(env_value(&ctx, wire::ENV_PATTERN_NAME), Some("memstore"));
    }

    #[test]
    fn test_limits_applied_regardless_of_level() {
        let policy = IsolationPolicy::new(limits());
        for key in [
            InstanceKey::new(IsolationLevel::None, "m", "", "").unwrap(),
            InstanceKey::new(IsolationLevel::Namespace, "m", "ns", "").unwrap(),
            InstanceKey::new(IsolationLevel::Session, "m", "ns", "s").unwrap(),
        ] {
            let ctx = policy.execution_context(&key, PathBuf::from("/p"), vec![]);
            assert_eq!(ctx.limits, limits());
            assert_eq!(env_value(&ctx, wire::ENV_CPU_LIMIT), Some("1.5"));
            assert_eq!(
                env_value(&ctx, wire::ENV_MEMORY_LIMIT),
                Some("268435456")
            );
        }
    }

    #[test]
    fn test_manifest_env_cannot_shadow_scoping() {
        let policy = IsolationPolicy::new(limits());
        let key = InstanceKey::new(IsolationLevel::Namespace, "m", "real-ns", "").unwrap();
        let ctx = policy.execution_context(
            &key,
            PathBuf::from("/p"),
            vec![(wire::ENV_NAMESPACE.to_string(), "spoofed".to_string())],
        );
        // Scoping vars are appended after manifest env, so the last value
        // (which wins when applied in order) is the launcher's.
        let last = ctx
            .env
            .iter()
            .rev()
            .find(|(k, _)| k == wire::ENV_NAMESPACE)
            .unwrap();
        assert_eq!(last.1, "real-ns");
    }
}
