//! Interface suites, one per capability name.
//!
//! Each suite is a fixed, ordered table of sub-tests run against a live
//! connection. Sub-tests key their data under a random run prefix so
//! repeated runs against a long-lived pattern do not interfere.

use anyhow::{bail, ensure};
use futures::future::BoxFuture;
use std::time::Duration;

use padl_core::wire;

use crate::Connection;

pub type TestFn = for<'a> fn(&'a Connection) -> BoxFuture<'a, anyhow::Result<()>>;

/// The suite registered for `capability`, if any.
pub fn suite_for(capability: &str) -> Option<&'static [(&'static str, TestFn)]> {
    match capability {
        wire::CAP_KEYVALUE_BASIC => Some(KEYVALUE_BASIC),
        wire::CAP_KEYVALUE_TTL => Some(KEYVALUE_TTL),
        wire::CAP_KEYVALUE_SCAN => Some(KEYVALUE_SCAN),
        _ => None,
    }
}

const KEYVALUE_BASIC: &[(&str, TestFn)] = &[
    ("set_and_get", set_and_get),
    ("get_nonexistent", get_nonexistent),
    ("delete", delete),
    ("exists", exists),
    ("overwrite_value", overwrite_value),
];

const KEYVALUE_TTL: &[(&str, TestFn)] = &[
    ("entry_expires", entry_expires),
    ("no_ttl_persists", no_ttl_persists),
];

const KEYVALUE_SCAN: &[(&str, TestFn)] = &[
    ("prefix_scan_ordered", prefix_scan_ordered),
    ("scan_limit", scan_limit),
    ("unmatched_prefix_is_empty", unmatched_prefix_is_empty),
];

fn run_key(test: &str) -> String {
    format!("conformance:{}:{}", test, uuid::Uuid::new_v4())
}

// ── keyvalue_basic ─────────────────────────────────────────────────────

fn set_and_get(conn: &Connection) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        let key = run_key("set_and_get");
        conn.set(&key, "value-1", None).await?;
        let got = conn.get(&key).await?;
        ensure!(
            got.as_deref() == Some("value-1"),
            "expected value-1, got {:?}",
            got
        );
        conn.delete(&key).await?;
        Ok(())
    })
}

fn get_nonexistent(conn: &Connection) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        let key = run_key("get_nonexistent");
        let got = conn.get(&key).await?;
        ensure!(got.is_none(), "missing key returned {:?}", got);
        Ok(())
    })
}

fn delete(conn: &Connection) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        let key = run_key("delete");
        conn.set(&key, "value", None).await?;
        ensure!(conn.delete(&key).await?, "delete of a present key was false");
        ensure!(
            conn.get(&key).await?.is_none(),
            "key still readable after delete"
        );
        ensure!(
            !conn.delete(&key).await?,
            "second delete of the same key was true"
        );
        Ok(())
    })
}

fn exists(conn: &Connection) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        let key = run_key("exists");
        ensure!(!conn.exists(&key).await?, "exists true before set");
        conn.set(&key, "value", None).await?;
        ensure!(conn.exists(&key).await?, "exists false after set");
        conn.delete(&key).await?;
        Ok(())
    })
}

fn overwrite_value(conn: &Connection) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        let key = run_key("overwrite");
        conn.set(&key, "first", None).await?;
        conn.set(&key, "second", None).await?;
        let got = conn.get(&key).await?;
        ensure!(
            got.as_deref() == Some("second"),
            "overwrite not visible, got {:?}",
            got
        );
        conn.delete(&key).await?;
        Ok(())
    })
}

// ── keyvalue_ttl ───────────────────────────────────────────────────────

fn entry_expires(conn: &Connection) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        let key = run_key("ttl_expires");
        conn.set(&key, "short-lived", Some(100)).await?;
        ensure!(conn.exists(&key).await?, "entry missing before its TTL");

        tokio::time::sleep(Duration::from_millis(250)).await;

        if let Some(v) = conn.get(&key).await? {
            bail!("entry still readable past its TTL: {:?}", v);
        }
        ensure!(!conn.exists(&key).await?, "exists true past TTL");
        Ok(())
    })
}

fn no_ttl_persists(conn: &Connection) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        let key = run_key("no_ttl");
        conn.set(&key, "durable", None).await?;
        tokio::time::sleep(Duration::from_millis(150)).await;
        ensure!(
            conn.get(&key).await?.as_deref() == Some("durable"),
            "entry without TTL disappeared"
        );
        conn.delete(&key).await?;
        Ok(())
    })
}

// ── keyvalue_scan ──────────────────────────────────────────────────────

fn prefix_scan_ordered(conn: &Connection) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        let prefix = run_key("scan");
        let keys = [
            format!("{}:b", prefix),
            format!("{}:a", prefix),
            format!("{}:c", prefix),
        ];
        for key in &keys {
            conn.set(key, "v", None).await?;
        }
        // A key outside the prefix must not appear.
        let outsider = run_key("scan_outsider");
        conn.set(&outsider, "v", None).await?;

        let found = conn.scan(&prefix, None).await?;
        let expected = vec![
            format!("{}:a", prefix),
            format!("{}:b", prefix),
            format!("{}:c", prefix),
        ];
        ensure!(
            found == expected,
            "expected {:?} in order, got {:?}",
            expected,
            found
        );

        for key in keys.iter().chain(std::iter::once(&outsider)) {
            conn.delete(key).await?;
        }
        Ok(())
    })
}

fn scan_limit(conn: &Connection) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        let prefix = run_key("scan_limit");
        let keys: Vec<String> = (0..4).map(|i| format!("{}:{}", prefix, i)).collect();
        for key in &keys {
            conn.set(key, "v", None).await?;
        }

        let found = conn.scan(&prefix, Some(2)).await?;
        ensure!(found.len() == 2, "limit 2 returned {} keys", found.len());
        ensure!(
            found == keys[..2],
            "limited scan not a lexicographic prefix of the keyspace: {:?}",
            found
        );

        for key in &keys {
            conn.delete(key).await?;
        }
        Ok(())
    })
}

fn unmatched_prefix_is_empty(conn: &Connection) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async move {
        let prefix = run_key("scan_nothing");
        let found = conn.scan(&prefix, None).await?;
        ensure!(found.is_empty(), "unmatched prefix returned {:?}", found);
        Ok(())
    })
}
